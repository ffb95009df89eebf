use crate::bot::{self, BotBroadcaster};
use crate::pipeline::{AlertSink, Attachment};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::stream;
use reqwest::Client as HttpClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

use super::shared::{build_pipeline, drive, load_bot_cfg, load_dump_events, load_replay_cfg};

/// Prints alerts to stdout instead of delivering them.
#[derive(Default)]
struct StdoutSink {
    printed: AtomicUsize,
}

#[async_trait]
impl AlertSink for StdoutSink {
    async fn send(&self, text: &str, attachment: Option<&Attachment>) -> bool {
        let n = self.printed.fetch_add(1, Ordering::Relaxed) + 1;
        let media = if attachment.is_some() { " +media" } else { "" };
        println!("\n[REPLAY ALERT {n}{media}]\n{text}\n");
        true
    }
}

pub(super) async fn run() -> Result<()> {
    let replay = load_replay_cfg()?;
    let events = load_dump_events(&replay.input_path)?;
    if events.is_empty() {
        return Err(anyhow!("Replay input is empty: {}", replay.input_path));
    }
    let total = events.len();
    info!("Replay started: {total} messages from {}", replay.input_path);

    let sink: Box<dyn AlertSink> = if replay.broadcast {
        let bot_cfg = load_bot_cfg()?;
        let db = bot::open_db(&bot_cfg.db_path)?;
        info!("Replay broadcast enabled; alerts will be sent to bot subscribers");
        Box::new(BotBroadcaster::new(HttpClient::new(), bot_cfg.token, db))
    } else {
        Box::new(StdoutSink::default())
    };

    // Re-create the original pacing between posts.
    let cfg = replay.clone();
    let messages = stream::unfold(
        (events.into_iter().enumerate(), None::<i64>),
        move |(mut iter, prev_ts)| {
            let cfg = cfg.clone();
            async move {
                let (idx, event) = iter.next()?;
                if let Some(prev) = prev_ts {
                    let delay_ms = cfg.delay_ms(event.timestamp - prev);
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                let ts = event.timestamp;
                Some((event.into_message(idx as i64 + 1), (iter, Some(ts))))
            }
        },
    );

    let mut pipeline = build_pipeline();
    drive(messages, &mut pipeline, sink.as_ref(), None).await;

    let stats = pipeline.stats();
    info!(
        "Replay complete: total={total}, forwarded={}, duplicates={}",
        stats.events_sent, stats.duplicates
    );
    info!("Stats: {stats}");
    Ok(())
}
