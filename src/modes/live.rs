use crate::bot::{self, BotBroadcaster};
use crate::pipeline::{Attachment, IncomingMessage};
use crate::telegram;
use anyhow::Result;
use futures_util::stream;
use grammers_client::Update;
use reqwest::Client as HttpClient;
use tracing::{info, warn};

use super::shared::{build_pipeline, drive, load_bot_cfg};

const STATS_EVERY: u64 = 100;

pub(super) async fn run() -> Result<()> {
    let tg = telegram::load_tg_cfg()?;
    let bot_cfg = load_bot_cfg()?;

    let bot_db = bot::open_db(&bot_cfg.db_path)?;
    let broadcaster = BotBroadcaster::new(HttpClient::new(), bot_cfg.token, bot_db);
    broadcaster.spawn_polling();

    let (client, pool) = telegram::connect(&tg)?;

    let runner = pool.runner;
    tokio::spawn(async move {
        runner.run().await;
    });

    let updates_rx = pool.updates;

    telegram::ensure_user_login(&client, &tg).await?;
    let watched = telegram::resolve_channels(&client, &tg).await?;

    let updates = client.stream_updates(
        updates_rx,
        grammers_client::UpdatesConfiguration {
            catch_up: true,
            update_queue_limit: Some(2048),
        },
    );

    // New posts from watched channels, in arrival order.
    let messages = stream::unfold((updates, watched), |(mut updates, watched)| async move {
        loop {
            let Ok(update) = updates.next().await else {
                warn!("Update stream ended.");
                return None;
            };
            let Update::NewMessage(msg) = update else {
                continue;
            };
            let Ok(peer) = msg.peer() else {
                continue;
            };
            let channel_id = peer.id().bare_id();
            let Some(username) = watched.get(&channel_id).cloned() else {
                continue;
            };
            let text = msg.text().trim().to_string();
            if text.is_empty() {
                continue;
            }

            let attachment = msg.media().map(|_| Attachment {
                source_chat: format!("@{username}"),
                message_id: msg.id(),
            });
            let incoming = IncomingMessage {
                id: i64::from(msg.id()),
                text,
                channel_id,
                channel: username,
                timestamp: msg.date(),
                attachment,
            };
            return Some((incoming, (updates, watched)));
        }
    });

    let mut pipeline = build_pipeline();
    info!("Running in live mode. Waiting for new messages...");
    drive(messages, &mut pipeline, &broadcaster, Some(STATS_EVERY)).await;

    info!("Live mode stopped. {}", pipeline.stats());
    Ok(())
}
