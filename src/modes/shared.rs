use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::info;

use crate::llm::LlmOracle;
use crate::pipeline::{AlertPipeline, AlertSink, IncomingMessage, Oracle};

#[derive(Clone)]
pub(super) struct BotCfg {
    pub token: String,
    pub db_path: String,
}

#[derive(Clone)]
pub(super) struct ReplayCfg {
    pub input_path: String,
    pub speed: f64,
    pub fixed_step_ms: Option<u64>,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub broadcast: bool,
}

impl ReplayCfg {
    /// Pause before replaying a message posted `delta_s` seconds after the
    /// previous one.
    pub fn delay_ms(&self, delta_s: i64) -> u64 {
        if let Some(step_ms) = self.fixed_step_ms {
            return step_ms;
        }
        let scaled = (delta_s.max(0) as f64 * 1000.0 / self.speed).round() as u64;
        scaled.clamp(self.min_delay_ms, self.max_delay_ms)
    }
}

/// One line of a JSONL channel dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct DumpEvent {
    pub timestamp: i64,
    pub channel_id: i64,
    pub channel_title: String,
    #[serde(default)]
    pub channel_username: Option<String>,
    pub text: String,
}

impl DumpEvent {
    pub fn into_message(self, id: i64) -> IncomingMessage {
        let timestamp = DateTime::<Utc>::from_timestamp(self.timestamp, 0).unwrap_or_default();
        IncomingMessage {
            id,
            text: self.text,
            channel_id: self.channel_id,
            channel: self.channel_username.unwrap_or(self.channel_title),
            timestamp,
            attachment: None,
        }
    }
}

pub(super) fn must_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("Missing env var {key}"))
}

pub(super) fn parse_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(default)
}

pub(super) fn load_bot_cfg() -> Result<BotCfg> {
    Ok(BotCfg {
        token: must_env("BOT_TOKEN")?,
        db_path: std::env::var("BOT_DB_PATH").unwrap_or_else(|_| "./bot_subscribers.sqlite".into()),
    })
}

/// | Env var               | Default  |
/// |-----------------------|----------|
/// | `REPLAY_INPUT_PATH`   | required |
/// | `REPLAY_SPEED`        | `1.0`    |
/// | `REPLAY_STEP_MS`      | —        |
/// | `REPLAY_MIN_DELAY_MS` | `0`      |
/// | `REPLAY_MAX_DELAY_MS` | `10000`  |
/// | `REPLAY_BROADCAST`    | `false`  |
pub(super) fn load_replay_cfg() -> Result<ReplayCfg> {
    let input_path = must_env("REPLAY_INPUT_PATH")?;
    let speed = std::env::var("REPLAY_SPEED")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(1.0);
    let fixed_step_ms = std::env::var("REPLAY_STEP_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0);
    let min_delay_ms = std::env::var("REPLAY_MIN_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let max_delay_ms = std::env::var("REPLAY_MAX_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(10_000);

    Ok(ReplayCfg {
        input_path,
        speed,
        fixed_step_ms,
        min_delay_ms,
        max_delay_ms,
        broadcast: parse_bool_env("REPLAY_BROADCAST", false),
    })
}

pub(super) fn load_dump_events(path: &str) -> Result<Vec<DumpEvent>> {
    let file = File::open(path).with_context(|| format!("failed to open replay file {path}"))?;
    parse_dump(BufReader::new(file))
}

fn parse_dump(reader: impl BufRead) -> Result<Vec<DumpEvent>> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: DumpEvent =
            serde_json::from_str(&line).with_context(|| format!("invalid JSON at line {}", idx + 1))?;
        events.push(event);
    }

    events.sort_by_key(|e| (e.timestamp, e.channel_id));
    Ok(events)
}

/// Pipeline with the optional oracle wired into both of its uses.
pub(super) fn build_pipeline() -> AlertPipeline {
    let oracle: Option<Arc<dyn Oracle>> = match LlmOracle::from_env() {
        Some(llm) => {
            info!("Oracle: {llm}");
            Some(Arc::new(llm))
        }
        None => {
            info!("Oracle: disabled");
            None
        }
    };
    let pipeline = AlertPipeline::from_env(oracle);
    info!("Pipeline config: {pipeline}");
    pipeline
}

/// Feed every message through the pipeline in arrival order.  With
/// `stats_every`, counters are logged after every n-th message.
pub(super) async fn drive(
    messages: impl Stream<Item = IncomingMessage>,
    pipeline: &mut AlertPipeline,
    sink: &dyn AlertSink,
    stats_every: Option<u64>,
) {
    let mut messages = std::pin::pin!(messages);
    while let Some(msg) = messages.next().await {
        pipeline.dispatch(&msg, sink).await;

        if let Some(every) = stats_every.filter(|n| *n > 0) {
            let stats = pipeline.stats();
            if stats.messages % every == 0 {
                info!("Stats: {stats}");
            }
        }
    }
}
