//! The alert pipeline: one message in, zero or more validated, deduplicated
//! events out.
//!
//! ```text
//! normalize → text dedup → route (classify + extract) → oracle fallback
//!           → dictionary correction / region resolution → validate
//!           → semantic dedup → format → deliver
//! ```
//!
//! Messages are processed strictly one at a time; the dedup windows and the
//! geocode cache are the only state that outlives a message.

pub mod dedup;
pub mod event;
pub mod extract;
pub mod gazetteer;
pub mod morphology;
pub mod normalize;
pub mod patterns;
pub mod resolver;
pub mod router;
pub mod threat_kind;

#[cfg(test)]
mod pipeline_tests;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use dedup::DedupCache;
use event::{Event, EventValidator};
use gazetteer::Gazetteer;
use normalize::normalize_text;
use patterns::PATTERNS;
use resolver::RegionResolver;
use router::{MessageContext, ThreatRouter};
use threat_kind::ThreatKind;

/// Minimum cleaned length before the oracle is asked to parse a message.
const ORACLE_MIN_CHARS: usize = 20;
const ORACLE_CONFIDENCE: f32 = 0.7;
const DEFAULT_SEND_PAUSE: Duration = Duration::from_millis(500);

// ───────────────────────────── Boundaries ────────────────────────────────

/// Media carried by the source post, relayed with the first alert only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// `@username` or numeric Bot API chat id of the source channel.
    pub source_chat: String,
    pub message_id: i32,
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: i64,
    pub text: String,
    pub channel_id: i64,
    /// Channel username (used for region hints and as the event source).
    pub channel: String,
    pub timestamp: DateTime<Utc>,
    pub attachment: Option<Attachment>,
}

impl IncomingMessage {
    pub fn has_attachment(&self) -> bool {
        self.attachment.is_some()
    }
}

/// Outbound delivery.  `false` means the alert was not delivered.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, text: &str, attachment: Option<&Attachment>) -> bool;
}

/// One location the oracle claims a message mentions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OracleEvent {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Last-resort language-model helper.  Implementations fail open: any
/// error is an empty answer.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn ask_region(&self, city: &str, region_hint: Option<&str>) -> Option<String>;
    async fn ask_parse(&self, text: &str) -> Vec<OracleEvent>;
}

// ───────────────────────────── Stats ─────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub messages: u64,
    pub events_parsed: u64,
    pub events_sent: u64,
    pub duplicates: u64,
    pub geocode_cache_hits: u64,
    pub geocode_provider_calls: u64,
    pub oracle_calls: u64,
}

impl fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages={} parsed={} sent={} duplicates={} cache_hits={} provider_calls={} oracle_calls={}",
            self.messages,
            self.events_parsed,
            self.events_sent,
            self.duplicates,
            self.geocode_cache_hits,
            self.geocode_provider_calls,
            self.oracle_calls,
        )
    }
}

// ───────────────────────────── Pipeline ──────────────────────────────────

pub struct AlertPipeline {
    gazetteer: Arc<Gazetteer>,
    resolver: RegionResolver,
    oracle: Option<Arc<dyn Oracle>>,
    text_dedup: DedupCache,
    semantic_dedup: DedupCache,
    send_pause: Duration,
    stats: PipelineStats,
}

impl AlertPipeline {
    pub fn new(gazetteer: Arc<Gazetteer>, resolver: RegionResolver) -> Self {
        Self {
            gazetteer,
            resolver,
            oracle: None,
            text_dedup: DedupCache::new(Duration::from_secs(120)),
            semantic_dedup: DedupCache::new(Duration::from_secs(300)),
            send_pause: DEFAULT_SEND_PAUSE,
            stats: PipelineStats::default(),
        }
    }

    /// Build from environment variables.
    ///
    /// | Env var           | Default | Description                                  |
    /// |-------------------|---------|----------------------------------------------|
    /// | `DEDUP_INTERVAL`  | `300`   | Semantic dedup window, seconds               |
    /// | `TEXT_DEDUP_SECS` | `120`   | Raw-text dedup window, seconds               |
    /// | `CHANNEL_REGIONS` | —       | Extra hints, `channel=Region;channel=Region` |
    ///
    /// The resolver reads its own variables, see [`RegionResolver::from_env`].
    pub fn from_env(oracle: Option<Arc<dyn Oracle>>) -> Self {
        let semantic = env_secs("DEDUP_INTERVAL", 300);
        let text = env_secs("TEXT_DEDUP_SECS", 120);

        let extra_hints = std::env::var("CHANNEL_REGIONS").unwrap_or_default();
        let gazetteer = Arc::new(Gazetteer::ukraine().with_channel_hints(parse_channel_regions(&extra_hints)));

        let resolver = RegionResolver::from_env(Arc::clone(&gazetteer), oracle.clone());
        let pipeline = Self::new(gazetteer, resolver).with_dedup_windows(text, semantic);
        match oracle {
            Some(oracle) => pipeline.with_oracle(oracle),
            None => pipeline,
        }
    }

    /// Oracle for whole-message parsing.  Region lookups use the one given
    /// to the resolver.
    pub fn with_oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_dedup_windows(mut self, text: Duration, semantic: Duration) -> Self {
        self.text_dedup = DedupCache::new(text);
        self.semantic_dedup = DedupCache::new(semantic);
        self
    }

    pub fn with_send_pause(mut self, pause: Duration) -> Self {
        self.send_pause = pause;
        self
    }

    pub fn stats(&self) -> PipelineStats {
        let geo = self.resolver.stats();
        PipelineStats {
            geocode_cache_hits: geo.cache_hits + geo.negative_hits,
            geocode_provider_calls: geo.provider_calls,
            oracle_calls: self.stats.oracle_calls + geo.oracle_calls,
            ..self.stats
        }
    }

    /// Events worth emitting for `msg`.  Never fails; anything unusable
    /// yields an empty list.
    pub async fn process(&mut self, msg: &IncomingMessage) -> Vec<Event> {
        self.stats.messages += 1;

        let text = normalize_text(&msg.text);
        if text.is_empty() {
            debug!("msg {} from {}: nothing left after cleanup", msg.id, msg.channel);
            return Vec::new();
        }
        if self.text_dedup.check_and_add(&text, msg.timestamp) {
            debug!("msg {} from {}: same text seen recently", msg.id, msg.channel);
            self.stats.duplicates += 1;
            return Vec::new();
        }
        if text.lines().all(|line| PATTERNS.skip.alert.is_match(line)) {
            debug!("msg {} from {}: alert announcement only", msg.id, msg.channel);
            return Vec::new();
        }

        let ctx = MessageContext {
            source: msg.channel.clone(),
            timestamp: msg.timestamp,
            raw_text: Arc::from(msg.text.as_str()),
        };
        let mut events = ThreatRouter::new(&self.gazetteer).route(&text, &ctx);
        if events.is_empty() {
            events = self.oracle_parse(&text, &ctx).await;
        }
        self.stats.events_parsed += events.len() as u64;

        let hint = self.gazetteer.region_alias_in(&text).map(str::to_string);
        let mut enriched = Vec::with_capacity(events.len());
        for event in events {
            enriched.push(self.enrich(event, hint.as_deref()).await);
        }

        let valid = EventValidator::new(&self.gazetteer).retain_valid(enriched);
        let mut fresh = Vec::with_capacity(valid.len());
        for event in valid {
            if self.semantic_dedup.check_and_add(&event.dedup_key(), msg.timestamp) {
                debug!("duplicate {event}");
                self.stats.duplicates += 1;
            } else {
                fresh.push(event);
            }
        }
        fresh
    }

    /// Process `msg` and deliver every resulting alert through `sink`.
    /// Returns the number delivered.
    pub async fn dispatch(&mut self, msg: &IncomingMessage, sink: &dyn AlertSink) -> usize {
        let events = self.process(msg).await;
        let mut delivered = 0;

        for (idx, event) in events.iter().enumerate() {
            if idx > 0 && !self.send_pause.is_zero() {
                tokio::time::sleep(self.send_pause).await;
            }
            let attachment = if idx == 0 { msg.attachment.as_ref() } else { None };
            let text = event.format_message();
            if sink.send(&text, attachment).await {
                delivered += 1;
                self.stats.events_sent += 1;
                info!("Alert forwarded from @{} [{}]: {}", msg.channel, event.id(), text.replace('\n', " / "));
            } else {
                warn!("Alert {} from @{} was not delivered", event.id(), msg.channel);
            }
        }
        delivered
    }

    /// Dictionary region wins over anything parsed; missing regions go to
    /// the resolver.
    async fn enrich(&mut self, event: Event, hint: Option<&str>) -> Event {
        if event.kind == ThreatKind::Launch {
            return event;
        }
        let Some(city) = event.city.clone() else {
            return event;
        };

        if let Some(region) = self.gazetteer.region_of_city(&city) {
            if event.region.as_deref() != Some(region) {
                debug!("{city}: dictionary region {region} replaces {:?}", event.region);
                let region = region.to_string();
                return event.with_region(region);
            }
            return event;
        }
        if event.region.is_some() {
            return event;
        }

        match self.resolver.resolve(&city, hint).await {
            Some(region) => event.with_region(region),
            None => event,
        }
    }

    /// Whole-message fallback when no rule fired.  Every item must be
    /// grounded in the text.
    async fn oracle_parse(&mut self, text: &str, ctx: &MessageContext) -> Vec<Event> {
        let Some(oracle) = self.oracle.clone() else {
            return Vec::new();
        };
        if text.chars().count() < ORACLE_MIN_CHARS {
            return Vec::new();
        }

        self.stats.oracle_calls += 1;
        let items = oracle.ask_parse(text).await;
        let router = ThreatRouter::new(&self.gazetteer);
        let extractor = router.extractor();

        let mut events = Vec::new();
        for item in items {
            let Some(kind) = item.kind.as_deref().and_then(ThreatKind::from_variant_name) else {
                debug!("oracle item without a usable type: {item:?}");
                continue;
            };
            let mut event = Event::new(kind, ctx.source.as_str(), ctx.timestamp, Arc::clone(&ctx.raw_text))
                .with_confidence(ORACLE_CONFIDENCE);

            if let Some(raw_city) = item.city.as_deref().filter(|c| !c.trim().is_empty()) {
                if !self.gazetteer.is_grounded_in(text, raw_city) {
                    debug!("oracle city {raw_city:?} does not appear in the message");
                    continue;
                }
                match extractor.clean_city_name(raw_city) {
                    Some(city) => event = event.with_city(city),
                    None => continue,
                }
            } else if !kind.is_city_less() {
                continue;
            }

            // An ungrounded region is dropped; the resolver fills it from the city.
            if let Some(raw_region) = item.region.as_deref().filter(|r| !r.trim().is_empty()) {
                if self.gazetteer.is_grounded_in(text, raw_region) {
                    if let Some(region) = self.gazetteer.canonical_region(raw_region) {
                        event = event.with_region(region);
                    }
                } else if event.city.is_none() {
                    continue;
                } else {
                    debug!("oracle region {raw_region:?} does not appear in the message");
                }
            }
            events.push(event);
        }
        if !events.is_empty() {
            info!("oracle recovered {} event(s) from @{}", events.len(), ctx.source);
        }
        events
    }
}

impl fmt::Display for AlertPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AlertPipeline(regions={}, text_dedup={}s, dedup={}s, oracle={}, send_pause={}ms)",
            self.gazetteer.regions().count(),
            self.text_dedup.ttl().as_secs(),
            self.semantic_dedup.ttl().as_secs(),
            if self.oracle.is_some() { "on" } else { "off" },
            self.send_pause.as_millis(),
        )
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

/// `chan=Харківська обл.;other=Сумщина` → pairs; malformed entries are
/// skipped.
fn parse_channel_regions(raw: &str) -> Vec<(&str, &str)> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(channel, region)| (channel.trim(), region.trim()))
        .filter(|(channel, region)| !channel.is_empty() && !region.is_empty())
        .collect()
}
