// ─────────────────────────────── Tests ───────────────────────────────────

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::pipeline::gazetteer::Gazetteer;
use crate::pipeline::resolver::RegionResolver;
use crate::pipeline::resolver::cache::{GeocodeCache, MemoryStorage};
use crate::pipeline::resolver::providers::{GeoHit, GeoProvider, PlaceLevel, ProviderError};
use crate::pipeline::threat_kind::ThreatKind;
use crate::pipeline::{AlertPipeline, AlertSink, Attachment, IncomingMessage, Oracle, OracleEvent};

// ── Doubles ──

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(String, Option<Attachment>)>>,
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, text: &str, attachment: Option<&Attachment>) -> bool {
        self.sent.lock().unwrap().push((text.to_string(), attachment.cloned()));
        true
    }
}

struct ScriptedOracle {
    items: Vec<OracleEvent>,
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn ask_region(&self, _city: &str, _hint: Option<&str>) -> Option<String> {
        None
    }

    async fn ask_parse(&self, _text: &str) -> Vec<OracleEvent> {
        self.items.clone()
    }
}

struct FixedProvider {
    hit: GeoHit,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl GeoProvider for FixedProvider {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn lookup(&self, _city: &str, _hint: Option<&str>) -> Result<Vec<GeoHit>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.hit.clone()])
    }
}

// ── Helpers ──

fn pipeline() -> AlertPipeline {
    let gazetteer = Arc::new(Gazetteer::ukraine());
    let cache = GeocodeCache::load(Box::new(MemoryStorage::default()));
    let resolver = RegionResolver::new(Arc::clone(&gazetteer), cache);
    AlertPipeline::new(gazetteer, resolver).with_send_pause(Duration::ZERO)
}

/// Pipeline whose only geocoder answers every query with `name` in Poltava oblast.
fn pipeline_with_provider(name: &str) -> (AlertPipeline, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let provider = FixedProvider {
        hit: GeoHit {
            name: name.into(),
            region: Some("Полтавська область".into()),
            country_code: Some("ua".into()),
            level: PlaceLevel::Settlement,
            lat: 49.5,
            lon: 34.0,
        },
        calls: Arc::clone(&calls),
    };
    let gazetteer = Arc::new(Gazetteer::ukraine());
    let resolver = RegionResolver::new(
        Arc::clone(&gazetteer),
        GeocodeCache::load(Box::new(MemoryStorage::default())),
    )
    .with_provider(Box::new(provider));
    let pipeline = AlertPipeline::new(gazetteer, resolver).with_send_pause(Duration::ZERO);
    (pipeline, calls)
}

fn message(id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        id,
        text: text.to_string(),
        channel_id: 1001,
        channel: "test_channel".into(),
        timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 21, 0, 0).unwrap(),
        attachment: None,
    }
}

fn oracle_item(city: &str, region: &str, kind: &str) -> OracleEvent {
    OracleEvent {
        city: Some(city.into()),
        region: Some(region.into()),
        kind: Some(kind.into()),
    }
}

// ── Scenarios ──

#[tokio::test]
async fn explosion_in_the_capital() {
    let mut p = pipeline();
    let events = p.process(&message(1, "Київ - вибухи")).await;

    assert_eq!(events.len(), 1);
    let e = &events[0];
    assert_eq!(e.kind, ThreatKind::Explosion);
    assert_eq!(e.city.as_deref(), Some("Київ"));
    assert_eq!(e.region.as_deref(), Some("Київська обл."));

    let text = e.format_message();
    assert!(text.starts_with("Вибухи "));
    assert!(text.contains("Київ"));
}

#[tokio::test]
async fn region_header_and_count() {
    let mut p = pipeline();
    let events = p.process(&message(1, "Харківщина:\n▪️2 на Богодухів")).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].city.as_deref(), Some("Богодухів"));
    assert_eq!(events[0].region.as_deref(), Some("Харківська обл."));
    assert_eq!(events[0].count, Some(2));
}

#[tokio::test]
async fn ballistic_clear_is_a_single_literal() {
    let mut p = pipeline();
    let events = p.process(&message(1, "🟢 Відбій загрози балістики.")).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ThreatKind::BallisticClear);
    assert_eq!(events[0].city, None);
    assert_eq!(events[0].format_message(), "Відбій загрози балістики!");
}

#[tokio::test]
async fn located_drone_keeps_its_label() {
    let mut p = pipeline();
    let events = p.process(&message(1, "БПЛА Харків (Харківська обл.)")).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].format_message(), "БПЛА Харків (Харківська обл.)");
}

#[tokio::test]
async fn generic_settlement_noun_is_not_an_alert() {
    let mut p = pipeline();
    assert!(p.process(&message(1, "БПЛА над містом")).await.is_empty());
}

#[tokio::test]
async fn garbage_input_yields_nothing() {
    let mut p = pipeline();
    for (id, text) in ["", "🔴🔴🔴", "   \n\n", "https://t.me/somechannel", "@handle"].iter().enumerate() {
        assert!(p.process(&message(id as i64, text)).await.is_empty(), "input {text:?}");
    }
}

#[tokio::test]
async fn alert_announcement_alone_is_dropped() {
    let mut p = pipeline();
    assert!(p.process(&message(1, "Повітряна тривога в Сумській області")).await.is_empty());
}

#[tokio::test]
async fn dictionary_region_overrides_the_parsed_one() {
    let mut p = pipeline();
    let events = p.process(&message(1, "БПЛА Харків (Сумська обл.)")).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].region.as_deref(), Some("Харківська обл."));
}

// ── Deduplication ──

#[tokio::test]
async fn identical_text_is_suppressed() {
    let mut p = pipeline();
    assert_eq!(p.process(&message(1, "Київ - вибухи")).await.len(), 1);
    assert!(p.process(&message(2, "Київ - вибухи")).await.is_empty());
    assert_eq!(p.stats().duplicates, 1);
}

#[tokio::test]
async fn same_city_and_threat_is_suppressed() {
    let mut p = pipeline();
    assert_eq!(p.process(&message(1, "Харківщина:\n▪️2 на Богодухів")).await.len(), 1);
    assert!(p.process(&message(2, "Харківщина:\n▪️3 на Богодухів")).await.is_empty());
}

#[tokio::test]
async fn windows_follow_message_time() {
    let mut p = pipeline();
    let first = message(1, "Київ - вибухи");
    let mut later = message(2, "Київ - вибухи");
    later.timestamp = first.timestamp + chrono::Duration::minutes(6);

    assert_eq!(p.process(&first).await.len(), 1);
    assert_eq!(p.process(&later).await.len(), 1);
    assert_eq!(p.stats().duplicates, 0);
}

#[tokio::test]
async fn zero_windows_let_repeats_through() {
    let mut p = pipeline().with_dedup_windows(Duration::ZERO, Duration::ZERO);
    assert_eq!(p.process(&message(1, "Київ - вибухи")).await.len(), 1);
    assert_eq!(p.process(&message(2, "Київ - вибухи")).await.len(), 1);
}

// ── Resolution and oracle ──

#[tokio::test]
async fn unknown_settlement_is_resolved_through_the_provider() {
    let (mut p, calls) = pipeline_with_provider("Небувалівка");

    let events = p.process(&message(1, "Шахеди на Небувалівку")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].city.as_deref(), Some("Небувалівка"));
    assert_eq!(events[0].region.as_deref(), Some("Полтавська обл."));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(p.stats().geocode_provider_calls, 1);
}

#[tokio::test]
async fn locative_of_sk_town_is_recognised() {
    let mut p = pipeline();
    let events = p.process(&message(1, "Вибухи в Краматорську")).await;

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ThreatKind::Explosion);
    assert_eq!(events[0].city.as_deref(), Some("Краматорськ"));
    assert_eq!(events[0].region.as_deref(), Some("Донецька обл."));
}

#[tokio::test]
async fn located_ballistic_without_region_is_dropped() {
    let mut p = pipeline();
    let events = p.process(&message(1, "Загроза балістики!\n2 на Небувалівку")).await;

    assert!(events.iter().all(|e| e.city.is_none() || e.region.is_some()));
    assert!(events.iter().all(|e| e.city.as_deref() != Some("Небувалівка")));
}

#[tokio::test]
async fn unresolvable_settlement_is_dropped() {
    let mut p = pipeline();
    assert!(p.process(&message(1, "Шахеди на Небувалівку")).await.is_empty());
}

#[tokio::test]
async fn oracle_items_must_be_grounded() {
    let oracle = ScriptedOracle {
        items: vec![
            oracle_item("Небувалівка", "Полтавська обл.", "Drone"),
            oracle_item("Вигаданськ", "Полтавська обл.", "Drone"),
        ],
    };
    let (p, _) = pipeline_with_provider("Небувалівка");
    let mut p = p.with_oracle(Arc::new(oracle));

    let events = p.process(&message(1, "Небувалівка, будьте обережні сьогодні вночі")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].city.as_deref(), Some("Небувалівка"));
    assert_eq!(events[0].region.as_deref(), Some("Полтавська обл."));
    assert_eq!(events[0].confidence, 0.7);
    assert_eq!(p.stats().oracle_calls, 1);
}

#[tokio::test]
async fn oracle_region_absent_from_the_text_is_not_trusted() {
    let oracle = ScriptedOracle {
        items: vec![oracle_item("Небувалівка", "Сумська обл.", "Drone")],
    };
    let (p, calls) = pipeline_with_provider("Небувалівка");
    let mut p = p.with_oracle(Arc::new(oracle));

    let events = p.process(&message(1, "Небувалівка, будьте обережні сьогодні вночі")).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].region.as_deref(), Some("Полтавська обл."));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn oracle_unknown_type_is_not_broadcast() {
    let oracle = ScriptedOracle {
        items: vec![oracle_item("Суми", "Сумська обл.", "unknown")],
    };
    let mut p = pipeline().with_oracle(Arc::new(oracle));

    assert!(p.process(&message(1, "Суми, будьте обережні сьогодні вночі")).await.is_empty());
    assert_eq!(p.stats().oracle_calls, 1);
}

#[tokio::test]
async fn short_messages_never_reach_the_oracle() {
    let oracle = ScriptedOracle {
        items: vec![oracle_item("Суми", "Сумська обл.", "Drone")],
    };
    let mut p = pipeline().with_oracle(Arc::new(oracle));

    assert!(p.process(&message(1, "Суми, увага")).await.is_empty());
    assert_eq!(p.stats().oracle_calls, 0);
}

// ── Delivery ──

#[tokio::test]
async fn attachment_goes_with_the_first_alert_only() {
    let mut p = pipeline();
    let sink = RecordingSink::default();
    let mut msg = message(1, "3 шахеди на Суми, Конотоп");
    msg.attachment = Some(Attachment {
        source_chat: "@test_channel".into(),
        message_id: 42,
    });

    let delivered = p.dispatch(&msg, &sink).await;
    assert_eq!(delivered, 2);

    let sent = sink.sent.lock().unwrap();
    assert_eq!(sent[0].0, "БПЛА Суми (Сумська обл.)");
    assert_eq!(sent[1].0, "БПЛА Конотоп (Сумська обл.)");
    assert!(sent[0].1.is_some());
    assert!(sent[1].1.is_none());
    assert_eq!(p.stats().events_sent, 2);
}

#[tokio::test]
async fn stats_count_every_message() {
    let mut p = pipeline();
    let sink = RecordingSink::default();
    p.dispatch(&message(1, "Київ - вибухи"), &sink).await;
    p.dispatch(&message(2, "Доброго ранку"), &sink).await;

    let stats = p.stats();
    assert_eq!(stats.messages, 2);
    assert_eq!(stats.events_parsed, 1);
    assert_eq!(stats.events_sent, 1);
    assert!(stats.to_string().contains("messages=2"));
}
