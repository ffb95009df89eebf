//! Structured alert events, the validity rules they must satisfy before
//! emission, and the outbound text format.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::pipeline::gazetteer::{FOREIGN_TERRITORY, Gazetteer};
use crate::pipeline::threat_kind::ThreatKind;

const EXPLOSION_SUFFIX: &str = "ЗМІ повідомляють про вибухи.";
const GUIDED_BOMB_SUFFIX: &str = "Загроза застосування КАБ.";
const BALLISTIC_CLEAR_TEXT: &str = "Відбій загрози балістики!";
const BALLISTIC_THREAT_TEXT: &str = "Загроза балістики!";

/// One candidate location pulled out of a single line.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub city: String,
    /// Explicit or context region; `None` leaves it to the resolver.
    pub region: Option<String>,
    pub count: Option<u32>,
    pub confidence: f32,
    /// Name of the rule that produced it (diagnostics only).
    pub rule: &'static str,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: ThreatKind,
    pub city: Option<String>,
    pub region: Option<String>,
    pub count: Option<u32>,
    pub source: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
    raw_text: Arc<str>,
}

impl Event {
    pub fn new(kind: ThreatKind, source: impl Into<String>, timestamp: DateTime<Utc>, raw_text: Arc<str>) -> Self {
        Self {
            kind,
            city: None,
            region: None,
            count: None,
            source: source.into(),
            confidence: 1.0,
            timestamp,
            raw_text,
        }
    }

    pub fn from_entity(
        kind: ThreatKind,
        entity: ExtractedEntity,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        raw_text: Arc<str>,
    ) -> Self {
        Self {
            kind,
            city: Some(entity.city),
            region: entity.region,
            count: entity.count,
            source: source.into(),
            confidence: entity.confidence,
            timestamp,
            raw_text,
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Copy with the region replaced; the only enrichment applied between
    /// routing and validation.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Original, uncleaned message text.
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Audit id: first 12 hex chars of SHA-256 over
    /// `type|city|region|YYYYMMDDHHMM`.
    pub fn id(&self) -> String {
        let material = format!(
            "{}|{}|{}|{}",
            self.kind.variant_name(),
            self.city.as_deref().unwrap_or(""),
            self.region.as_deref().unwrap_or(""),
            self.timestamp.format("%Y%m%d%H%M"),
        );
        let digest = Sha256::digest(material.as_bytes());
        hex::encode(digest)[..12].to_string()
    }

    /// Semantic identity used by the long-window dedup cache.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}_{}",
            self.city.as_deref().unwrap_or("").trim().to_lowercase(),
            self.kind.variant_name()
        )
    }

    /// Outbound text.
    pub fn format_message(&self) -> String {
        match (self.kind, self.city.as_deref()) {
            (ThreatKind::BallisticClear, _) => return BALLISTIC_CLEAR_TEXT.to_string(),
            (ThreatKind::BallisticThreat, None) => return BALLISTIC_THREAT_TEXT.to_string(),
            _ => {}
        }

        let mut line = self.kind.label().to_string();
        if let Some(city) = &self.city {
            line.push(' ');
            line.push_str(city);
        }
        if let Some(region) = &self.region {
            line.push_str(&format!(" ({region})"));
        }

        match self.kind {
            ThreatKind::Explosion => format!("{line}\n{EXPLOSION_SUFFIX}"),
            ThreatKind::GuidedBomb => format!("{line}\n{GUIDED_BOMB_SUFFIX}"),
            _ => line,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(id={}, kind={}, city={:?}, region={:?}, count={:?}, conf={:.2}, source={})",
            self.id(),
            self.kind.variant_name(),
            self.city,
            self.region,
            self.count,
            self.confidence,
            self.source,
        )
    }
}

// ───────────────────────────── Validation ────────────────────────────────

/// Rejects events that break the emission invariants.  Rejections are
/// silent apart from a debug line.
pub struct EventValidator<'g> {
    gazetteer: &'g Gazetteer,
}

impl<'g> EventValidator<'g> {
    pub fn new(gazetteer: &'g Gazetteer) -> Self {
        Self { gazetteer }
    }

    pub fn is_valid(&self, event: &Event) -> bool {
        match self.rejection(event) {
            None => true,
            Some(reason) => {
                debug!("Rejected {event}: {reason}");
                false
            }
        }
    }

    pub fn retain_valid(&self, events: Vec<Event>) -> Vec<Event> {
        events.into_iter().filter(|e| self.is_valid(e)).collect()
    }

    fn rejection(&self, event: &Event) -> Option<&'static str> {
        if let Some(region) = event.region.as_deref() {
            let foreign = region == FOREIGN_TERRITORY && event.kind == ThreatKind::Launch;
            if !foreign && !self.gazetteer.is_region(region) {
                return Some("region not canonical");
            }
        }

        if event.kind == ThreatKind::Unknown {
            return Some("unknown threat");
        }

        // A named settlement always needs its region, whatever the kind.
        let Some(city) = event.city.as_deref() else {
            return (!event.kind.is_city_less()).then_some("missing city");
        };
        if event.region.is_none() {
            return Some("missing region");
        }
        if !self.is_settlement_name(city) {
            return Some("city is not a settlement name");
        }
        None
    }

    fn is_settlement_name(&self, city: &str) -> bool {
        let city = city.trim();
        city.chars().count() >= 2
            && city.chars().next().is_some_and(char::is_uppercase)
            && !city.chars().any(|c| c.is_ascii_digit())
            && !self.gazetteer.is_skip_word(city)
            && !self.gazetteer.is_region_like(city)
    }
}
