//! Message-level threat routing.
//!
//! Levels are tried in strict priority order and the first level that
//! yields events claims the message:
//!
//! 1. ballistic all-clear
//! 2. guided bombs
//! 3. rockets / ballistic
//! 4. explosions
//! 5. drones (launch sites, reconnaissance, plain drones)
//!
//! Inside a level the rules are ordered most specific first.  A rule whose
//! trigger matches but which produces nothing falls through to the next one.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::pipeline::event::{Event, ExtractedEntity};
use crate::pipeline::extract::EntityExtractor;
use crate::pipeline::gazetteer::{FOREIGN_TERRITORY, Gazetteer, fold};
use crate::pipeline::patterns::PATTERNS;
use crate::pipeline::threat_kind::ThreatKind;

const LAUNCH_CONFIDENCE: f32 = 0.8;

/// Per-message facts every emitted event carries.
pub struct MessageContext {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub raw_text: Arc<str>,
}

#[derive(Clone, Copy)]
enum Yield {
    /// One event per settlement in every match's `city` group.
    Captured,
    /// Trigger only; settlements come from the line extractor.
    Lines,
    /// Single area-wide event without a location.
    Bare,
    /// Launch sites from `з <place>` and `+ <place>` lines.
    Launch,
}

struct MessageRule {
    name: &'static str,
    kind: ThreatKind,
    confidence: f32,
    /// `None` always fires.
    trigger: Option<&'static Regex>,
    yields: Yield,
}

struct Level {
    name: &'static str,
    rules: Vec<MessageRule>,
}

fn rule(
    name: &'static str,
    kind: ThreatKind,
    confidence: f32,
    trigger: Option<&'static Regex>,
    yields: Yield,
) -> MessageRule {
    MessageRule {
        name,
        kind,
        confidence,
        trigger,
        yields,
    }
}

static LEVELS: LazyLock<Vec<Level>> = LazyLock::new(|| {
    use ThreatKind::*;
    let p = &*PATTERNS;
    vec![
        Level {
            name: "ballistic_clear",
            rules: vec![rule("ballistic_clear", BallisticClear, 1.0, Some(&p.ballistic_clear), Yield::Bare)],
        },
        Level {
            name: "guided_bomb",
            rules: vec![
                rule("zagroza_kab", GuidedBomb, 0.9, Some(&p.kab.for_city), Yield::Captured),
                rule("aviatsiya_kab", GuidedBomb, 0.85, Some(&p.kab.aviation), Yield::Captured),
                rule("kab_rayon", GuidedBomb, 0.8, Some(&p.kab.near), Yield::Captured),
                rule("kab_lines", GuidedBomb, 0.0, Some(&p.kab.context), Yield::Lines),
            ],
        },
        Level {
            name: "rocket",
            rules: vec![
                rule("grupa_kr", Rocket, 0.85, Some(&p.rocket.grupa_kr), Yield::Captured),
                rule("raketa_kursom", Rocket, 0.85, Some(&p.rocket.raketa_kursom), Yield::Captured),
                rule("ballistika_na", Rocket, 0.85, Some(&p.rocket.ballistika_na), Yield::Captured),
                rule("vysokoshvydkisni", Rocket, 0.85, Some(&p.rocket.high_speed), Yield::Captured),
                rule("ballistic_lines", BallisticThreat, 0.0, Some(&p.rocket.ballistic), Yield::Lines),
                rule("rocket_lines", Rocket, 0.0, Some(&p.rocket.context), Yield::Lines),
                rule("ballistic_global", BallisticThreat, 0.9, Some(&p.rocket.ballistic_global), Yield::Bare),
            ],
        },
        Level {
            name: "explosion",
            rules: vec![
                rule("explosion_media", Explosion, 0.95, Some(&p.explosion.media), Yield::Captured),
                rule("explosion_dash", Explosion, 0.85, Some(&p.explosion.dash), Yield::Captured),
                rule("explosion_in_city", Explosion, 0.85, Some(&p.explosion.in_city), Yield::Captured),
                rule("zagroza_obstrilu", Explosion, 0.9, Some(&p.explosion.shelling), Yield::Captured),
                rule("explosion_lines", Explosion, 0.0, Some(&p.explosion.context), Yield::Lines),
            ],
        },
        Level {
            name: "drone",
            rules: vec![
                rule("launch", Launch, LAUNCH_CONFIDENCE, Some(&p.drone.launch), Yield::Launch),
                rule("recon_lines", Reconnaissance, 0.0, Some(&p.drone.recon), Yield::Lines),
                rule("drone_lines", Drone, 0.0, None, Yield::Lines),
            ],
        },
    ]
});

pub struct ThreatRouter<'g> {
    extractor: EntityExtractor<'g>,
}

impl<'g> ThreatRouter<'g> {
    pub fn new(gazetteer: &'g Gazetteer) -> Self {
        Self {
            extractor: EntityExtractor::new(gazetteer),
        }
    }

    pub fn extractor(&self) -> &EntityExtractor<'g> {
        &self.extractor
    }

    /// Classify normalized `text` and build its events.  Regions may still
    /// be missing; the dispatcher resolves them before validation.
    pub fn route(&self, text: &str, ctx: &MessageContext) -> Vec<Event> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        // The line cascade is shared by every `Lines` rule of the message.
        let mut lines: Option<Vec<ExtractedEntity>> = None;

        for level in LEVELS.iter() {
            for rule in &level.rules {
                if rule.trigger.is_some_and(|t| !t.is_match(text)) {
                    continue;
                }
                let events = self.apply(rule, text, ctx, &mut lines);
                if !events.is_empty() {
                    debug!(level = level.name, rule = rule.name, events = events.len(), "routed");
                    return events;
                }
            }
        }
        Vec::new()
    }

    fn apply(
        &self,
        rule: &MessageRule,
        text: &str,
        ctx: &MessageContext,
        lines: &mut Option<Vec<ExtractedEntity>>,
    ) -> Vec<Event> {
        let event = |kind, entity| {
            Event::from_entity(kind, entity, ctx.source.as_str(), ctx.timestamp, Arc::clone(&ctx.raw_text))
        };

        match rule.yields {
            Yield::Bare => vec![
                Event::new(rule.kind, ctx.source.as_str(), ctx.timestamp, Arc::clone(&ctx.raw_text))
                    .with_confidence(rule.confidence),
            ],

            Yield::Lines => lines
                .get_or_insert_with(|| self.extractor.extract(text, &ctx.source))
                .iter()
                .cloned()
                .map(|entity| event(rule.kind, entity))
                .collect(),

            Yield::Captured => self
                .captured(rule, text)
                .into_iter()
                .map(|entity| event(rule.kind, entity))
                .collect(),

            Yield::Launch => self
                .launch_sites(text)
                .into_iter()
                .map(|city| {
                    event(
                        rule.kind,
                        ExtractedEntity {
                            city,
                            region: Some(FOREIGN_TERRITORY.to_string()),
                            count: None,
                            confidence: rule.confidence,
                            rule: rule.name,
                        },
                    )
                })
                .collect(),
        }
    }

    fn captured(&self, rule: &MessageRule, text: &str) -> Vec<ExtractedEntity> {
        let Some(pattern) = rule.trigger else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for caps in pattern.captures_iter(text) {
            let region = match caps.name("region") {
                Some(raw) => match self.extractor.canonical_region(raw.as_str()) {
                    Some(region) => Some(region.to_string()),
                    None => continue,
                },
                None => None,
            };
            let count = caps
                .name("count")
                .and_then(|m| m.as_str().parse().ok())
                .filter(|n: &u32| *n > 0);
            for city in self.extractor.city_list(&caps["city"]) {
                out.push(ExtractedEntity {
                    city,
                    region: region.clone(),
                    count,
                    confidence: rule.confidence,
                    rule: rule.name,
                });
            }
        }
        out
    }

    /// Distinct launch locations, case-insensitively, in order of mention.
    fn launch_sites(&self, text: &str) -> Vec<String> {
        let drone = &PATTERNS.drone;
        let mut seen = HashSet::new();
        drone
            .launch_origin
            .captures_iter(text)
            .chain(drone.launch_plus.captures_iter(text))
            .flat_map(|caps| self.extractor.city_list(&caps["city"]))
            .filter(|city| seen.insert(fold(city)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn route(text: &str) -> Vec<Event> {
        let gaz = Gazetteer::ukraine();
        let router = ThreatRouter::new(&gaz);
        let ctx = MessageContext {
            source: "test".into(),
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 21, 0, 0).unwrap(),
            raw_text: Arc::from(text),
        };
        router.route(text, &ctx)
    }

    fn summary(events: &[Event]) -> Vec<(ThreatKind, Option<&str>)> {
        events.iter().map(|e| (e.kind, e.city.as_deref())).collect()
    }

    #[test]
    fn ballistic_clear_wins_over_everything() {
        let events = route("Відбій загрози балістики. Шахеди на Суми");
        assert_eq!(summary(&events), [(ThreatKind::BallisticClear, None)]);
    }

    #[test]
    fn explosion_dash_form() {
        let events = route("Київ - вибухи");
        assert_eq!(summary(&events), [(ThreatKind::Explosion, Some("Київ"))]);
        assert_eq!(events[0].confidence, 0.85);
    }

    #[test]
    fn explosion_media_form_carries_region() {
        let events = route("Харків (Харківська обл.) ЗМІ повідомляють про вибухи");
        assert_eq!(summary(&events), [(ThreatKind::Explosion, Some("Харків"))]);
        assert_eq!(events[0].region.as_deref(), Some("Харківська обл."));
        assert_eq!(events[0].confidence, 0.95);
    }

    #[test]
    fn guided_bomb_outranks_explosion() {
        let events = route("Загроза КАБ для Золочева. Вибухи в Харкові");
        assert!(events.iter().all(|e| e.kind == ThreatKind::GuidedBomb));
        assert_eq!(events[0].city.as_deref(), Some("Золочів"));
    }

    #[test]
    fn rocket_course() {
        let events = route("2 ракети курсом на Кривий Ріг");
        assert_eq!(summary(&events), [(ThreatKind::Rocket, Some("Кривий Ріг"))]);
        assert_eq!(events[0].count, Some(2));
    }

    #[test]
    fn ballistic_without_location_is_area_wide() {
        let events = route("Загроза балістики з півночі!");
        assert_eq!(summary(&events), [(ThreatKind::BallisticThreat, None)]);
    }

    #[test]
    fn drones_are_the_default() {
        let events = route("Харківщина:\n▪️2 на Богодухів");
        assert_eq!(summary(&events), [(ThreatKind::Drone, Some("Богодухів"))]);
        assert_eq!(events[0].region.as_deref(), Some("Харківська обл."));
    }

    #[test]
    fn reconnaissance_vocabulary() {
        let events = route("Розвідувальний БПЛА Орлан курсом на Суми");
        assert_eq!(summary(&events), [(ThreatKind::Reconnaissance, Some("Суми"))]);
    }

    #[test]
    fn launch_sites_are_foreign_and_distinct() {
        let events = route("Пуски ударних БпЛА з Курська\n+ Навлі\n+ НАВЛІ\n+ Орла");
        assert_eq!(
            summary(&events),
            [
                (ThreatKind::Launch, Some("Курськ")),
                (ThreatKind::Launch, Some("Навля")),
                (ThreatKind::Launch, Some("Орел")),
            ]
        );
        assert!(events.iter().all(|e| e.region.as_deref() == Some("РФ") && e.confidence == 0.8));
    }

    #[test]
    fn unmatched_text_yields_nothing() {
        assert!(route("Доброго ранку").is_empty());
        assert!(route("БПЛА над містом").is_empty());
        assert!(route("").is_empty());
    }
}
