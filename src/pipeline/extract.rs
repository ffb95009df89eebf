//! Line-by-line entity extraction.
//!
//! Every line is matched against an ordered cascade of line shapes; the
//! first rule that yields at least one valid settlement wins for that line.
//! The only state carried between lines is the current region, seeded from
//! the channel hint and replaced by region headers.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::debug;

use crate::pipeline::event::ExtractedEntity;
use crate::pipeline::gazetteer::{Gazetteer, fold};
use crate::pipeline::morphology::normalize_city;
use crate::pipeline::patterns::PATTERNS;

/// Upper bound on settlements taken from one "Особлива увага" block.
const MAX_ATTENTION_ITEMS: usize = 80;
const ATTENTION_CONFIDENCE: f32 = 0.7;

static RE_LIST_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[,/;]\s*|\s+(?:та|і|й)\s+").unwrap());

/// Stems of compass directions (`з півдня`, `північніше`, `схід`).
const DIRECTION_STEMS: &[&str] = &["північ", "півден", "півдн", "схід", "сход", "східн", "захід", "заход", "західн"];

// ───────────────────────────── Rule table ────────────────────────────────

#[derive(Clone, Copy)]
enum Build {
    /// `<city> (<region>)`, every occurrence on the line.
    RegionParens,
    /// `<region>: <rest>`; sets the current region.
    Enumeration,
    /// A phrase ending in a city list; region from context when known.
    Phrasal { fixed_count: Option<u32> },
    /// `→ <city>`; only meaningful under a region header.
    Arrow,
}

struct LineRule {
    name: &'static str,
    confidence: f32,
    pattern: &'static Regex,
    build: Build,
}

static LINE_RULES: LazyLock<Vec<LineRule>> = LazyLock::new(|| {
    let p = &PATTERNS.line;
    let phrasal = Build::Phrasal { fixed_count: None };
    vec![
        rule("city_region_parens", 0.95, &p.city_region_parens, Build::RegionParens),
        rule("city_region_alias_parens", 0.9, &p.city_region_alias_parens, Build::RegionParens),
        rule("region_colon_cities", 0.9, &p.region_colon, Build::Enumeration),
        rule("po_shahedu_na", 0.75, &p.po_shahedu_na, Build::Phrasal { fixed_count: Some(1) }),
        rule("count_threat_na_city", 0.85, &p.count_threat_na_city, phrasal),
        rule("count_na_city", 0.8, &p.count_na_city, phrasal),
        rule("count_city", 0.75, &p.count_city, phrasal),
        rule("kursom_na_city", 0.75, &p.kursom_na_city, phrasal),
        rule("moves_to_city", 0.75, &p.moves_to_city, phrasal),
        rule("grupa_kr", 0.85, &p.grupa_kr, phrasal),
        rule("threat_toward_city", 0.85, &p.threat_toward_city, phrasal),
        rule("count_v_rayoni", 0.8, &p.count_v_rayoni, phrasal),
        rule("threat_bilya", 0.8, &p.threat_bilya, phrasal),
        rule("v_bik", 0.75, &p.v_bik, phrasal),
        rule("v_rayoni", 0.75, &p.v_rayoni, phrasal),
        rule("threat_nad", 0.8, &p.threat_nad, phrasal),
        rule("city_to_you", 0.75, &p.city_to_you, phrasal),
        rule("arrow", 0.8, &p.arrow, Build::Arrow),
    ]
});

fn rule(name: &'static str, confidence: f32, pattern: &'static Regex, build: Build) -> LineRule {
    LineRule {
        name,
        confidence,
        pattern,
        build,
    }
}

/// Index of the first rule tried on the remainder of an inline header.
fn after_enumeration() -> usize {
    LINE_RULES
        .iter()
        .position(|r| matches!(r.build, Build::Enumeration))
        .map_or(0, |i| i + 1)
}

struct LineState {
    current_region: Option<String>,
    /// Remaining item budget while inside a special-attention block.
    attention_left: Option<usize>,
}

// ───────────────────────────── Extractor ─────────────────────────────────

pub struct EntityExtractor<'g> {
    gazetteer: &'g Gazetteer,
}

impl<'g> EntityExtractor<'g> {
    pub fn new(gazetteer: &'g Gazetteer) -> Self {
        Self { gazetteer }
    }

    /// Extract all candidates from normalized `text` posted by `channel`.
    pub fn extract(&self, text: &str, channel: &str) -> Vec<ExtractedEntity> {
        let mut state = LineState {
            current_region: self.gazetteer.channel_region(channel).map(str::to_string),
            attention_left: None,
        };
        let mut out = Vec::new();
        let skip = &PATTERNS.skip;

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                state.attention_left = None;
                continue;
            }
            if skip.alert.is_match(line) || skip.summary.is_match(line) || self.is_region_count(line) {
                debug!("skip line: {line}");
                continue;
            }
            if let Some(region) = self.region_header(line) {
                debug!("region header → {region}");
                state.current_region = Some(region.to_string());
                state.attention_left = None;
                continue;
            }
            if let Some(caps) = PATTERNS.line.special_attention.captures(line) {
                let mut budget = MAX_ATTENTION_ITEMS;
                out.extend(self.attention_items(&caps["rest"], &mut budget));
                state.attention_left = Some(budget);
                continue;
            }
            if let Some(mut budget) = state.attention_left {
                if budget > 0 && PATTERNS.line.name_list.is_match(line) {
                    out.extend(self.attention_items(line, &mut budget));
                    state.attention_left = Some(budget);
                    continue;
                }
                state.attention_left = None;
            }

            if let Some(found) = self.run_cascade(line, &mut state, 0) {
                out.extend(found);
            }
        }
        out
    }

    /// Run the cascade from rule `from`; `Some` when a rule fired.
    fn run_cascade(&self, line: &str, state: &mut LineState, from: usize) -> Option<Vec<ExtractedEntity>> {
        for rule in LINE_RULES.iter().skip(from) {
            if !rule.pattern.is_match(line) {
                continue;
            }
            let found = self.build(rule, line, state);
            if !found.is_empty() {
                debug!(rule = rule.name, count = found.len(), "line matched: {line}");
                return Some(found);
            }
        }
        None
    }

    fn build(&self, rule: &LineRule, line: &str, state: &mut LineState) -> Vec<ExtractedEntity> {
        match rule.build {
            Build::RegionParens => rule
                .pattern
                .captures_iter(line)
                .flat_map(|caps| {
                    let region = self.gazetteer.canonical_region(&caps["region"]).map(str::to_string);
                    match region {
                        Some(region) => self.entities(rule, &caps["city"], Some(region), None),
                        None => Vec::new(),
                    }
                })
                .collect(),

            Build::Enumeration => {
                let Some(caps) = rule.pattern.captures(line) else {
                    return Vec::new();
                };
                let Some(region) = self.gazetteer.canonical_region(&caps["region"]) else {
                    return Vec::new();
                };
                state.current_region = Some(region.to_string());
                let rest = caps["rest"].trim();
                if rest.is_empty() {
                    return Vec::new();
                }
                if let Some(found) = self.run_cascade(rest, state, after_enumeration()) {
                    return found;
                }
                self.entities(rule, rest, Some(region.to_string()), None)
            }

            Build::Phrasal { fixed_count } => rule
                .pattern
                .captures_iter(line)
                .flat_map(|caps| {
                    let count = fixed_count.or_else(|| parse_count(&caps));
                    self.entities(rule, &caps["city"], state.current_region.clone(), count)
                })
                .collect(),

            Build::Arrow => {
                let Some(region) = state.current_region.clone() else {
                    return Vec::new();
                };
                match rule.pattern.captures(line) {
                    Some(caps) => self.entities(rule, &caps["city"], Some(region), None),
                    None => Vec::new(),
                }
            }
        }
    }

    fn entities(
        &self,
        rule: &LineRule,
        list: &str,
        region: Option<String>,
        count: Option<u32>,
    ) -> Vec<ExtractedEntity> {
        self.city_list(list)
            .into_iter()
            .map(|city| ExtractedEntity {
                city,
                region: region.clone(),
                count,
                confidence: rule.confidence,
                rule: rule.name,
            })
            .collect()
    }

    fn attention_items(&self, list: &str, budget: &mut usize) -> Vec<ExtractedEntity> {
        let mut out = Vec::new();
        for city in self.city_list(list) {
            if *budget == 0 {
                break;
            }
            *budget -= 1;
            out.push(ExtractedEntity {
                city,
                region: None,
                count: None,
                confidence: ATTENTION_CONFIDENCE,
                rule: "special_attention",
            });
        }
        out
    }

    /// Canonical form of a region mention.
    pub fn canonical_region(&self, raw: &str) -> Option<&'g str> {
        self.gazetteer.canonical_region(raw)
    }

    /// A line that names a region and nothing else.
    fn region_header(&self, line: &str) -> Option<&'g str> {
        let bare = line.trim_matches(|c: char| !c.is_alphabetic());
        if bare.is_empty() || PATTERNS.line.digits.is_match(bare) {
            return None;
        }
        self.gazetteer.canonical_region(bare)
    }

    /// `<Region> — 5х` recap lines.
    fn is_region_count(&self, line: &str) -> bool {
        PATTERNS
            .skip
            .region_count
            .captures(line)
            .is_some_and(|caps| self.region_header(&caps["region"]).is_some())
    }

    /// Split a city list and clean every item.  A hyphenated pair becomes two
    /// cities only when both halves are known settlements.
    pub fn city_list(&self, raw: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for item in RE_LIST_SEP.split(raw) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let parts: Vec<String> = match self.split_hyphen_pair(item) {
                Some((a, b)) => vec![a, b],
                None => self.clean_city_name(item).into_iter().collect(),
            };
            for city in parts {
                if !out.iter().any(|c| fold(c) == fold(&city)) {
                    out.push(city);
                }
            }
        }
        out
    }

    fn split_hyphen_pair(&self, item: &str) -> Option<(String, String)> {
        let (left, right) = item.split_once('-')?;
        let left = normalize_city(left);
        let right = normalize_city(right);
        if self.gazetteer.is_known_city(&left) && self.gazetteer.is_known_city(&right) {
            Some((self.dictionary_spelling(left), self.dictionary_spelling(right)))
        } else {
            None
        }
    }

    /// Cleaned nominative settlement name, or `None` when the candidate is
    /// not a settlement.
    pub fn clean_city_name(&self, raw: &str) -> Option<String> {
        let line = &PATTERNS.line;
        let without_count = line.leading_count.replace(raw.trim(), "");
        let candidate = line.trailing_clause.replace(&without_count, "");

        let first_letter = candidate.chars().find(|c| c.is_alphabetic())?;
        if !first_letter.is_uppercase() || line.digits.is_match(&candidate) {
            return None;
        }

        let city = normalize_city(&candidate);
        if city.chars().count() < 3 {
            return None;
        }
        let key = fold(&city);
        if self.gazetteer.is_skip_word(&city)
            || DIRECTION_STEMS.iter().any(|s| key.starts_with(s))
            || self.gazetteer.is_region_like(&city)
        {
            return None;
        }
        Some(self.dictionary_spelling(city))
    }

    fn dictionary_spelling(&self, city: String) -> String {
        self.gazetteer
            .canonical_city(&city)
            .map(str::to_string)
            .unwrap_or(city)
    }
}

fn parse_count(caps: &Captures<'_>) -> Option<u32> {
    caps.name("count")
        .and_then(|m| m.as_str().parse().ok())
        .filter(|n| *n > 0)
}
