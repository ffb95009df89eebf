//! Settlement → region resolution.
//!
//! Sources are consulted cheapest first and the first answer wins:
//!
//! 1. the static dictionary
//! 2. the persistent geocode cache (a negative entry ends the search)
//! 3. the HTTP geocoder chain, in configured order
//! 4. the optional language-model oracle
//!
//! Every answer is checked against the gazetteer before it is believed, and
//! every outcome is written back to the cache.  A provider that fails counts
//! as having nothing.

pub mod cache;
pub mod providers;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::pipeline::Oracle;
use crate::pipeline::gazetteer::{Gazetteer, fold};
use crate::pipeline::morphology::normalize_city;

use cache::{CacheLookup, FileStorage, GeocodeCache};
use providers::{GeoHit, GeoProvider, PlaceLevel, ProviderError};

/// Slack on top of the per-request HTTP timeout before a call is abandoned.
const CALL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub dictionary_hits: u64,
    pub cache_hits: u64,
    pub negative_hits: u64,
    pub provider_calls: u64,
    pub oracle_calls: u64,
    pub misses: u64,
}

impl fmt::Display for ResolverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dict={} cache={} negative={} provider_calls={} oracle_calls={} misses={}",
            self.dictionary_hits,
            self.cache_hits,
            self.negative_hits,
            self.provider_calls,
            self.oracle_calls,
            self.misses,
        )
    }
}

struct ProviderSlot {
    provider: Box<dyn GeoProvider>,
    /// Set once the provider reports an exhausted quota.
    disabled: bool,
}

pub struct RegionResolver {
    gazetteer: Arc<Gazetteer>,
    cache: GeocodeCache,
    providers: Vec<ProviderSlot>,
    oracle: Option<Arc<dyn Oracle>>,
    call_budget: Duration,
    stats: ResolverStats,
}

impl RegionResolver {
    pub fn new(gazetteer: Arc<Gazetteer>, cache: GeocodeCache) -> Self {
        Self {
            gazetteer,
            cache,
            providers: Vec::new(),
            oracle: None,
            call_budget: Duration::from_millis(4000) + CALL_GRACE,
            stats: ResolverStats::default(),
        }
    }

    /// Resolver over the on-disk cache and the configured geocoder chain.
    ///
    /// | Env var               | Default  | Description                         |
    /// |-----------------------|----------|-------------------------------------|
    /// | `PERSISTENT_DATA_DIR` | `./data` | Directory holding the cache files   |
    ///
    /// Provider variables are listed on [`providers::providers_from_env`].
    pub fn from_env(gazetteer: Arc<Gazetteer>, oracle: Option<Arc<dyn Oracle>>) -> Self {
        let dir = std::env::var("PERSISTENT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        info!("Geocode cache directory: {}", dir.display());

        let cache = GeocodeCache::load(Box::new(FileStorage::new(dir)));
        let mut resolver = Self::new(gazetteer, cache)
            .with_call_budget(providers::geocoder_timeout_from_env() + CALL_GRACE);
        for provider in providers::providers_from_env() {
            resolver = resolver.with_provider(provider);
        }
        match oracle {
            Some(oracle) => resolver.with_oracle(oracle),
            None => resolver,
        }
    }

    pub fn with_provider(mut self, provider: Box<dyn GeoProvider>) -> Self {
        self.providers.push(ProviderSlot {
            provider,
            disabled: false,
        });
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Hard ceiling on one provider call, whatever the provider does.
    pub fn with_call_budget(mut self, budget: Duration) -> Self {
        self.call_budget = budget;
        self
    }

    pub fn stats(&self) -> ResolverStats {
        self.stats
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    /// `<folded city>` or `<folded city>|<region root>` when the hint is a
    /// known region.
    pub fn cache_key(&self, city: &str, region_hint: Option<&str>) -> String {
        let city = fold(city.trim());
        match region_hint
            .and_then(|h| self.gazetteer.canonical_region(h))
            .and_then(|r| self.gazetteer.region_root(r))
        {
            Some(root) => format!("{city}|{root}"),
            None => city,
        }
    }

    /// Canonical region of `city`, or `None` when no source knows it.
    pub async fn resolve(&mut self, city: &str, region_hint: Option<&str>) -> Option<String> {
        let hint = region_hint
            .and_then(|h| self.gazetteer.canonical_region(h))
            .map(str::to_string);
        let key = self.cache_key(city, hint.as_deref());

        if let Some(region) = self.gazetteer.region_of_city(city).map(str::to_string) {
            self.stats.dictionary_hits += 1;
            if self.cache.get(&key).is_none() {
                self.cache.put_found(&key, &region, None);
            }
            return Some(region);
        }

        match self.cache.get(&key) {
            Some(CacheLookup::Found(region)) => {
                self.stats.cache_hits += 1;
                debug!("cache hit {key} → {region}");
                return Some(region);
            }
            Some(CacheLookup::NotFound) => {
                self.stats.negative_hits += 1;
                debug!("negative cache hit {key}");
                return None;
            }
            None => {}
        }

        if let Some((region, coordinates)) = self.ask_providers(city, hint.as_deref()).await {
            self.cache.put_found(&key, &region, Some(coordinates));
            return Some(region);
        }

        if let Some(region) = self.ask_oracle(city, hint.as_deref()).await {
            self.cache.put_found(&key, &region, None);
            return Some(region);
        }

        self.stats.misses += 1;
        debug!("no region for {city}; caching negative");
        self.cache.put_not_found(&key);
        None
    }

    async fn ask_providers(&mut self, city: &str, hint: Option<&str>) -> Option<(String, (f64, f64))> {
        for idx in 0..self.providers.len() {
            if self.providers[idx].disabled {
                continue;
            }
            self.stats.provider_calls += 1;
            let slot = &self.providers[idx];
            let name = slot.provider.name();

            let result = match tokio::time::timeout(self.call_budget, slot.provider.lookup(city, hint)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout),
            };

            match result {
                Ok(hits) => {
                    if let Some(found) = hits.iter().find_map(|hit| self.accept(hit, city, hint)) {
                        info!("{name}: {city} → {}", found.0);
                        return Some(found);
                    }
                    debug!("{name}: no acceptable hit for {city} ({} raw)", hits.len());
                }
                Err(ProviderError::QuotaExceeded) => {
                    warn!("{name}: quota exceeded, disabling until restart");
                    self.providers[idx].disabled = true;
                }
                Err(e) => {
                    warn!("{name}: lookup for {city} failed: {e}");
                }
            }
        }
        None
    }

    /// Region and coordinates of a hit that passes every check.
    fn accept(&self, hit: &GeoHit, city: &str, hint: Option<&str>) -> Option<(String, (f64, f64))> {
        if hit
            .country_code
            .as_deref()
            .is_some_and(|cc| !cc.eq_ignore_ascii_case("ua"))
        {
            return None;
        }
        if hit.level != PlaceLevel::Settlement || !names_match(city, &hit.name) {
            return None;
        }
        if let Some(bounds) = hint.and_then(|h| self.gazetteer.bounds(h)) {
            if !bounds.contains(hit.lat, hit.lon) {
                debug!("{} at ({}, {}) lies outside {hint:?}", hit.name, hit.lat, hit.lon);
                return None;
            }
        }
        let region = self.gazetteer.canonical_region(hit.region.as_deref()?)?;
        Some((region.to_string(), (hit.lat, hit.lon)))
    }

    async fn ask_oracle(&mut self, city: &str, hint: Option<&str>) -> Option<String> {
        let oracle = self.oracle.clone()?;
        self.stats.oracle_calls += 1;
        let answer = oracle.ask_region(city, hint).await?;
        match self.gazetteer.canonical_region(&answer) {
            Some(region) => {
                info!("oracle: {city} → {region}");
                Some(region.to_string())
            }
            None => {
                debug!("oracle answer {answer:?} for {city} is not a region");
                None
            }
        }
    }
}

/// Same settlement modulo case, inflection and a couple of trailing letters.
fn names_match(city: &str, candidate: &str) -> bool {
    let a = fold(city.trim());
    let b = fold(&normalize_city(candidate));
    if a == b {
        return true;
    }
    let common = a.chars().zip(b.chars()).take_while(|(x, y)| x == y).count();
    let shorter = a.chars().count().min(b.chars().count());
    common >= 4 && common + 2 >= shorter
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cache::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Script {
        Hits(Vec<GeoHit>),
        Quota,
        Down,
    }

    struct MockProvider {
        name: &'static str,
        script: Script,
        calls: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn boxed(name: &'static str, script: Script) -> (Box<dyn GeoProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let provider = Self {
                name,
                script,
                calls: Arc::clone(&calls),
            };
            (Box::new(provider), calls)
        }
    }

    #[async_trait]
    impl GeoProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn lookup(&self, _city: &str, _hint: Option<&str>) -> Result<Vec<GeoHit>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Hits(hits) => Ok(hits.clone()),
                Script::Quota => Err(ProviderError::QuotaExceeded),
                Script::Down => Err(ProviderError::Transport("connection refused".into())),
            }
        }
    }

    struct ScriptedOracle(Option<&'static str>);

    #[async_trait]
    impl Oracle for ScriptedOracle {
        async fn ask_region(&self, _city: &str, _hint: Option<&str>) -> Option<String> {
            self.0.map(str::to_string)
        }

        async fn ask_parse(&self, _text: &str) -> Vec<crate::pipeline::OracleEvent> {
            Vec::new()
        }
    }

    fn hit(name: &str, region: &str, level: PlaceLevel, lat: f64, lon: f64) -> GeoHit {
        GeoHit {
            name: name.into(),
            region: Some(region.into()),
            country_code: Some("ua".into()),
            level,
            lat,
            lon,
        }
    }

    fn resolver(storage: &MemoryStorage) -> RegionResolver {
        RegionResolver::new(
            Arc::new(Gazetteer::ukraine()),
            GeocodeCache::load(Box::new(storage.clone())),
        )
    }

    #[tokio::test]
    async fn dictionary_answers_without_network() {
        let (provider, calls) = MockProvider::boxed("mock", Script::Hits(vec![]));
        let mut r = resolver(&MemoryStorage::default()).with_provider(provider);

        assert_eq!(r.resolve("Богодухів", None).await.as_deref(), Some("Харківська обл."));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(r.stats().dictionary_hits, 1);
    }

    #[tokio::test]
    async fn provider_answer_is_cached() {
        let hits = vec![hit("Небувалівка", "Полтавська область", PlaceLevel::Settlement, 49.5, 34.0)];
        let (provider, calls) = MockProvider::boxed("mock", Script::Hits(hits));
        let storage = MemoryStorage::default();
        let mut r = resolver(&storage).with_provider(provider);

        assert_eq!(r.resolve("Небувалівка", None).await.as_deref(), Some("Полтавська обл."));
        assert_eq!(r.resolve("Небувалівка", None).await.as_deref(), Some("Полтавська обл."));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.stats().cache_hits, 1);

        let saved = storage.saved().unwrap();
        assert_eq!(saved.positive["небувалівка"].coordinates, Some((49.5, 34.0)));
    }

    #[tokio::test]
    async fn negative_entry_short_circuits() {
        let (provider, calls) = MockProvider::boxed("mock", Script::Hits(vec![]));
        let mut r = resolver(&MemoryStorage::default()).with_provider(provider);

        assert_eq!(r.resolve("Атлантида", None).await, None);
        assert_eq!(r.resolve("Атлантида", None).await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(r.stats().negative_hits, 1);
    }

    #[tokio::test]
    async fn exhausted_quota_disables_the_provider() {
        let (quota, quota_calls) = MockProvider::boxed("quota", Script::Quota);
        let hits = vec![
            hit("Небувалівка", "Полтавська область", PlaceLevel::Settlement, 49.5, 34.0),
            hit("Іншеселище", "Полтавська область", PlaceLevel::Settlement, 49.6, 34.1),
        ];
        let (backup, backup_calls) = MockProvider::boxed("backup", Script::Hits(hits));
        let mut r = resolver(&MemoryStorage::default())
            .with_provider(quota)
            .with_provider(backup);

        assert_eq!(r.resolve("Небувалівка", None).await.as_deref(), Some("Полтавська обл."));
        assert_eq!(r.resolve("Іншеселище", None).await.as_deref(), Some("Полтавська обл."));
        assert_eq!(quota_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backup_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_provider_counts_as_no_answer() {
        let (provider, calls) = MockProvider::boxed("down", Script::Down);
        let mut r = resolver(&MemoryStorage::default()).with_provider(provider);

        assert_eq!(r.resolve("Атлантида", None).await, None);
        assert_eq!(r.cache().get("атлантида"), Some(CacheLookup::NotFound));
        assert_eq!(r.resolve("Атлантида", None).await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hits_outside_the_hinted_region_are_rejected() {
        // Lviv-area coordinates for a Sumy-hinted query.
        let hits = vec![hit("Небувалівка", "Сумська область", PlaceLevel::Settlement, 49.8, 24.0)];
        let (provider, _) = MockProvider::boxed("mock", Script::Hits(hits));
        let mut r = resolver(&MemoryStorage::default()).with_provider(provider);

        assert_eq!(r.resolve("Небувалівка", Some("Сумщина")).await, None);
        assert_eq!(r.cache().get("небувалівка|сумськ"), Some(CacheLookup::NotFound));
    }

    #[tokio::test]
    async fn non_settlements_and_foreign_hits_are_rejected() {
        let mut foreign = hit("Небувалівка", "Брянська область", PlaceLevel::Settlement, 52.0, 33.0);
        foreign.country_code = Some("ru".into());
        let hits = vec![
            hit("Небувалівка", "Полтавська область", PlaceLevel::District, 49.5, 34.0),
            foreign,
            hit("Зовсімінше", "Полтавська область", PlaceLevel::Settlement, 49.5, 34.0),
        ];
        let (provider, _) = MockProvider::boxed("mock", Script::Hits(hits));
        let mut r = resolver(&MemoryStorage::default()).with_provider(provider);

        assert_eq!(r.resolve("Небувалівка", None).await, None);
    }

    #[tokio::test]
    async fn oracle_is_the_last_resort() {
        let (provider, _) = MockProvider::boxed("mock", Script::Hits(vec![]));
        let mut r = resolver(&MemoryStorage::default())
            .with_provider(provider)
            .with_oracle(Arc::new(ScriptedOracle(Some("Харківщина"))));

        assert_eq!(r.resolve("Небувалівка", None).await.as_deref(), Some("Харківська обл."));
        assert_eq!(r.stats().oracle_calls, 1);

        let mut r = resolver(&MemoryStorage::default()).with_oracle(Arc::new(ScriptedOracle(Some("Марс"))));
        assert_eq!(r.resolve("Небувалівка", None).await, None);
    }

    #[test]
    fn cache_key_includes_the_region_root() {
        let r = resolver(&MemoryStorage::default());
        assert_eq!(r.cache_key("Богодухів", Some("Харківщина")), "богодухів|харківськ");
        assert_eq!(r.cache_key("Богодухів", Some("Марс")), "богодухів");
        assert_eq!(r.cache_key("Богодухів", None), "богодухів");
    }

    #[test]
    fn name_matching_tolerates_inflection() {
        assert!(names_match("Полтава", "Полтаву"));
        assert!(names_match("Небувалівка", "Небувалівка"));
        assert!(!names_match("Суми", "Сумівка"));
        assert!(!names_match("Небувалівка", "Зовсімінше"));
    }
}
