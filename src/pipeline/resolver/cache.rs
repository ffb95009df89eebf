//! Persistent geocode cache: a positive map `key → {region, coordinates}`
//! and a negative set of keys known to have no answer.  Entries never
//! expire; every mutation is flushed to the storage backend immediately.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const POSITIVE_FILE: &str = "geocode_cache.json";
const NEGATIVE_FILE: &str = "geocode_cache_negative.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRegion {
    pub region: String,
    /// `(lat, lon)` when a geocoder supplied them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub positive: BTreeMap<String, CachedRegion>,
    pub negative: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Found(String),
    NotFound,
}

/// Where the cache lives between runs.
pub trait CacheStorage: Send {
    fn load(&self) -> Result<CacheSnapshot>;
    fn save(&self, snapshot: &CacheSnapshot) -> Result<()>;
}

// ───────────────────────────── Backends ──────────────────────────────────

/// In-process backend.  Clones share state, so a test can keep a handle
/// and inspect what was flushed.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<CacheSnapshot>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStorage {
    pub fn saved(&self) -> Result<CacheSnapshot> {
        self.inner
            .lock()
            .map(|s| s.clone())
            .map_err(|_| anyhow!("memory cache lock poisoned"))
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CacheStorage for MemoryStorage {
    fn load(&self) -> Result<CacheSnapshot> {
        self.saved()
    }

    fn save(&self, snapshot: &CacheSnapshot) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory cache lock poisoned"))?;
        *inner = snapshot.clone();
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Two JSON files under a data directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn positive_path(&self) -> PathBuf {
        self.dir.join(POSITIVE_FILE)
    }

    fn negative_path(&self) -> PathBuf {
        self.dir.join(NEGATIVE_FILE)
    }
}

fn read_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Write through a temp file so a crash never leaves half a cache behind.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

impl CacheStorage for FileStorage {
    fn load(&self) -> Result<CacheSnapshot> {
        let positive: BTreeMap<String, CachedRegion> = read_json(&self.positive_path())?;
        let negative: Vec<String> = read_json(&self.negative_path())?;
        Ok(CacheSnapshot {
            positive,
            negative: negative.into_iter().collect(),
        })
    }

    fn save(&self, snapshot: &CacheSnapshot) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| format!("failed to create {}", self.dir.display()))?;
        write_json(&self.positive_path(), &snapshot.positive)?;
        let negative: Vec<&String> = snapshot.negative.iter().collect();
        write_json(&self.negative_path(), &negative)
    }
}

// ───────────────────────────── Cache ─────────────────────────────────────

pub struct GeocodeCache {
    snapshot: CacheSnapshot,
    storage: Box<dyn CacheStorage>,
}

impl GeocodeCache {
    /// Load from `storage`; an unreadable backend starts empty.
    pub fn load(storage: Box<dyn CacheStorage>) -> Self {
        let snapshot = match storage.load() {
            Ok(s) => {
                info!(
                    "Geocode cache loaded: {} positive, {} negative",
                    s.positive.len(),
                    s.negative.len()
                );
                s
            }
            Err(e) => {
                warn!("Geocode cache load failed, starting empty: {e:#}");
                CacheSnapshot::default()
            }
        };
        Self { snapshot, storage }
    }

    pub fn get(&self, key: &str) -> Option<CacheLookup> {
        if let Some(hit) = self.snapshot.positive.get(key) {
            return Some(CacheLookup::Found(hit.region.clone()));
        }
        self.snapshot
            .negative
            .contains(key)
            .then_some(CacheLookup::NotFound)
    }

    pub fn put_found(&mut self, key: &str, region: &str, coordinates: Option<(f64, f64)>) {
        self.snapshot.negative.remove(key);
        self.snapshot.positive.insert(
            key.to_string(),
            CachedRegion {
                region: region.to_string(),
                coordinates,
            },
        );
        self.flush();
    }

    pub fn put_not_found(&mut self, key: &str) {
        self.snapshot.positive.remove(key);
        self.snapshot.negative.insert(key.to_string());
        self.flush();
    }

    /// Persist the current state; failures are logged, never raised.
    pub fn flush(&self) {
        match self.storage.save(&self.snapshot) {
            Ok(()) => debug!("Geocode cache flushed"),
            Err(e) => warn!("Geocode cache flush failed: {e:#}"),
        }
    }

    pub fn positive_len(&self) -> usize {
        self.snapshot.positive.len()
    }

    pub fn negative_len(&self) -> usize {
        self.snapshot.negative.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_and_negative_entries_exclude_each_other() {
        let storage = MemoryStorage::default();
        let mut cache = GeocodeCache::load(Box::new(storage.clone()));

        cache.put_not_found("атлантида");
        assert_eq!(cache.get("атлантида"), Some(CacheLookup::NotFound));

        cache.put_found("атлантида", "Сумська обл.", None);
        assert_eq!(cache.get("атлантида"), Some(CacheLookup::Found("Сумська обл.".into())));
        assert_eq!(cache.negative_len(), 0);
        assert_eq!(cache.get("інше"), None);
    }

    #[test]
    fn every_mutation_is_flushed() {
        let storage = MemoryStorage::default();
        let mut cache = GeocodeCache::load(Box::new(storage.clone()));
        cache.put_found("суми", "Сумська обл.", Some((50.9, 34.8)));
        cache.put_not_found("хххх");

        assert_eq!(storage.save_count(), 2);
        let saved = storage.saved().unwrap();
        assert_eq!(saved.positive["суми"].coordinates, Some((50.9, 34.8)));
        assert!(saved.negative.contains("хххх"));
    }

    #[test]
    fn file_storage_round_trips_both_files() {
        let dir = std::env::temp_dir().join(format!("alert_relay_cache_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        {
            let mut cache = GeocodeCache::load(Box::new(FileStorage::new(&dir)));
            cache.put_found("богодухів|харківськ", "Харківська обл.", None);
            cache.put_not_found("небувалівка");
        }

        assert!(dir.join(POSITIVE_FILE).exists());
        assert!(dir.join(NEGATIVE_FILE).exists());

        let reloaded = GeocodeCache::load(Box::new(FileStorage::new(&dir)));
        assert_eq!(
            reloaded.get("богодухів|харківськ"),
            Some(CacheLookup::Found("Харківська обл.".into()))
        );
        assert_eq!(reloaded.get("небувалівка"), Some(CacheLookup::NotFound));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = std::env::temp_dir().join(format!("alert_relay_cache_bad_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(POSITIVE_FILE), "{not json").unwrap();

        let cache = GeocodeCache::load(Box::new(FileStorage::new(&dir)));
        assert_eq!(cache.positive_len(), 0);

        let _ = fs::remove_dir_all(&dir);
    }
}
