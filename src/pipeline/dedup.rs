use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// TTL-windowed at-most-once filter.  Expired entries are swept lazily on
/// every access; there is no background timer.
///
/// The clock is the message timestamp, not the wall clock, so a replay at
/// any speed sees the same windows as the live feed did.
pub struct DedupCache {
    ttl: Duration,
    entries: HashMap<String, DateTime<Utc>>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Returns `true` when `key` was seen within the window ending at `at`.
    /// A new key is recorded at `at`; a duplicate does not refresh it.
    pub fn check_and_add(&mut self, key: &str, at: DateTime<Utc>) -> bool {
        let ttl = self.ttl;
        self.entries
            .retain(|_, seen| !(at - *seen).to_std().is_ok_and(|age| age >= ttl));

        if self.entries.contains_key(key) {
            return true;
        }
        self.entries.insert(key.to_string(), at);
        false
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 21, 0, 0).unwrap()
    }

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn duplicate_inside_window_then_new_after_expiry() {
        let mut cache = DedupCache::new(Duration::from_secs(300));

        assert!(!cache.check_and_add("харків_Drone", t0()));
        assert!(cache.check_and_add("харків_Drone", t0() + secs(299)));
        assert!(!cache.check_and_add("харків_Drone", t0() + secs(300)));
    }

    #[test]
    fn duplicates_do_not_extend_the_window() {
        let mut cache = DedupCache::new(Duration::from_secs(10));

        assert!(!cache.check_and_add("k", t0()));
        assert!(cache.check_and_add("k", t0() + secs(9)));
        assert!(!cache.check_and_add("k", t0() + secs(11)));
    }

    #[test]
    fn keys_are_independent_and_swept_lazily() {
        let mut cache = DedupCache::new(Duration::from_secs(60));

        assert!(!cache.check_and_add("суми_Drone", t0()));
        assert!(!cache.check_and_add("суми_Rocket", t0()));
        assert_eq!(cache.len(), 2);

        assert!(!cache.check_and_add("київ_Drone", t0() + secs(61)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn slightly_out_of_order_message_is_still_a_duplicate() {
        let mut cache = DedupCache::new(Duration::from_secs(60));

        assert!(!cache.check_and_add("суми_Drone", t0()));
        assert!(cache.check_and_add("суми_Drone", t0() - secs(5)));
    }
}
