//! In-process response cache for the business-logic tier.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sim::Clock;

/// A cached value and when it was stored.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
}

/// Why a lookup missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    Absent,
    Expired,
    Disabled,
}

impl MissReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissReason::Absent => "absent",
            MissReason::Expired => "expired",
            MissReason::Disabled => "disabled",
        }
    }
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    Hit(V),
    Miss(MissReason),
}

impl<V> CacheLookup<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }
}

/// Time-based cache. Entries older than the TTL read as misses and are
/// replaced by the next `put` for the same key.
#[derive(Clone)]
pub struct TtlCache<V> {
    entries: Arc<DashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    enabled: bool,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            enabled: true,
            clock,
        }
    }

    /// A cache that never hits and stores nothing.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::ZERO, clock)
        }
    }

    pub fn get(&self, key: &str) -> CacheLookup<V> {
        if !self.enabled {
            return CacheLookup::Miss(MissReason::Disabled);
        }
        match self.entries.get(key) {
            Some(entry) => {
                let age = self.clock.now().saturating_duration_since(entry.inserted_at);
                if age < self.ttl {
                    CacheLookup::Hit(entry.value.clone())
                } else {
                    CacheLookup::Miss(MissReason::Expired)
                }
            }
            None => CacheLookup::Miss(MissReason::Absent),
        }
    }

    /// Store `value`. Returns false when the cache is disabled.
    pub fn put(&self, key: impl Into<String>, value: V) -> bool {
        if !self.enabled {
            return false;
        }
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
        };
        self.entries.insert(key.into(), entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::ManualClock;

    fn cache(ttl_secs: u64) -> (TtlCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (TtlCache::new(Duration::from_secs(ttl_secs), clock.clone()), clock)
    }

    #[test]
    fn test_hit_then_expire() {
        let (cache, clock) = cache(60);
        assert_eq!(cache.get("user_1"), CacheLookup::Miss(MissReason::Absent));

        cache.put("user_1", "alice".to_string());
        assert_eq!(cache.get("user_1"), CacheLookup::Hit("alice".to_string()));

        clock.advance(Duration::from_secs(59));
        assert!(cache.get("user_1").is_hit());

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("user_1"), CacheLookup::Miss(MissReason::Expired));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_overwrites_expired_entry() {
        let (cache, clock) = cache(10);
        cache.put("product_7", "old".to_string());
        clock.advance(Duration::from_secs(30));
        assert!(!cache.get("product_7").is_hit());

        cache.put("product_7", "new".to_string());
        assert_eq!(cache.get("product_7"), CacheLookup::Hit("new".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let (cache, _) = cache(0);
        cache.put("general_data", "x".to_string());
        assert_eq!(cache.get("general_data"), CacheLookup::Miss(MissReason::Expired));
    }

    #[test]
    fn test_disabled_cache() {
        let cache: TtlCache<String> = TtlCache::disabled(Arc::new(ManualClock::new()));
        assert!(!cache.put("k", "v".to_string()));
        assert_eq!(cache.get("k"), CacheLookup::Miss(MissReason::Disabled));
        assert!(cache.is_empty());
    }
}
