//! Freshness Cache - Last-Known-Good Values with Bounded Age
//!
//! Every live-tier success is written here; the resolver consults it only
//! after all live tiers fail. Reads compute the entry's age:
//! - `age <= recent window` (default 2 min): `RECENT`
//! - `recent window < age <= TTL` (default 5 min): `STALE`
//! - `age > TTL`: treated as absent and deleted opportunistically
//!
//! Keys include the owner context, so entries never cross bots or users.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::domain::market::{Freshness, Payload, ResolveRequest, SourceTag};
use crate::ports::cache_store::{KeyValueStore, StoredValue};

/// Cache age windows.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// Entries older than this are absent.
    pub ttl: Duration,
    /// Entries at most this old are `RECENT`.
    pub recent_window: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            recent_window: Duration::from_secs(120),
        }
    }
}

/// A usable cached value.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    /// Cached payload.
    pub value: Payload,
    /// Age at read time.
    pub age: Duration,
    /// Staleness tier.
    pub freshness: Freshness,
    /// Tier that wrote the entry, when recorded.
    pub origin: Option<SourceTag>,
}

/// TTL-bounded view over a `KeyValueStore`.
pub struct FreshnessCache {
    store: Arc<dyn KeyValueStore>,
    policy: CachePolicy,
}

impl FreshnessCache {
    /// Wrap a store with the given policy.
    pub fn new(store: Arc<dyn KeyValueStore>, policy: CachePolicy) -> Self {
        Self { store, policy }
    }

    /// Active policy.
    pub const fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Record a live-tier success stamped with the current time.
    pub async fn record(&self, request: &ResolveRequest, value: &Payload, source: SourceTag) {
        self.record_at(request, value, source, Utc::now().timestamp_millis())
            .await;
    }

    /// Record a value with an explicit timestamp (Unix ms).
    pub async fn record_at(
        &self,
        request: &ResolveRequest,
        value: &Payload,
        source: SourceTag,
        timestamp_ms: i64,
    ) {
        let key = request.cache_key();
        let entry = StoredValue {
            data: value.clone(),
            timestamp: timestamp_ms,
            source: Some(source),
        };
        // A failed write only costs a future fallback; the live value
        // is still returned.
        if let Err(e) = self.store.put(&key, entry).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }

    /// Usable entry for `request`, if any.
    pub async fn lookup(&self, request: &ResolveRequest) -> Option<CachedValue> {
        self.lookup_at(request, Utc::now().timestamp_millis()).await
    }

    /// Lookup evaluated at `now_ms` (Unix ms).
    pub async fn lookup_at(&self, request: &ResolveRequest, now_ms: i64) -> Option<CachedValue> {
        let key = request.cache_key();
        let entry = match self.store.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        let age = age_since(entry.timestamp, now_ms);
        let Some(freshness) = Freshness::classify(age, self.policy.recent_window, self.policy.ttl)
        else {
            debug!(key = %key, age_secs = age.as_secs(), "Expired cache entry purged");
            if let Err(e) = self.store.delete(&key).await {
                warn!(key = %key, error = %e, "Cache purge failed");
            }
            return None;
        };

        Some(CachedValue {
            value: entry.data,
            age,
            freshness,
            origin: entry.source,
        })
    }
}

/// Age of a timestamp; future timestamps count as age zero.
fn age_since(timestamp_ms: i64, now_ms: i64) -> Duration {
    u64::try_from(now_ms.saturating_sub(timestamp_ms))
        .map_or(Duration::ZERO, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::MemoryStore;
    use crate::domain::market::{DataType, OwnerContext};
    use serde_json::json;

    fn cache() -> FreshnessCache {
        FreshnessCache::new(Arc::new(MemoryStore::new()), CachePolicy::default())
    }

    fn btc(owner: &str) -> ResolveRequest {
        ResolveRequest::new(DataType::Price, "BTCUSDT", OwnerContext::new(owner))
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let cache = cache();
        let now = 1_700_000_000_000_i64;

        cache
            .record_at(&btc("bot-1"), &json!(43_000.0), SourceTag::Live, now - 299_000)
            .await;
        let hit = cache.lookup_at(&btc("bot-1"), now).await.unwrap();
        assert_eq!(hit.freshness, Freshness::Stale);
        assert_eq!(hit.age, Duration::from_secs(299));

        cache
            .record_at(&btc("bot-1"), &json!(43_000.0), SourceTag::Live, now - 301_000)
            .await;
        assert!(cache.lookup_at(&btc("bot-1"), now).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_purged() {
        let store = Arc::new(MemoryStore::new());
        let cache = FreshnessCache::new(store.clone(), CachePolicy::default());
        let now = 1_700_000_000_000_i64;
        cache
            .record_at(&btc("bot-1"), &json!(1.0), SourceTag::External, now - 600_000)
            .await;
        assert!(cache.lookup_at(&btc("bot-1"), now).await.is_none());
        assert!(store.get("price:bot-1:BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recent_classification_and_origin() {
        let cache = cache();
        let now = 1_700_000_000_000_i64;
        cache
            .record_at(&btc("bot-1"), &json!(43_100.0), SourceTag::Alternative, now - 60_000)
            .await;
        let hit = cache.lookup_at(&btc("bot-1"), now).await.unwrap();
        assert_eq!(hit.freshness, Freshness::Recent);
        assert_eq!(hit.origin, Some(SourceTag::Alternative));
    }

    #[tokio::test]
    async fn test_owner_scoping() {
        let cache = cache();
        cache.record(&btc("bot-1"), &json!(43_000.0), SourceTag::Live).await;
        assert!(cache.lookup(&btc("bot-1")).await.is_some());
        assert!(cache.lookup(&btc("bot-2")).await.is_none());
    }

    #[test]
    fn test_future_timestamp_is_age_zero() {
        assert_eq!(age_since(2_000, 1_000), Duration::ZERO);
        assert_eq!(age_since(1_000, 3_500), Duration::from_millis(2_500));
    }
}
