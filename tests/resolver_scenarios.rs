//! Resolver Scenarios - Fallback Chain End to End
//!
//! Drives `LayeredResolver` through live tiers, breakers, the freshness
//! cache and the emergency table with mocked sources.
//! Uses mockall for the tier calls and paused tokio time for timeouts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use mockall::predicate::*;
use serde_json::json;

use resilient_market_client::adapters::persistence::MemoryStore;
use resilient_market_client::domain::circuit_breaker::{BreakerPolicy, CircuitBreakerRegistry};
use resilient_market_client::domain::emergency::EmergencyTable;
use resilient_market_client::domain::market::{
    DataType, Freshness, OwnerContext, Payload, Resolution, ResolveRequest, SourceTag, SourceTier,
    TierOutcome,
};
use resilient_market_client::error::SourceError;
use resilient_market_client::ports::value_source::ValueSource;
use resilient_market_client::usecases::{CachePolicy, FreshnessCache, LayeredResolver};

// ---- Mock Definitions ----

/// The part of a tier the tests script.
pub trait Fetcher {
    fn fetch(&self, symbol: &str) -> Result<Payload, SourceError>;
}

mock! {
    pub Fetcher {}

    impl Fetcher for Fetcher {
        fn fetch(&self, symbol: &str) -> Result<Payload, SourceError>;
    }
}

/// A resolver tier around a scripted fetcher.
struct Tier {
    name: &'static str,
    tier: SourceTier,
    timeout: Duration,
    /// Simulated latency before the fetcher is consulted.
    delay: Option<Duration>,
    /// Only data type served, when restricted.
    only: Option<DataType>,
    fetcher: MockFetcher,
}

impl Tier {
    fn new(name: &'static str, tier: SourceTier, fetcher: MockFetcher) -> Self {
        Self {
            name,
            tier,
            timeout: Duration::from_secs(5),
            delay: None,
            only: None,
            fetcher,
        }
    }
}

#[async_trait]
impl ValueSource for Tier {
    fn name(&self) -> &str {
        self.name
    }

    fn tier(&self) -> SourceTier {
        self.tier
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn supports(&self, data_type: DataType) -> bool {
        self.only.is_none_or(|only| only == data_type)
    }

    async fn fetch(&self, request: &ResolveRequest) -> Result<Payload, SourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.fetcher.fetch(&request.symbol)
    }
}

// ---- Helpers ----

fn failing(name: &'static str, times: usize) -> MockFetcher {
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(times).returning(move |_| {
        Err(SourceError::Status {
            source_name: name.to_string(),
            status: 503,
        })
    });
    fetcher
}

fn answering(value: f64, times: usize) -> MockFetcher {
    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .times(times)
        .returning(move |_| Ok(json!(value)));
    fetcher
}

fn untouched() -> MockFetcher {
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().never();
    fetcher
}

fn resolver(
    tiers: Vec<Tier>,
    policy: BreakerPolicy,
    emergency: EmergencyTable,
) -> (LayeredResolver, Arc<FreshnessCache>) {
    let cache = Arc::new(FreshnessCache::new(
        Arc::new(MemoryStore::new()),
        CachePolicy::default(),
    ));
    let sources = tiers
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn ValueSource>)
        .collect();
    let resolver = LayeredResolver::new(
        sources,
        Arc::new(CircuitBreakerRegistry::new(policy)),
        Arc::clone(&cache),
        emergency,
    );
    (resolver, cache)
}

fn price(symbol: &str) -> ResolveRequest {
    ResolveRequest::new(DataType::Price, symbol, OwnerContext::new("bot-7"))
}

// ---- Scenarios ----

#[tokio::test(start_paused = true)]
async fn test_primary_timeout_falls_to_alternative() {
    let primary = Tier {
        delay: Some(Duration::from_secs(30)),
        ..Tier::new("primary", SourceTier::Primary, untouched())
    };
    let alternative = Tier::new("alt-rest", SourceTier::Alternative, answering(43_250.50, 1));
    let (resolver, cache) = resolver(
        vec![primary, alternative],
        BreakerPolicy::default(),
        EmergencyTable::empty(),
    );

    let request = price("BTCUSDT");
    let resolution = resolver.resolve(&request).await;

    assert_eq!(resolution.source(), Some(SourceTag::Alternative));
    assert_eq!(resolution.value().unwrap().as_f64(), Some(43_250.50));
    assert_eq!(resolver.breakers().failures("primary"), 1);

    let cached = cache.lookup(&request).await.unwrap();
    assert_eq!(cached.value, json!(43_250.50));
    assert_eq!(cached.origin, Some(SourceTag::Alternative));
    assert_eq!(cached.freshness, Freshness::Recent);
}

#[tokio::test]
async fn test_all_tiers_down_serves_stale_cache() {
    let (resolver, cache) = resolver(
        vec![
            Tier::new("primary", SourceTier::Primary, failing("primary", 1)),
            Tier::new("alt-rest", SourceTier::Alternative, failing("alt-rest", 1)),
        ],
        BreakerPolicy::default(),
        EmergencyTable::with_defaults(),
    );

    let request = price("ETHUSDT");
    let written_at = Utc::now().timestamp_millis() - 240_000;
    cache
        .record_at(&request, &json!(2_650.75), SourceTag::Live, written_at)
        .await;

    let resolution = resolver.resolve(&request).await;
    let value = resolution.value().unwrap();
    assert_eq!(value.source, SourceTag::Cached);
    assert_eq!(value.as_f64(), Some(2_650.75));
    assert_eq!(value.freshness, Some(Freshness::Stale));
    assert_eq!(value.origin, Some(SourceTag::Live));
    let age = value.age.unwrap();
    assert!(age >= Duration::from_secs(240) && age < Duration::from_secs(245));
}

#[tokio::test]
async fn test_expired_cache_falls_to_emergency() {
    let (resolver, cache) = resolver(
        vec![Tier::new("alt-rest", SourceTier::Alternative, failing("alt-rest", 1))],
        BreakerPolicy::default(),
        EmergencyTable::with_defaults(),
    );

    let request = price("BTCUSDT");
    let expired = Utc::now().timestamp_millis() - 400_000;
    cache
        .record_at(&request, &json!(41_000.0), SourceTag::Live, expired)
        .await;

    let resolution = resolver.resolve(&request).await;
    assert_eq!(resolution.source(), Some(SourceTag::Emergency));
    assert_eq!(resolution.value().unwrap().as_f64(), Some(43_000.0));
}

#[tokio::test]
async fn test_nothing_left_is_unavailable() {
    let (resolver, _cache) = resolver(
        vec![
            Tier::new("primary", SourceTier::Primary, failing("primary", 1)),
            Tier::new("public", SourceTier::External, failing("public", 1)),
        ],
        BreakerPolicy::default(),
        EmergencyTable::with_defaults(),
    );

    let resolution = resolver.resolve(&price("XYZUSDT")).await;
    assert!(resolution.is_unavailable());
    assert_eq!(resolution.label(), "UNAVAILABLE");
    match resolution {
        Resolution::Unavailable { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0].source, "primary");
            assert!(matches!(attempts[0].outcome, TierOutcome::Failed(_)));
            assert_eq!(attempts[1].source, "public");
        }
        Resolution::Resolved(v) => panic!("unexpected value {v:?}"),
    }
}

#[tokio::test]
async fn test_emergency_covers_prices_only() {
    let (resolver, _cache) = resolver(Vec::new(), BreakerPolicy::default(), EmergencyTable::with_defaults());
    let request = ResolveRequest::new(DataType::Balance, "BTCUSDT", OwnerContext::new("bot-7"));
    assert!(resolver.resolve(&request).await.is_unavailable());
}

#[tokio::test]
async fn test_breaker_skips_tier_after_threshold() {
    let policy = BreakerPolicy {
        failure_threshold: 3,
        cooldown: None,
    };
    let (resolver, _cache) = resolver(
        vec![
            Tier::new("alt-rest", SourceTier::Alternative, failing("alt-rest", 3)),
            Tier::new("public", SourceTier::External, answering(43_100.0, 4)),
        ],
        policy,
        EmergencyTable::empty(),
    );

    for _ in 0..3 {
        let res = resolver.resolve(&price("BTCUSDT")).await;
        assert_eq!(res.source(), Some(SourceTag::External));
    }
    assert!(resolver.breakers().is_open("alt-rest"));

    // Fourth call never reaches the open tier (the mock allows 3 calls).
    let res = resolver.resolve(&price("BTCUSDT")).await;
    assert_eq!(res.source(), Some(SourceTag::External));
    assert!(!resolver.breakers().is_open("public"));
}

#[tokio::test(start_paused = true)]
async fn test_breaker_closes_after_successful_trial() {
    let mut fetcher = MockFetcher::new();
    let mut seq = mockall::Sequence::new();
    fetcher
        .expect_fetch()
        .with(eq("BTCUSDT"))
        .times(2)
        .in_sequence(&mut seq)
        .returning(|_| {
            Err(SourceError::Transport {
                source_name: "alt-rest".into(),
                reason: "connection reset".into(),
            })
        });
    fetcher
        .expect_fetch()
        .with(eq("BTCUSDT"))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(json!(43_300.0)));

    let policy = BreakerPolicy {
        failure_threshold: 2,
        cooldown: Some(Duration::from_secs(30)),
    };
    let (resolver, _cache) = resolver(
        vec![Tier::new("alt-rest", SourceTier::Alternative, fetcher)],
        policy,
        EmergencyTable::with_defaults(),
    );

    resolver.resolve(&price("BTCUSDT")).await;
    resolver.resolve(&price("BTCUSDT")).await;
    assert!(resolver.breakers().is_open("alt-rest"));

    // Still cooling down: skipped, emergency answers.
    let res = resolver.resolve(&price("BTCUSDT")).await;
    assert_eq!(res.source(), Some(SourceTag::Emergency));

    tokio::time::advance(Duration::from_secs(31)).await;

    let res = resolver.resolve(&price("BTCUSDT")).await;
    assert_eq!(res.source(), Some(SourceTag::Alternative));
    assert!(!resolver.breakers().is_open("alt-rest"));
    assert_eq!(resolver.breakers().failures("alt-rest"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_trial_does_not_strand_tier() {
    let mut fetcher = MockFetcher::new();
    let mut seq = mockall::Sequence::new();
    fetcher
        .expect_fetch()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| {
            Err(SourceError::Status {
                source_name: "alt-rest".into(),
                status: 502,
            })
        });
    fetcher
        .expect_fetch()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(json!(43_100.0)));

    let tier = Tier {
        delay: Some(Duration::from_millis(500)),
        ..Tier::new("alt-rest", SourceTier::Alternative, fetcher)
    };
    let policy = BreakerPolicy {
        failure_threshold: 1,
        cooldown: Some(Duration::from_secs(30)),
    };
    let (resolver, _cache) = resolver(vec![tier], policy, EmergencyTable::empty());

    resolver.resolve(&price("BTCUSDT")).await;
    assert!(resolver.breakers().is_open("alt-rest"));

    tokio::time::advance(Duration::from_secs(31)).await;
    let cancelled =
        tokio::time::timeout(Duration::from_millis(100), resolver.resolve(&price("BTCUSDT"))).await;
    assert!(cancelled.is_err());

    // Trial still counted as outstanding right after the cancellation.
    assert!(resolver.resolve(&price("BTCUSDT")).await.is_unavailable());

    tokio::time::advance(Duration::from_secs(31)).await;
    let res = resolver.resolve(&price("BTCUSDT")).await;
    assert_eq!(res.source(), Some(SourceTag::Alternative));
    assert!(!resolver.breakers().is_open("alt-rest"));
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let mut fetcher = MockFetcher::new();
    let mut seq = mockall::Sequence::new();
    fetcher
        .expect_fetch()
        .times(2)
        .in_sequence(&mut seq)
        .returning(|_| {
            Err(SourceError::MissingValue {
                source_name: "alt-rest".into(),
            })
        });
    fetcher
        .expect_fetch()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| Ok(json!(2_651.0)));

    let (resolver, _cache) = resolver(
        vec![Tier::new("alt-rest", SourceTier::Alternative, fetcher)],
        BreakerPolicy::default(),
        EmergencyTable::with_defaults(),
    );

    resolver.resolve(&price("ETHUSDT")).await;
    resolver.resolve(&price("ETHUSDT")).await;
    assert_eq!(resolver.breakers().failures("alt-rest"), 2);

    let res = resolver.resolve(&price("ETHUSDT")).await;
    assert_eq!(res.source(), Some(SourceTag::Alternative));
    assert_eq!(resolver.breakers().failures("alt-rest"), 0);
}

#[tokio::test]
async fn test_null_value_counts_as_failure() {
    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch()
        .times(1)
        .returning(|_| Ok(serde_json::Value::Null));

    let (resolver, _cache) = resolver(
        vec![Tier::new("primary", SourceTier::Primary, fetcher)],
        BreakerPolicy::default(),
        EmergencyTable::with_defaults(),
    );

    let res = resolver.resolve(&price("BTCUSDT")).await;
    assert_eq!(res.source(), Some(SourceTag::Emergency));
    assert_eq!(resolver.breakers().failures("primary"), 1);
}

#[tokio::test]
async fn test_unsupported_tier_is_skipped_without_accounting() {
    let stream_tier = Tier {
        only: Some(DataType::Indicators),
        ..Tier::new("stream", SourceTier::Primary, untouched())
    };
    let (resolver, _cache) = resolver(
        vec![
            stream_tier,
            Tier::new("alt-rest", SourceTier::Alternative, answering(43_000.5, 1)),
        ],
        BreakerPolicy::default(),
        EmergencyTable::empty(),
    );

    let res = resolver.resolve(&price("BTCUSDT")).await;
    assert_eq!(res.source(), Some(SourceTag::Alternative));
    assert_eq!(resolver.breakers().failures("stream"), 0);
}

#[tokio::test]
async fn test_primary_success_tags_live() {
    let (resolver, cache) = resolver(
        vec![
            Tier::new("primary", SourceTier::Primary, answering(43_210.0, 1)),
            Tier::new("alt-rest", SourceTier::Alternative, untouched()),
        ],
        BreakerPolicy::default(),
        EmergencyTable::empty(),
    );

    let request = price("BTCUSDT");
    let res = resolver.resolve(&request).await;
    assert_eq!(res.source(), Some(SourceTag::Live));
    assert_eq!(res.value().unwrap().age, None);
    assert_eq!(cache.lookup(&request).await.unwrap().origin, Some(SourceTag::Live));
}

#[tokio::test]
async fn test_cache_is_scoped_per_owner() {
    let (resolver, _cache) = resolver(
        vec![Tier::new("alt-rest", SourceTier::Alternative, {
            let mut fetcher = MockFetcher::new();
            let mut seq = mockall::Sequence::new();
            fetcher
                .expect_fetch()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(json!(0.123)));
            fetcher
                .expect_fetch()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| {
                    Err(SourceError::Status {
                        source_name: "alt-rest".into(),
                        status: 500,
                    })
                });
            fetcher
        })],
        BreakerPolicy::default(),
        EmergencyTable::empty(),
    );

    let mine = ResolveRequest::new(DataType::Balance, "USDT", OwnerContext::new("user-1"));
    let theirs = ResolveRequest::new(DataType::Balance, "USDT", OwnerContext::new("user-2"));

    assert_eq!(resolver.resolve(&mine).await.source(), Some(SourceTag::Alternative));
    assert!(resolver.resolve(&theirs).await.is_unavailable());
}
