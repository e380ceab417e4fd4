//! Property-Based Tests - Registry, Breaker and Cache Invariants
//!
//! Uses `proptest` to check that bookkeeping invariants hold across
//! random operation sequences and ages.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use resilient_market_client::adapters::persistence::MemoryStore;
use resilient_market_client::domain::circuit_breaker::{BreakerPolicy, CircuitBreakerRegistry};
use resilient_market_client::domain::market::{
    DataType, Freshness, OwnerContext, ResolveRequest, SourceTag,
};
use resilient_market_client::domain::subscription::{SubscriptionKey, SubscriptionRegistry};
use resilient_market_client::ports::stream::{InboundFrame, OutboundFrame};
use resilient_market_client::usecases::{
    CachePolicy, FreshnessCache, SessionAction, SessionConfig, StreamSession,
};

const SYMBOLS: [&str; 4] = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"];

#[derive(Debug, Clone)]
enum Op {
    Subscribe(usize),
    Unsubscribe(usize),
    Drop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SYMBOLS.len()).prop_map(Op::Subscribe),
        (0..SYMBOLS.len()).prop_map(Op::Unsubscribe),
        Just(Op::Drop),
    ]
}

fn key(i: usize) -> SubscriptionKey {
    SubscriptionKey::new(SYMBOLS[i], "1m", "smart_scalper")
}

fn subscribe_frames(actions: &[SessionAction]) -> Vec<String> {
    actions
        .iter()
        .filter_map(|a| match a {
            SessionAction::Send(OutboundFrame::Subscribe { symbol, .. }) => Some(symbol.clone()),
            _ => None,
        })
        .collect()
}

// ── Subscription Registry Properties ────────────────────────

proptest! {
    /// Replay lists each tracked key exactly once, whatever the upsert order.
    #[test]
    fn replay_has_no_duplicates(picks in proptest::collection::vec(0..SYMBOLS.len(), 0..40)) {
        let mut registry = SubscriptionRegistry::new();
        for &i in &picks {
            registry.upsert(key(i));
        }
        let replay = registry.replay();
        let mut distinct = picks.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(replay.len(), distinct.len());
        prop_assert_eq!(registry.len(), distinct.len());
    }

    /// Removing a symbol removes every key for it and nothing else.
    #[test]
    fn remove_symbol_is_exact(
        picks in proptest::collection::vec(0..SYMBOLS.len(), 1..20),
        victim in 0..SYMBOLS.len(),
    ) {
        let mut registry = SubscriptionRegistry::new();
        for &i in &picks {
            registry.upsert(key(i));
            registry.upsert(SubscriptionKey::new(SYMBOLS[i], "5m", "smart_scalper"));
        }
        let before = registry.len();
        let removed = registry.remove_symbol(SYMBOLS[victim]);
        prop_assert!(!registry.contains_symbol(SYMBOLS[victim]));
        prop_assert_eq!(registry.len(), before - removed);
    }

    /// Every re-authentication replays the tracked set exactly once.
    #[test]
    fn session_replays_exactly_once(ops in proptest::collection::vec(op(), 1..50)) {
        let config = SessionConfig {
            max_reconnect_attempts: 10_000,
            ..SessionConfig::default()
        };
        let mut session = StreamSession::new(config, "token");
        session.connect();
        session.on_channel_open();
        session.on_frame(InboundFrame::AuthenticationSuccess { user_id: None });

        for op in ops {
            match op {
                Op::Subscribe(i) => {
                    let (accepted, _) = session.subscribe(key(i));
                    prop_assert!(accepted);
                }
                Op::Unsubscribe(i) => {
                    session.unsubscribe(SYMBOLS[i]);
                }
                Op::Drop => {
                    session.on_channel_closed("dropped");
                    session.on_reconnect_timer();
                    let mut actions = session.on_channel_open();
                    actions.extend(session.on_frame(InboundFrame::AuthenticationSuccess { user_id: None }));
                    let mut sent = subscribe_frames(&actions);
                    prop_assert_eq!(sent.len(), session.subscriptions().len());
                    sent.sort();
                    sent.dedup();
                    prop_assert_eq!(sent.len(), session.subscriptions().len());
                }
            }
        }
    }
}

// ── Circuit Breaker Properties ──────────────────────────────

proptest! {
    /// Open exactly when consecutive failures reach the threshold.
    #[test]
    fn breaker_opens_at_threshold(threshold in 1u32..10, failures in 0u32..20) {
        let registry = CircuitBreakerRegistry::new(BreakerPolicy {
            failure_threshold: threshold,
            cooldown: None,
        });
        for _ in 0..failures {
            registry.record_failure("alt-rest");
        }
        prop_assert_eq!(registry.is_open("alt-rest"), failures >= threshold);
        prop_assert_eq!(registry.allow("alt-rest"), failures < threshold);
        prop_assert_eq!(registry.failures("alt-rest"), failures);

        registry.record_success("alt-rest");
        prop_assert!(!registry.is_open("alt-rest"));
        prop_assert_eq!(registry.failures("alt-rest"), 0);
    }

    /// Breakers are independent per source.
    #[test]
    fn breakers_are_isolated(failures in 0u32..10) {
        let registry = CircuitBreakerRegistry::default();
        for _ in 0..failures {
            registry.record_failure("primary");
        }
        prop_assert!(!registry.is_open("public"));
        prop_assert_eq!(registry.failures("public"), 0);
    }
}

// ── Freshness Properties ────────────────────────────────────

proptest! {
    /// Classification partitions ages into RECENT, STALE and absent.
    #[test]
    fn freshness_partitions_age(age_ms in 0u64..1_000_000, recent_s in 1u64..300, extra_s in 0u64..600) {
        let recent = Duration::from_secs(recent_s);
        let ttl = recent + Duration::from_secs(extra_s);
        let age = Duration::from_millis(age_ms);
        let class = Freshness::classify(age, recent, ttl);
        if age <= recent {
            prop_assert_eq!(class, Some(Freshness::Recent));
        } else if age <= ttl {
            prop_assert_eq!(class, Some(Freshness::Stale));
        } else {
            prop_assert_eq!(class, None);
        }
    }

    /// A cached entry is served iff it is no older than the TTL.
    #[test]
    fn cache_serves_only_within_ttl(age_ms in 0i64..600_000) {
        let cache = FreshnessCache::new(Arc::new(MemoryStore::new()), CachePolicy::default());
        let request = ResolveRequest::new(DataType::Price, "BTCUSDT", OwnerContext::new("bot-1"));
        let now = 1_700_000_000_000_i64;

        let hit = tokio_test::block_on(async {
            cache.record_at(&request, &json!(43_000.0), SourceTag::Live, now - age_ms).await;
            cache.lookup_at(&request, now).await
        });

        prop_assert_eq!(hit.is_some(), age_ms <= 300_000);
        if let Some(hit) = hit {
            prop_assert_eq!(hit.age, Duration::from_millis(age_ms.unsigned_abs()));
        }
    }
}
