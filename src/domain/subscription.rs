//! Subscription Registry - Tracked Intent for Push Feeds
//!
//! Records which (symbol, interval, strategy) feeds the client wants.
//! An entry is intent, not confirmation: server confirmations only update
//! a display-only confirmed set, and a missing confirmation never rolls the
//! entry back. Entries survive reconnection and are replayed.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::market::Symbol;

/// Subscription identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionKey {
    /// Trading pair.
    pub symbol: Symbol,
    /// Candle interval (e.g. "1m").
    pub interval: String,
    /// Strategy tag the feed is computed for.
    pub strategy: String,
}

impl SubscriptionKey {
    /// Build a key.
    pub fn new(
        symbol: impl Into<Symbol>,
        interval: impl Into<String>,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            strategy: strategy.into(),
        }
    }
}

/// A tracked subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    /// Identity.
    pub key: SubscriptionKey,
    /// Whether the intent is live.
    pub active: bool,
    /// When the entry was first created.
    pub created_at: DateTime<Utc>,
}

/// Idempotent registry of wanted feeds.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<SubscriptionKey, Subscription>,
    confirmed: HashSet<Symbol>,
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`. Returns `true` if it was new.
    ///
    /// Overwriting keeps the original creation time.
    pub fn upsert(&mut self, key: SubscriptionKey) -> bool {
        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.active = true;
                false
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    Subscription {
                        key,
                        active: true,
                        created_at: Utc::now(),
                    },
                );
                true
            }
        }
    }

    /// Remove every entry for `symbol`; returns how many were removed.
    pub fn remove_symbol(&mut self, symbol: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.symbol != symbol);
        self.confirmed.remove(symbol);
        before - self.entries.len()
    }

    /// Whether any entry exists for `symbol`.
    pub fn contains_symbol(&self, symbol: &str) -> bool {
        self.entries.keys().any(|key| key.symbol == symbol)
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Active keys in deterministic order, for replay.
    pub fn replay(&self) -> Vec<SubscriptionKey> {
        self.entries
            .values()
            .filter(|sub| sub.active)
            .map(|sub| sub.key.clone())
            .collect()
    }

    /// All tracked subscriptions.
    pub fn entries(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.values()
    }

    /// Server confirmed `symbol`.
    pub fn confirm(&mut self, symbol: &str) {
        self.confirmed.insert(symbol.to_string());
    }

    /// Server rejected `symbol`; the intent stays tracked.
    pub fn unconfirm(&mut self, symbol: &str) {
        self.confirmed.remove(symbol);
    }

    /// Whether the server has confirmed `symbol` on this channel.
    pub fn is_confirmed(&self, symbol: &str) -> bool {
        self.confirmed.contains(symbol)
    }

    /// Forget confirmations (channel lost).
    pub fn clear_confirmations(&mut self) {
        self.confirmed.clear();
    }

    /// Drop everything (terminal teardown).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.confirmed.clear();
    }
}
