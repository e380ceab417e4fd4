//! Core market-data domain types.
//!
//! Request keys, source tiers and tags, staleness classification and the
//! tagged `Resolution` returned to consumers. Values travel as
//! `serde_json::Value` so a tier can return a bare price or a structured
//! indicator payload through the same pipeline.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ────────────────────────────────────────────
// Type aliases consumed by ports and adapters
// ────────────────────────────────────────────

/// Trading pair symbol (e.g. "BTCUSDT").
pub type Symbol = String;

/// Value payload carried through the resolver and the stream.
pub type Payload = Value;

// ────────────────────────────────────────────
// Request shape
// ────────────────────────────────────────────

/// Kind of data a consumer asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Last traded / mark price.
    Price,
    /// 24h ticker statistics.
    Ticker,
    /// Strategy indicator bundle.
    Indicators,
    /// Owner account balance.
    Balance,
}

impl DataType {
    /// Stable lowercase name used in cache keys and URL templates.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Ticker => "ticker",
            Self::Indicators => "indicators",
            Self::Balance => "balance",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owning context (bot or user) a request is scoped to.
///
/// Cache entries are keyed by owner so values never cross contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerContext(String);

impl OwnerContext {
    /// Wrap an owner identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical data request handled by the layered resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolveRequest {
    /// What is being asked for.
    pub data_type: DataType,
    /// Symbol the data is about.
    pub symbol: Symbol,
    /// Owning context for cache scoping.
    pub owner: OwnerContext,
}

impl ResolveRequest {
    /// Build a request.
    pub fn new(data_type: DataType, symbol: impl Into<Symbol>, owner: OwnerContext) -> Self {
        Self {
            data_type,
            symbol: symbol.into(),
            owner,
        }
    }

    /// Composite cache key `(dataType, ownerContext, symbol)`.
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.data_type, self.owner, self.symbol)
    }
}

/// Kind of a correlated response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// `indicators_response` answering `get_indicators`.
    Indicators,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Indicators => f.write_str("indicators"),
        }
    }
}

// ────────────────────────────────────────────
// Tiers and tags
// ────────────────────────────────────────────

/// Live tier a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    /// Authenticated endpoint.
    Primary,
    /// Unauthenticated / public endpoint.
    Alternative,
    /// Third-party direct endpoint.
    External,
}

impl SourceTier {
    /// Tag attached to values produced by this tier.
    pub const fn tag(self) -> SourceTag {
        match self {
            Self::Primary => SourceTag::Live,
            Self::Alternative => SourceTag::Alternative,
            Self::External => SourceTag::External,
        }
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceTag {
    /// Primary tier or a live pushed frame.
    Live,
    /// Alternative tier.
    Alternative,
    /// External tier.
    External,
    /// Last-known-good cache.
    Cached,
    /// Static emergency table.
    Emergency,
}

impl SourceTag {
    /// Upper-case name used in logs, metrics and persisted entries.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Alternative => "ALTERNATIVE",
            Self::External => "EXTERNAL",
            Self::Cached => "CACHED",
            Self::Emergency => "EMERGENCY",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Staleness tier of a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Freshness {
    /// Age within the recent window (default 2 minutes).
    Recent,
    /// Older than the recent window but within TTL.
    Stale,
}

impl Freshness {
    /// Classify an age against the recent window and TTL.
    ///
    /// Returns `None` when the age exceeds the TTL (entry is absent).
    pub fn classify(age: Duration, recent_window: Duration, ttl: Duration) -> Option<Self> {
        if age > ttl {
            None
        } else if age <= recent_window {
            Some(Self::Recent)
        } else {
            Some(Self::Stale)
        }
    }
}

// ────────────────────────────────────────────
// Resolution result
// ────────────────────────────────────────────

/// A value together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    /// The resolved payload.
    pub value: Payload,
    /// Which layer produced it.
    pub source: SourceTag,
    /// Age of the value when served from cache.
    pub age: Option<Duration>,
    /// Staleness tier when served from cache.
    pub freshness: Option<Freshness>,
    /// Tier that originally wrote a cached value.
    pub origin: Option<SourceTag>,
}

impl ResolvedValue {
    /// A value fresh from a live tier or push frame.
    pub const fn live(value: Payload, source: SourceTag) -> Self {
        Self {
            value,
            source,
            age: None,
            freshness: None,
            origin: None,
        }
    }

    /// Numeric view of the payload, if it is a number.
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }
}

/// Outcome of one tier during a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierOutcome {
    /// Tier failed or timed out.
    Failed(String),
    /// Breaker open, tier not called.
    SkippedOpen,
    /// Tier does not serve this data type.
    Unsupported,
}

/// One line of the per-request attempt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierAttempt {
    /// Source identifier.
    pub source: String,
    /// What happened.
    pub outcome: TierOutcome,
}

/// Tagged result of a resolution.
///
/// `Unavailable` is a distinct variant so callers can never mistake
/// "no data" for a real zero.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A value was found in some layer.
    Resolved(ResolvedValue),
    /// Every layer failed.
    Unavailable {
        /// Per-tier log of what was tried.
        attempts: Vec<TierAttempt>,
    },
}

impl Resolution {
    /// Resolved value, if any.
    pub const fn value(&self) -> Option<&ResolvedValue> {
        match self {
            Self::Resolved(v) => Some(v),
            Self::Unavailable { .. } => None,
        }
    }

    /// Source tag, `None` when unavailable.
    pub fn source(&self) -> Option<SourceTag> {
        self.value().map(|v| v.source)
    }

    /// Whether every layer failed.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Label used in logs and metrics ("UNAVAILABLE" for the empty case).
    pub fn label(&self) -> &'static str {
        self.source().map_or("UNAVAILABLE", SourceTag::as_str)
    }
}

/// Most recent merged view of a symbol as seen by consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSnapshot {
    /// Symbol.
    pub symbol: Symbol,
    /// Latest payload.
    pub data: Payload,
    /// Where it came from.
    pub source: SourceTag,
    /// When it was received (Unix ms).
    pub received_at_ms: i64,
}
