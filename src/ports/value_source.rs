//! Value Source Port - One Live Tier of the Layered Resolver
//!
//! A source answers `(data_type, symbol, owner)` requests within a
//! caller-enforced timeout. Any failure (status, timeout, malformed body,
//! explicit `success = false`) is reported as a `SourceError`, which the
//! resolver folds into its breaker accounting.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::market::{DataType, Payload, ResolveRequest, SourceTier};
use crate::error::SourceError;

/// Trait for live resolver tiers.
#[async_trait]
pub trait ValueSource: Send + Sync + 'static {
    /// Stable source identifier (breaker key).
    fn name(&self) -> &str;

    /// Tier this source belongs to (decides the result tag).
    fn tier(&self) -> SourceTier;

    /// Timeout budget enforced by the resolver.
    fn timeout(&self) -> Duration;

    /// Whether this source serves `data_type`. Unsupported requests skip
    /// the source without touching its breaker.
    fn supports(&self, _data_type: DataType) -> bool {
        true
    }

    /// Fetch one value.
    async fn fetch(&self, request: &ResolveRequest) -> Result<Payload, SourceError>;
}
