//! Layered Value Resolver - Ordered Fallback Across Data Sources
//!
//! Resolution order for one request:
//! 1. Live tiers in configured order (Primary → Alternative → External),
//!    each skipped while its breaker is open and bounded by its own timeout
//! 2. Freshness cache (entries younger than TTL), tagged `CACHED`
//! 3. Static emergency table, tagged `EMERGENCY`
//! 4. `Resolution::Unavailable`
//!
//! A tier failure only advances the chain; it never aborts the resolution.
//! Successes reset the tier's breaker and refresh the cache.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::freshness_cache::FreshnessCache;
use crate::domain::circuit_breaker::CircuitBreakerRegistry;
use crate::domain::emergency::EmergencyTable;
use crate::domain::market::{
    Resolution, ResolveRequest, ResolvedValue, SourceTag, TierAttempt, TierOutcome,
};
use crate::error::SourceError;
use crate::ports::value_source::ValueSource;

/// Fallback chain over live sources, cache and emergency table.
pub struct LayeredResolver {
    /// Live tiers in priority order.
    sources: Vec<Arc<dyn ValueSource>>,
    /// Per-source breakers.
    breakers: Arc<CircuitBreakerRegistry>,
    /// Last-known-good cache.
    cache: Arc<FreshnessCache>,
    /// Last-resort approximations.
    emergency: EmergencyTable,
}

impl LayeredResolver {
    /// Build a resolver.
    pub fn new(
        sources: Vec<Arc<dyn ValueSource>>,
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<FreshnessCache>,
        emergency: EmergencyTable,
    ) -> Self {
        Self {
            sources,
            breakers,
            cache,
            emergency,
        }
    }

    /// Shared breaker registry (for health, metrics and explicit resets).
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Shared freshness cache.
    pub fn cache(&self) -> &Arc<FreshnessCache> {
        &self.cache
    }

    /// Names of the configured live sources, in order.
    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    /// Resolve one request through every layer.
    #[instrument(skip(self), fields(data_type = %request.data_type, symbol = %request.symbol, owner = %request.owner))]
    pub async fn resolve(&self, request: &ResolveRequest) -> Resolution {
        let mut attempts = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            let name = source.name();

            if !source.supports(request.data_type) {
                attempts.push(TierAttempt {
                    source: name.to_string(),
                    outcome: TierOutcome::Unsupported,
                });
                continue;
            }

            if !self.breakers.allow(name) {
                debug!(source = name, "Breaker open, skipping tier");
                attempts.push(TierAttempt {
                    source: name.to_string(),
                    outcome: TierOutcome::SkippedOpen,
                });
                continue;
            }

            match self.attempt(source.as_ref(), request).await {
                Ok(value) => {
                    let tag = source.tier().tag();
                    self.breakers.record_success(name);
                    self.cache.record(request, &value, tag).await;
                    debug!(source = name, tag = %tag, "Tier answered");
                    return Resolution::Resolved(ResolvedValue::live(value, tag));
                }
                Err(e) => {
                    let opened = self.breakers.record_failure(name);
                    warn!(source = name, error = %e, breaker_opened = opened, "Tier failed");
                    attempts.push(TierAttempt {
                        source: name.to_string(),
                        outcome: TierOutcome::Failed(e.to_string()),
                    });
                }
            }
        }

        if let Some(cached) = self.cache.lookup(request).await {
            info!(
                age_secs = cached.age.as_secs(),
                freshness = ?cached.freshness,
                "Live tiers exhausted, serving cached value"
            );
            return Resolution::Resolved(ResolvedValue {
                value: cached.value,
                source: SourceTag::Cached,
                age: Some(cached.age),
                freshness: Some(cached.freshness),
                origin: cached.origin,
            });
        }

        if let Some(price) = self.emergency.lookup(request.data_type, &request.symbol) {
            warn!(price, "Live tiers and cache exhausted, serving emergency approximation");
            return Resolution::Resolved(ResolvedValue::live(
                serde_json::Value::from(price),
                SourceTag::Emergency,
            ));
        }

        warn!(tiers = attempts.len(), "No layer produced a value");
        Resolution::Unavailable { attempts }
    }

    /// One tier call under its own timeout budget.
    async fn attempt(
        &self,
        source: &dyn ValueSource,
        request: &ResolveRequest,
    ) -> Result<serde_json::Value, SourceError> {
        let budget = source.timeout();
        match timeout(budget, source.fetch(request)).await {
            Ok(Ok(value)) if value.is_null() => Err(SourceError::MissingValue {
                source_name: source.name().to_string(),
            }),
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                source_name: source.name().to_string(),
                after: budget,
            }),
        }
    }
}
