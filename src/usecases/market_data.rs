//! Market Data Service - Live Push First, Layered Resolution Second
//!
//! Consumer-facing facade. For a symbol's data it prefers the pushed
//! snapshot from an authenticated, subscribed stream; otherwise it runs
//! the layered resolver. The merged `SymbolSnapshot` per symbol is
//! whichever of {push frame, resolver result} is most recent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::resolver::LayeredResolver;
use crate::domain::market::{
    DataType, OwnerContext, Resolution, ResolveRequest, ResolvedValue, SourceTag, Symbol,
    SymbolSnapshot,
};
use crate::ports::stream::{LiveFeed, StreamEvent};

/// Facade combining the push feed and the resolver.
pub struct MarketDataService {
    /// Push feed, absent when running resolver-only.
    live: Option<Arc<dyn LiveFeed>>,
    /// Fallback chain.
    resolver: Arc<LayeredResolver>,
    /// Pushed snapshots older than this fall through to the resolver.
    live_max_age: Duration,
    /// Merged most-recent view per symbol.
    latest: RwLock<HashMap<Symbol, SymbolSnapshot>>,
}

impl MarketDataService {
    /// Build the service.
    pub fn new(
        live: Option<Arc<dyn LiveFeed>>,
        resolver: Arc<LayeredResolver>,
        live_max_age: Duration,
    ) -> Self {
        Self {
            live,
            resolver,
            live_max_age,
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// Underlying resolver.
    pub const fn resolver(&self) -> &Arc<LayeredResolver> {
        &self.resolver
    }

    /// One-shot resolution, bypassing the push feed.
    pub async fn resolve(&self, request: &ResolveRequest) -> Resolution {
        let resolution = self.resolver.resolve(request).await;
        if let Some(value) = resolution.value() {
            self.remember(SymbolSnapshot {
                symbol: request.symbol.clone(),
                data: value.value.clone(),
                source: value.source,
                received_at_ms: Utc::now().timestamp_millis(),
            });
        }
        resolution
    }

    /// Symbol data: live pushed snapshot when available, indicator
    /// resolution otherwise.
    #[instrument(skip(self))]
    pub async fn symbol_data(&self, symbol: &str, owner: &OwnerContext) -> Resolution {
        if let Some(snapshot) = self.fresh_live_snapshot(symbol).await {
            debug!("Serving pushed snapshot");
            let value = ResolvedValue::live(snapshot.data.clone(), SourceTag::Live);
            self.remember(snapshot);
            return Resolution::Resolved(value);
        }
        let request = ResolveRequest::new(DataType::Indicators, symbol, owner.clone());
        self.resolve(&request).await
    }

    /// Merged most-recent view of `symbol`.
    pub fn latest(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.latest.read().get(symbol).cloned()
    }

    /// Fold pushed snapshots into the merged view until shutdown.
    #[instrument(skip(self, events, shutdown_rx))]
    pub async fn track_pushes(
        &self,
        mut events: broadcast::Receiver<StreamEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!("Tracking pushed snapshots");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Snapshot tracker shutting down");
                    return;
                }
                event = events.recv() => {
                    match event {
                        Ok(StreamEvent::Snapshot(snapshot)) => self.remember(snapshot),
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(dropped = n, "Snapshot tracker lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Stream event channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn fresh_live_snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        let live = self.live.as_ref()?;
        let snapshot = live.live_snapshot(symbol).await?;
        let age_ms = Utc::now().timestamp_millis() - snapshot.received_at_ms;
        let max_ms = i64::try_from(self.live_max_age.as_millis()).unwrap_or(i64::MAX);
        (age_ms <= max_ms).then_some(snapshot)
    }

    fn remember(&self, snapshot: SymbolSnapshot) {
        let mut latest = self.latest.write();
        match latest.get(&snapshot.symbol) {
            Some(existing) if existing.received_at_ms > snapshot.received_at_ms => {}
            _ => {
                latest.insert(snapshot.symbol.clone(), snapshot);
            }
        }
    }
}
