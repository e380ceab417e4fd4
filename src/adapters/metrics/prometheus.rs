//! Prometheus Metrics Registry - Client Observability
//!
//! Registers and exposes Prometheus metrics on `/metrics`. Covers
//! resolution outcomes per source tag, breaker state per source, and
//! stream connection health.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::circuit_breaker::BreakerSnapshot;
use crate::domain::market::Resolution;
use crate::ports::stream::StreamEvent;

/// Centralized Prometheus metrics for the client.
///
/// All metrics follow the naming convention `market_client_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Resolutions by source tag (`UNAVAILABLE` included).
    pub resolutions: IntCounterVec,
    /// Consecutive failures currently counted per source.
    pub source_failures: IntGaugeVec,
    /// Breaker status per source (1 = open).
    pub breaker_open: IntGaugeVec,
    /// Connection state code (0 = disconnected ... 3 = authenticated).
    pub connection_state: IntGauge,
    /// Automatic reconnects scheduled.
    pub reconnects: IntCounter,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let resolutions = IntCounterVec::new(
            Opts::new(
                "market_client_resolutions_total",
                "Resolutions by answering layer",
            ),
            &["source"],
        )?;

        let source_failures = IntGaugeVec::new(
            Opts::new(
                "market_client_source_consecutive_failures",
                "Consecutive failures counted by each source breaker",
            ),
            &["source"],
        )?;

        let breaker_open = IntGaugeVec::new(
            Opts::new(
                "market_client_breaker_open",
                "Breaker status per source (1=open, 0=closed)",
            ),
            &["source"],
        )?;

        let connection_state = IntGauge::new(
            "market_client_connection_state",
            "Stream connection state code",
        )?;

        let reconnects = IntCounter::new(
            "market_client_reconnects_total",
            "Automatic stream reconnects scheduled",
        )?;

        registry.register(Box::new(resolutions.clone()))?;
        registry.register(Box::new(source_failures.clone()))?;
        registry.register(Box::new(breaker_open.clone()))?;
        registry.register(Box::new(connection_state.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;

        Ok(Self {
            registry,
            resolutions,
            source_failures,
            breaker_open,
            connection_state,
            reconnects,
        })
    }

    /// Count one resolution under its source tag.
    pub fn record_resolution(&self, resolution: &Resolution) {
        self.resolutions
            .with_label_values(&[resolution.label()])
            .inc();
    }

    /// Mirror breaker snapshots into the per-source gauges. Sources absent
    /// from the snapshot are dropped from both gauges.
    pub fn observe_breakers(&self, snapshots: &[BreakerSnapshot]) {
        self.breaker_open.reset();
        self.source_failures.reset();
        for snap in snapshots {
            self.breaker_open
                .with_label_values(&[snap.source.as_str()])
                .set(i64::from(snap.open));
            self.source_failures
                .with_label_values(&[snap.source.as_str()])
                .set(i64::from(snap.consecutive_failures));
        }
    }

    /// Fold a stream event into the connection metrics.
    pub fn observe_stream_event(&self, event: &StreamEvent) {
        match event {
            StreamEvent::StateChanged(state) => self.connection_state.set(state.code()),
            StreamEvent::ReconnectScheduled { .. } => self.reconnects.inc(),
            _ => {}
        }
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "Metrics encoding failed");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move { metrics.render() }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
