//! Resilient Market-Data Client - Entry Point
//!
//! Wires the stream client, the layered resolver and the observability
//! servers, then resolves every configured symbol on a fixed cadence
//! until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Read the stream credential from env (.env honoured)
//! 4. Build cache store, breakers, emergency table
//! 5. Spawn the stream client actor and connect
//! 6. Build live tiers (stream indicators + configured HTTP sources)
//! 7. Spawn metrics (/metrics) and health (/live + /ready) servers
//! 8. Spawn the stream event bridge (metrics, health, first subscribe)
//! 9. Run the resolution loop
//! 10. Wait for SIGINT → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use resilient_market_client::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use resilient_market_client::adapters::persistence::{JsonFileStore, MemoryStore};
use resilient_market_client::adapters::sources::{HttpValueSource, StreamIndicatorSource};
use resilient_market_client::adapters::stream::{StreamClient, StreamHandle};
use resilient_market_client::config::{self, AppConfig};
use resilient_market_client::domain::circuit_breaker::CircuitBreakerRegistry;
use resilient_market_client::domain::connection::ConnectionState;
use resilient_market_client::domain::market::OwnerContext;
use resilient_market_client::ports::cache_store::KeyValueStore;
use resilient_market_client::ports::stream::{LiveFeed, StreamEvent};
use resilient_market_client::ports::value_source::ValueSource;
use resilient_market_client::usecases::{FreshnessCache, LayeredResolver, MarketDataService};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.client.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.client.name,
        version = env!("CARGO_PKG_VERSION"),
        stream = %config.stream.url,
        sources = config.sources.len(),
        symbols = config.symbols.len(),
        "Starting market data client"
    );

    // ── 3. Credential ───────────────────────────────────────
    let credential = config::loader::stream_credential(&config)
        .context("Failed to load stream credential")?;

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 4. Cache store, breakers, emergency table ───────────
    let store: Arc<dyn KeyValueStore> = match &config.cache.path {
        Some(path) => Arc::new(
            JsonFileStore::open(Path::new(path))
                .await
                .context("Failed to open cache store")?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let cache = Arc::new(FreshnessCache::new(store, config.cache.policy()));
    let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker.policy()));
    let emergency = config.emergency.table();

    // ── 5. Stream client ────────────────────────────────────
    let (stream, stream_task) =
        StreamClient::spawn(config.stream.client_config(), credential.clone());
    // Receivers taken before connecting so the first authentication is seen.
    let bridge_events = stream.events();
    let tracker_events = stream.events();
    stream.connect().await.context("Stream client unavailable")?;

    // ── 6. Live tiers ───────────────────────────────────────
    let mut sources: Vec<Arc<dyn ValueSource>> = Vec::new();
    if config.stream.indicator_tier {
        sources.push(Arc::new(StreamIndicatorSource::new(
            "stream",
            stream.clone(),
            config.stream.indicator_interval.clone(),
            Duration::from_millis(config.stream.request_timeout_ms),
        )));
    }
    for source in &config.sources {
        let http = HttpValueSource::new(source.http_config(Some(&credential)))
            .with_context(|| format!("Failed to build source {}", source.name))?;
        sources.push(Arc::new(http));
    }

    let resolver = Arc::new(LayeredResolver::new(sources, breakers, cache, emergency));
    let live: Arc<dyn LiveFeed> = Arc::new(stream.clone());
    let service = Arc::new(MarketDataService::new(
        Some(live),
        Arc::clone(&resolver),
        Duration::from_secs(config.client.live_max_age_secs),
    ));

    // ── 7. Observability servers ────────────────────────────
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to register metrics")?);
    let health = Arc::new(HealthState::new());
    let mut server_handles = Vec::new();
    if config.metrics.enabled {
        let metrics_shutdown = shutdown_tx.subscribe();
        let bind = config.metrics.bind_address.clone();
        let metrics_ref = Arc::clone(&metrics);
        server_handles.push(tokio::spawn(async move {
            if let Err(e) = metrics_ref.serve(bind, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }));

        let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
        let health_shutdown = shutdown_tx.subscribe();
        server_handles.push(tokio::spawn(async move {
            if let Err(e) = health_server.run(health_shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }));
    }

    // ── 8. Stream event bridge + snapshot tracker ───────────
    let bridge_handle = tokio::spawn(bridge_stream_events(
        stream.clone(),
        bridge_events,
        config.clone(),
        Arc::clone(&metrics),
        Arc::clone(&health),
        shutdown_tx.subscribe(),
    ));

    let tracker_service = Arc::clone(&service);
    let tracker_shutdown = shutdown_tx.subscribe();
    let tracker_handle = tokio::spawn(async move {
        tracker_service
            .track_pushes(tracker_events, tracker_shutdown)
            .await;
    });

    // ── 9. Resolution loop ──────────────────────────────────
    let loop_handle = tokio::spawn(run_resolution_loop(
        config.clone(),
        Arc::clone(&service),
        Arc::clone(&metrics),
        Arc::clone(&health),
        shutdown_tx.subscribe(),
    ));

    info!("All tasks spawned, client is running");

    // ── 10. Wait for SIGINT ─────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Signal handler failed, shutting down");
    }
    info!("SIGINT received, initiating graceful shutdown");

    let _ = shutdown_tx.send(());
    health.set_stream_authenticated(false);
    health.set_sources_available(false);

    if let Err(e) = stream.shutdown().await {
        warn!(error = %e, "Stream client already stopped");
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), stream_task).await;

    for handle in [loop_handle, bridge_handle, tracker_handle] {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    for handle in server_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Mirror stream events into metrics and health, and subscribe the
/// configured symbols on the first authentication (later sessions are
/// covered by replay).
async fn bridge_stream_events(
    stream: StreamHandle,
    mut events: broadcast::Receiver<StreamEvent>,
    config: AppConfig,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut subscribed = false;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = n, "Event bridge lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                metrics.observe_stream_event(&event);
                match &event {
                    StreamEvent::StateChanged(state) => {
                        health.set_stream_authenticated(*state == ConnectionState::Authenticated);
                    }
                    StreamEvent::Authenticated { user_id } if !subscribed => {
                        info!(user_id = ?user_id, "Subscribing configured symbols");
                        for symbol in &config.symbols {
                            match stream.subscribe(symbol.subscription_key()).await {
                                Ok(true) => {}
                                Ok(false) => {
                                    warn!(symbol = %symbol.symbol, "Subscribe refused, channel not authenticated");
                                }
                                Err(e) => {
                                    warn!(symbol = %symbol.symbol, error = %e, "Subscribe failed");
                                }
                            }
                        }
                        subscribed = true;
                    }
                    StreamEvent::AuthenticationFailed { reason } => {
                        error!(reason = %reason, "Stream credential rejected; refresh the token and restart");
                    }
                    StreamEvent::ReconnectExhausted { attempts } => {
                        error!(attempts, "Stream reconnect budget exhausted; serving fallback tiers only");
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Resolve every configured symbol on a fixed cadence.
async fn run_resolution_loop(
    config: AppConfig,
    service: Arc<MarketDataService>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let period = Duration::from_secs(config.client.poll_interval_secs.max(1));
    let mut ticker = tokio::time::interval(period);
    let source_names = service.resolver().source_names();

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                info!("Resolution loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                for symbol in &config.symbols {
                    let owner = OwnerContext::new(symbol.owner.as_str());
                    let resolution = service.symbol_data(&symbol.symbol, &owner).await;
                    metrics.record_resolution(&resolution);
                    match resolution.value() {
                        Some(value) => info!(
                            symbol = %symbol.symbol,
                            source = resolution.label(),
                            age_secs = value.age.map(|a| a.as_secs()),
                            freshness = ?value.freshness,
                            "Symbol resolved"
                        ),
                        None => warn!(symbol = %symbol.symbol, "Symbol data UNAVAILABLE"),
                    }
                }

                let breakers = service.resolver().breakers();
                metrics.observe_breakers(&breakers.snapshot());
                health.set_sources_available(
                    source_names.iter().any(|name| !breakers.is_open(name)),
                );
            }
        }
    }
}
