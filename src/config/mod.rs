//! Configuration Module - TOML-based Client Configuration
//!
//! Loads and validates configuration from `config.toml`. The stream
//! credential is never stored in the file: `stream.token_env` names the
//! environment variable holding it (a `.env` file is honoured).
//! Endpoints, timings and thresholds are externalized here; the domain
//! layer only sees the typed policies built from them.

pub mod loader;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::adapters::sources::HttpSourceConfig;
use crate::adapters::stream::StreamClientConfig;
use crate::domain::circuit_breaker::BreakerPolicy;
use crate::domain::emergency::EmergencyTable;
use crate::domain::market::{DataType, SourceTier};
use crate::domain::subscription::SubscriptionKey;
use crate::usecases::freshness_cache::CachePolicy;
use crate::usecases::stream_session::SessionConfig;

/// Top-level client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Client identity and logging.
  pub client: ClientConfig,
  /// Duplex stream channel.
  pub stream: StreamConfig,
  /// Live HTTP tiers, in resolution order.
  #[serde(default)]
  pub sources: Vec<SourceConfig>,
  /// Circuit breaker tuning.
  #[serde(default)]
  pub breaker: BreakerConfig,
  /// Freshness cache.
  #[serde(default)]
  pub cache: CacheConfig,
  /// Emergency table.
  #[serde(default)]
  pub emergency: EmergencyConfig,
  /// Symbols to subscribe and resolve.
  #[serde(default)]
  pub symbols: Vec<SymbolConfig>,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Client identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
  /// Human-readable client name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Interval between resolution rounds in the runner (seconds).
  #[serde(default = "default_poll_interval")]
  pub poll_interval_secs: u64,
  /// Pushed snapshots older than this are not served as live (seconds).
  #[serde(default = "default_live_max_age")]
  pub live_max_age_secs: u64,
}

/// Stream channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
  /// `ws://` or `wss://` endpoint.
  pub url: String,
  /// Environment variable holding the bearer token.
  #[serde(default = "default_token_env")]
  pub token_env: String,
  /// Heartbeat interval (seconds).
  #[serde(default = "default_heartbeat")]
  pub heartbeat_secs: u64,
  /// Fixed delay before automatic reconnects (milliseconds).
  #[serde(default = "default_reconnect_delay")]
  pub reconnect_delay_ms: u64,
  /// Automatic reconnect attempts before giving up.
  #[serde(default = "default_max_reconnects")]
  pub max_reconnect_attempts: u32,
  /// Wait bound for correlated responses (milliseconds).
  #[serde(default = "default_request_timeout")]
  pub request_timeout_ms: u64,
  /// WebSocket handshake bound (milliseconds).
  #[serde(default = "default_connect_timeout")]
  pub connect_timeout_ms: u64,
  /// Drop the channel when no pong arrives within this window
  /// (milliseconds). Absent disables the check.
  #[serde(default)]
  pub pong_timeout_ms: Option<u64>,
  /// Register the stream as the primary indicator tier.
  #[serde(default = "default_true")]
  pub indicator_tier: bool,
  /// Candle interval for stream indicator requests.
  #[serde(default = "default_interval")]
  pub indicator_interval: String,
}

/// One live HTTP tier.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
  /// Source identifier.
  pub name: String,
  /// Tier classification (primary, alternative, external).
  pub tier: SourceTier,
  /// URL template with `{symbol}`, `{data_type}`, `{owner}`.
  pub url: String,
  /// Per-call budget (milliseconds).
  #[serde(default = "default_source_timeout")]
  pub timeout_ms: u64,
  /// JSON pointer to the value.
  #[serde(default)]
  pub value_pointer: Option<String>,
  /// JSON pointer to a success flag.
  #[serde(default)]
  pub success_pointer: Option<String>,
  /// Send the stream credential as a bearer token.
  #[serde(default)]
  pub authenticated: bool,
  /// Data types served; empty means all.
  #[serde(default)]
  pub data_types: Vec<DataType>,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
  /// Consecutive failures that open a breaker.
  #[serde(default = "default_failure_threshold")]
  pub failure_threshold: u32,
  /// Half-open cool-down (milliseconds). Zero disables half-open.
  #[serde(default = "default_cooldown_ms")]
  pub cooldown_ms: u64,
}

/// Freshness cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Entries older than this are absent (seconds).
  #[serde(default = "default_ttl")]
  pub ttl_secs: u64,
  /// Entries at most this old are RECENT (seconds).
  #[serde(default = "default_recent")]
  pub recent_secs: u64,
  /// JSON file backing the cache; in-memory when absent.
  #[serde(default)]
  pub path: Option<String>,
}

/// Emergency table configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmergencyConfig {
  /// Start from the built-in approximations.
  #[serde(default = "default_true")]
  pub defaults: bool,
  /// Per-symbol price overrides.
  #[serde(default)]
  pub prices: BTreeMap<String, f64>,
}

/// A symbol to subscribe and resolve.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolConfig {
  /// Trading pair.
  pub symbol: String,
  /// Candle interval.
  #[serde(default = "default_interval")]
  pub interval: String,
  /// Strategy tag.
  #[serde(default = "default_strategy")]
  pub strategy: String,
  /// Owner context for cache scoping.
  #[serde(default = "default_owner")]
  pub owner: String,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

// ── Typed views ─────────────────────────────────────────

impl StreamConfig {
  /// Transport and session settings for the stream client.
  pub fn client_config(&self) -> StreamClientConfig {
    StreamClientConfig {
      url: self.url.clone(),
      connect_timeout: Duration::from_millis(self.connect_timeout_ms),
      sweep_interval: Duration::from_millis(500),
      session: SessionConfig {
        heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
        reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        max_reconnect_attempts: self.max_reconnect_attempts,
        request_timeout: Duration::from_millis(self.request_timeout_ms),
        pong_timeout: self.pong_timeout_ms.map(Duration::from_millis),
      },
    }
  }
}

impl SourceConfig {
  /// HTTP adapter settings. `credential` is attached when `authenticated`.
  pub fn http_config(&self, credential: Option<&str>) -> HttpSourceConfig {
    HttpSourceConfig {
      name: self.name.clone(),
      tier: self.tier,
      url_template: self.url.clone(),
      timeout: Duration::from_millis(self.timeout_ms),
      value_pointer: self.value_pointer.clone(),
      success_pointer: self.success_pointer.clone(),
      bearer: self
        .authenticated
        .then(|| credential.map(str::to_string))
        .flatten(),
      data_types: self.data_types.clone(),
    }
  }
}

impl BreakerConfig {
  /// Domain policy.
  pub fn policy(&self) -> BreakerPolicy {
    BreakerPolicy {
      failure_threshold: self.failure_threshold,
      cooldown: (self.cooldown_ms > 0).then(|| Duration::from_millis(self.cooldown_ms)),
    }
  }
}

impl CacheConfig {
  /// Domain policy.
  pub fn policy(&self) -> CachePolicy {
    CachePolicy {
      ttl: Duration::from_secs(self.ttl_secs),
      recent_window: Duration::from_secs(self.recent_secs),
    }
  }
}

impl EmergencyConfig {
  /// Build the emergency table.
  pub fn table(&self) -> EmergencyTable {
    let base = if self.defaults {
      EmergencyTable::with_defaults()
    } else {
      EmergencyTable::empty()
    };
    base.with_overrides(self.prices.iter().map(|(s, p)| (s.clone(), *p)))
  }
}

impl SymbolConfig {
  /// Subscription key for this symbol.
  pub fn subscription_key(&self) -> SubscriptionKey {
    SubscriptionKey::new(&self.symbol, &self.interval, &self.strategy)
  }
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      failure_threshold: default_failure_threshold(),
      cooldown_ms: default_cooldown_ms(),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl(),
      recent_secs: default_recent(),
      path: None,
    }
  }
}

impl Default for EmergencyConfig {
  fn default() -> Self {
    Self {
      defaults: true,
      prices: BTreeMap::new(),
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_poll_interval() -> u64 {
  15
}

fn default_live_max_age() -> u64 {
  60
}

fn default_token_env() -> String {
  "MARKET_STREAM_TOKEN".to_string()
}

fn default_heartbeat() -> u64 {
  30
}

fn default_reconnect_delay() -> u64 {
  3_000
}

fn default_max_reconnects() -> u32 {
  5
}

fn default_request_timeout() -> u64 {
  10_000
}

fn default_connect_timeout() -> u64 {
  10_000
}

fn default_interval() -> String {
  "1m".to_string()
}

fn default_strategy() -> String {
  "smart_scalper".to_string()
}

fn default_owner() -> String {
  "default".to_string()
}

fn default_source_timeout() -> u64 {
  5_000
}

fn default_failure_threshold() -> u32 {
  3
}

fn default_cooldown_ms() -> u64 {
  30_000
}

fn default_ttl() -> u64 {
  300
}

fn default_recent() -> u64 {
  120
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
