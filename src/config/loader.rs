//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    sources = config.sources.len(),
    symbols = config.symbols.len(),
    failure_threshold = config.breaker.failure_threshold,
    cache_ttl_secs = config.cache.ttl_secs,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Read the stream credential from the environment variable named in
/// the config, after loading any `.env` file.
pub fn stream_credential(config: &AppConfig) -> Result<String> {
  // Missing .env is normal in deployed environments.
  let _ = dotenvy::dotenv();
  let var = &config.stream.token_env;
  let token = std::env::var(var).with_context(|| format!("Environment variable {var} not set"))?;
  anyhow::ensure!(!token.trim().is_empty(), "Environment variable {var} is empty");
  Ok(token)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Well-formed endpoints
/// - Positive timings and thresholds
/// - Consistent cache windows
/// - Unique source names
fn validate_config(config: &AppConfig) -> Result<()> {
  // Stream validation
  let url = &config.stream.url;
  anyhow::ensure!(
    url.starts_with("ws://") || url.starts_with("wss://"),
    "Stream URL must use ws:// or wss://, got {url}"
  );
  anyhow::ensure!(
    config.stream.heartbeat_secs > 0,
    "heartbeat_secs must be positive"
  );
  anyhow::ensure!(
    config.stream.request_timeout_ms > 0,
    "request_timeout_ms must be positive"
  );
  anyhow::ensure!(
    config.stream.connect_timeout_ms > 0,
    "connect_timeout_ms must be positive"
  );
  if let Some(pong) = config.stream.pong_timeout_ms {
    anyhow::ensure!(pong > 0, "pong_timeout_ms must be positive when set");
  }

  // Source validation
  let mut names = HashSet::new();
  for (i, source) in config.sources.iter().enumerate() {
    anyhow::ensure!(!source.name.is_empty(), "Source {i} has an empty name");
    anyhow::ensure!(
      names.insert(source.name.as_str()),
      "Duplicate source name {}",
      source.name
    );
    anyhow::ensure!(
      source.url.starts_with("http://") || source.url.starts_with("https://"),
      "Source {} must use http:// or https://, got {}",
      source.name,
      source.url
    );
    anyhow::ensure!(
      source.timeout_ms > 0,
      "Source {} timeout_ms must be positive",
      source.name
    );
    for pointer in [&source.value_pointer, &source.success_pointer].into_iter().flatten() {
      anyhow::ensure!(
        pointer.is_empty() || pointer.starts_with('/'),
        "Source {} has an invalid JSON pointer {pointer}",
        source.name
      );
    }
  }

  // Breaker validation
  anyhow::ensure!(
    config.breaker.failure_threshold > 0,
    "failure_threshold must be positive"
  );

  // Cache validation
  anyhow::ensure!(config.cache.ttl_secs > 0, "cache ttl_secs must be positive");
  anyhow::ensure!(
    config.cache.recent_secs <= config.cache.ttl_secs,
    "cache recent_secs ({}) must not exceed ttl_secs ({})",
    config.cache.recent_secs,
    config.cache.ttl_secs
  );

  // Emergency validation
  for (symbol, price) in &config.emergency.prices {
    anyhow::ensure!(
      price.is_finite() && *price > 0.0,
      "Emergency price for {symbol} must be positive, got {price}"
    );
  }

  // Symbol validation
  for symbol in &config.symbols {
    anyhow::ensure!(!symbol.symbol.is_empty(), "Symbol entries need a symbol");
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::market::{DataType, SourceTier};
  use std::time::Duration;

  const MINIMAL: &str = r#"
[client]
name = "scalper-client"

[stream]
url = "wss://stream.example.com/ws"
"#;

  const FULL: &str = r#"
[client]
name = "scalper-client"
log_level = "debug"

[stream]
url = "ws://127.0.0.1:8765/ws"
token_env = "TEST_TOKEN"
heartbeat_secs = 20
reconnect_delay_ms = 1500
max_reconnect_attempts = 7
pong_timeout_ms = 45000

[[sources]]
name = "alt-rest"
tier = "alternative"
url = "https://alt.example.com/v1/{data_type}/{symbol}"
timeout_ms = 2000
value_pointer = "/data/price"
success_pointer = "/success"
data_types = ["price", "ticker"]

[[sources]]
name = "public-exchange"
tier = "external"
url = "https://api.exchange.example/ticker?symbol={symbol}"
value_pointer = "/price"

[breaker]
failure_threshold = 4
cooldown_ms = 0

[cache]
ttl_secs = 600
recent_secs = 60
path = "data/cache.json"

[emergency]
defaults = false
prices = { BTCUSDT = 42000.0 }

[[symbols]]
symbol = "BTCUSDT"

[[symbols]]
symbol = "ETHUSDT"
interval = "5m"
owner = "bot-7"
"#;

  #[test]
  fn test_example_config_is_valid() {
    let config = parse_config(include_str!("../../config.example.toml")).unwrap();
    assert_eq!(config.sources.len(), 2);
    assert_eq!(config.symbols.len(), 2);
    assert!(config.stream.pong_timeout_ms.is_none());
  }

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_minimal_config_defaults() {
    let config = parse_config(MINIMAL).unwrap();
    assert_eq!(config.client.log_level, "info");
    assert_eq!(config.stream.token_env, "MARKET_STREAM_TOKEN");
    assert!(config.sources.is_empty());
    assert_eq!(config.breaker.failure_threshold, 3);
    assert_eq!(config.cache.ttl_secs, 300);
    assert_eq!(config.cache.recent_secs, 120);

    let client = config.stream.client_config();
    assert_eq!(client.session.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(client.session.reconnect_delay, Duration::from_secs(3));
    assert_eq!(client.session.max_reconnect_attempts, 5);
    assert_eq!(client.session.pong_timeout, None);

    assert_eq!(config.emergency.table().lookup(DataType::Price, "BTCUSDT"), Some(43_000.0));
  }

  #[test]
  fn test_full_config() {
    let config = parse_config(FULL).unwrap();
    assert_eq!(config.sources.len(), 2);
    assert_eq!(config.sources[0].tier, SourceTier::Alternative);
    assert_eq!(config.sources[0].data_types, vec![DataType::Price, DataType::Ticker]);

    let http = config.sources[0].http_config(Some("secret"));
    assert_eq!(http.timeout, Duration::from_secs(2));
    assert_eq!(http.bearer, None);

    let policy = config.breaker.policy();
    assert_eq!(policy.failure_threshold, 4);
    assert_eq!(policy.cooldown, None);

    let session = config.stream.client_config().session;
    assert_eq!(session.pong_timeout, Some(Duration::from_secs(45)));
    assert_eq!(session.max_reconnect_attempts, 7);

    let table = config.emergency.table();
    assert_eq!(table.lookup(DataType::Price, "BTCUSDT"), Some(42_000.0));
    assert_eq!(table.lookup(DataType::Price, "ETHUSDT"), None);

    assert_eq!(config.symbols[0].strategy, "smart_scalper");
    assert_eq!(config.symbols[1].subscription_key().interval, "5m");
  }

  #[test]
  fn test_rejects_http_stream_url() {
    let bad = MINIMAL.replace("wss://", "https://");
    assert!(parse_config(&bad).is_err());
  }

  #[test]
  fn test_rejects_recent_window_beyond_ttl() {
    let bad = format!("{MINIMAL}\n[cache]\nttl_secs = 60\nrecent_secs = 120\n");
    let err = parse_config(&bad).unwrap_err();
    assert!(err.to_string().contains("recent_secs"));
  }

  #[test]
  fn test_rejects_duplicate_source_names() {
    let source = r#"
[[sources]]
name = "dup"
tier = "external"
url = "https://a.example/{symbol}"
"#;
    let bad = format!("{MINIMAL}{source}{source}");
    let err = parse_config(&bad).unwrap_err();
    assert!(err.to_string().contains("Duplicate"));
  }

  #[test]
  fn test_authenticated_source_gets_bearer() {
    let cfg = format!(
      "{MINIMAL}\n[[sources]]\nname = \"auth\"\ntier = \"primary\"\nurl = \"https://a.example/{{symbol}}\"\nauthenticated = true\n"
    );
    let config = parse_config(&cfg).unwrap();
    let http = config.sources[0].http_config(Some("secret"));
    assert_eq!(http.bearer.as_deref(), Some("secret"));
  }
}
