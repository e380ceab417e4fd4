//! HTTP Value Source - REST Tier Adapter
//!
//! One configured HTTP endpoint acting as a resolver tier. The URL is a
//! template with `{symbol}`, `{data_type}` and `{owner}` placeholders.
//! The value is extracted from the JSON body with a JSON pointer, and an
//! optional boolean pointer marks explicit rejections
//! (`{"success": false, ...}`).

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::market::{DataType, Payload, ResolveRequest, SourceTier};
use crate::error::SourceError;
use crate::ports::value_source::ValueSource;

/// Configuration for one HTTP tier.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
  /// Source identifier (breaker key, log field, metric label).
  pub name: String,
  /// Tier classification.
  pub tier: SourceTier,
  /// URL template.
  pub url_template: String,
  /// Per-call budget.
  pub timeout: Duration,
  /// JSON pointer to the value; `None` takes the whole body.
  pub value_pointer: Option<String>,
  /// JSON pointer to a success flag; `false` there is a rejection.
  pub success_pointer: Option<String>,
  /// Bearer token sent as `Authorization`.
  pub bearer: Option<String>,
  /// Data types served; empty means all.
  pub data_types: Vec<DataType>,
}

/// REST-backed resolver tier.
pub struct HttpValueSource {
  /// Underlying HTTP client.
  http: Client,
  /// Source configuration.
  config: HttpSourceConfig,
}

impl HttpValueSource {
  /// Build the source and its HTTP client.
  pub fn new(config: HttpSourceConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(5)
      .build()
      .context("Failed to build HTTP client")?;

    Ok(Self { http, config })
  }

  /// Concrete URL for a request.
  pub fn url_for(&self, request: &ResolveRequest) -> String {
    self
      .config
      .url_template
      .replace("{symbol}", &request.symbol)
      .replace("{data_type}", request.data_type.as_str())
      .replace("{owner}", request.owner.as_str())
  }

  /// Apply the success and value pointers to a decoded body.
  fn extract(&self, body: Value) -> Result<Payload, SourceError> {
    if let Some(pointer) = &self.config.success_pointer {
      if body.pointer(pointer).and_then(Value::as_bool) == Some(false) {
        let reason = body
          .get("error")
          .or_else(|| body.get("message"))
          .and_then(Value::as_str)
          .unwrap_or("success=false")
          .to_string();
        return Err(SourceError::Rejected {
          source_name: self.config.name.clone(),
          reason,
        });
      }
    }

    let value = match &self.config.value_pointer {
      Some(pointer) => body.pointer(pointer).cloned().unwrap_or(Value::Null),
      None => body,
    };

    if value.is_null() {
      return Err(SourceError::MissingValue {
        source_name: self.config.name.clone(),
      });
    }
    Ok(value)
  }
}

#[async_trait]
impl ValueSource for HttpValueSource {
  fn name(&self) -> &str {
    &self.config.name
  }

  fn tier(&self) -> SourceTier {
    self.config.tier
  }

  fn timeout(&self) -> Duration {
    self.config.timeout
  }

  fn supports(&self, data_type: DataType) -> bool {
    self.config.data_types.is_empty() || self.config.data_types.contains(&data_type)
  }

  #[instrument(skip(self, request), fields(source = %self.config.name))]
  async fn fetch(&self, request: &ResolveRequest) -> Result<Payload, SourceError> {
    let url = self.url_for(request);
    let mut builder = self.http.get(&url);
    if let Some(token) = &self.config.bearer {
      builder = builder.bearer_auth(token);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| SourceError::from_reqwest(&self.config.name, &e, self.config.timeout))?;

    let status = response.status();
    if !status.is_success() {
      return Err(SourceError::Status {
        source_name: self.config.name.clone(),
        status: status.as_u16(),
      });
    }

    let text = response
      .text()
      .await
      .map_err(|e| SourceError::from_reqwest(&self.config.name, &e, self.config.timeout))?;
    let body: Value = serde_json::from_str(&text).map_err(|e| SourceError::Malformed {
      source_name: self.config.name.clone(),
      reason: e.to_string(),
    })?;

    debug!(url = %url, "Source answered");
    self.extract(body)
  }
}
