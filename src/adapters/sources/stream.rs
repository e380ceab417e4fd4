//! Stream Indicator Source - Primary Tier over the Duplex Channel
//!
//! Serves `Indicators` requests through the correlated `get_indicators`
//! exchange on the authenticated stream. Other data types are not
//! served by this tier.

use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::stream::StreamHandle;
use crate::domain::market::{DataType, Payload, ResolveRequest, SourceTier};
use crate::error::SourceError;
use crate::ports::value_source::ValueSource;

/// Primary tier backed by the stream client.
pub struct StreamIndicatorSource {
    name: String,
    handle: StreamHandle,
    interval: String,
    timeout: Duration,
}

impl StreamIndicatorSource {
    /// Wrap a stream handle. `interval` is the candle interval requested.
    pub fn new(
        name: impl Into<String>,
        handle: StreamHandle,
        interval: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            handle,
            interval: interval.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ValueSource for StreamIndicatorSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Primary
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn supports(&self, data_type: DataType) -> bool {
        data_type == DataType::Indicators
    }

    async fn fetch(&self, request: &ResolveRequest) -> Result<Payload, SourceError> {
        Ok(self
            .handle
            .request_indicators(&request.symbol, &self.interval)
            .await?)
    }
}
