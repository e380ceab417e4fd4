//! Error Taxonomy - Stream and Source Failures
//!
//! Two families of errors live here:
//! - `StreamError`: duplex channel failures surfaced to the owning session
//!   (connection loss, exhausted reconnects, rejected credential,
//!   correlated request failures). Per-symbol subscription errors are
//!   published as events instead, since other symbols are unaffected.
//! - `SourceError`: per-tier failures inside the layered resolver. These
//!   drive the circuit breakers and are never returned raw to consumers.
//!
//! "No data" is not an error: the resolver reports it as
//! `Resolution::Unavailable`.

use std::time::Duration;

use thiserror::Error;

use crate::domain::market::ResponseKind;

/// Failures of the duplex stream channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    /// Channel closed or unreachable (transient, retried internally).
    #[error("stream connection lost: {0}")]
    ConnectionLost(String),

    /// Automatic reconnection gave up after the configured attempt bound.
    #[error("stream reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of automatic attempts made.
        attempts: u32,
    },

    /// Credential rejected by the server (session-fatal, not retried).
    #[error("stream authentication failed: {reason}")]
    Authentication {
        /// Server-supplied reason.
        reason: String,
    },

    /// Operation requires an authenticated channel.
    #[error("stream is not authenticated")]
    NotAuthenticated,

    /// No correlated response arrived in time.
    #[error("{kind} request for {symbol} timed out")]
    RequestTimeout {
        /// Requested symbol.
        symbol: String,
        /// Expected response kind.
        kind: ResponseKind,
    },

    /// Pending request dropped by an explicit disconnect.
    #[error("request cancelled by disconnect")]
    Cancelled,

    /// The client actor has shut down.
    #[error("stream client is closed")]
    ClientClosed,
}

/// Failure of a single resolver tier.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Tier exceeded its timeout budget.
    #[error("{source_name} timed out after {}ms", after.as_millis())]
    Timeout {
        /// Source identifier.
        source_name: String,
        /// Budget that elapsed.
        after: Duration,
    },

    /// Non-2xx HTTP status.
    #[error("{source_name} returned HTTP {status}")]
    Status {
        /// Source identifier.
        source_name: String,
        /// HTTP status code.
        status: u16,
    },

    /// Network-level failure (connect, TLS, reset).
    #[error("{source_name} transport error: {reason}")]
    Transport {
        /// Source identifier.
        source_name: String,
        /// Underlying error text.
        reason: String,
    },

    /// Body was not the expected JSON shape.
    #[error("{source_name} returned a malformed body: {reason}")]
    Malformed {
        /// Source identifier.
        source_name: String,
        /// Parse failure detail.
        reason: String,
    },

    /// Body carried an explicit `success = false`.
    #[error("{source_name} rejected the request: {reason}")]
    Rejected {
        /// Source identifier.
        source_name: String,
        /// Server-supplied reason, if any.
        reason: String,
    },

    /// Body parsed but the value was missing or null.
    #[error("{source_name} response carried no value")]
    MissingValue {
        /// Source identifier.
        source_name: String,
    },

    /// The stream-backed tier failed.
    #[error("stream source failed: {0}")]
    Stream(#[from] StreamError),
}

impl SourceError {
    /// Map a reqwest error onto the tier taxonomy.
    pub fn from_reqwest(source_name: &str, err: &reqwest::Error, budget: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                source_name: source_name.to_string(),
                after: budget,
            }
        } else if err.is_decode() {
            Self::Malformed {
                source_name: source_name.to_string(),
                reason: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Status {
                source_name: source_name.to_string(),
                status: status.as_u16(),
            }
        } else {
            Self::Transport {
                source_name: source_name.to_string(),
                reason: err.to_string(),
            }
        }
    }

    /// Whether the failure was a timeout (stream or HTTP).
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Stream(StreamError::RequestTimeout { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let http = SourceError::Timeout {
            source_name: "primary".into(),
            after: Duration::from_secs(3),
        };
        assert!(http.is_timeout());
        assert_eq!(http.to_string(), "primary timed out after 3000ms");

        let stream = SourceError::from(StreamError::RequestTimeout {
            symbol: "BTCUSDT".into(),
            kind: ResponseKind::Indicators,
        });
        assert!(stream.is_timeout());

        let rejected = SourceError::Rejected {
            source_name: "external".into(),
            reason: "bad symbol".into(),
        };
        assert!(!rejected.is_timeout());
    }
}
