//! Stream Port - Duplex Channel Wire Frames and Events
//!
//! Defines the JSON envelopes exchanged over the market-data WebSocket and
//! the typed events the stream client publishes to its consumers. The
//! session logic only sees these types, never the socket.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::connection::ConnectionState;
use crate::domain::market::{Payload, SymbolSnapshot};

/// Read side of the push feed, as seen by consumers.
#[async_trait]
pub trait LiveFeed: Send + Sync + 'static {
    /// Latest pushed snapshot for `symbol`. `None` unless the channel is
    /// authenticated and the symbol is subscribed.
    async fn live_snapshot(&self, symbol: &str) -> Option<SymbolSnapshot>;
}

/// Client → server frames, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Present the credential.
    Authenticate {
        /// Bearer token.
        token: String,
    },
    /// Start a push feed.
    Subscribe {
        /// Trading pair.
        symbol: String,
        /// Candle interval.
        interval: String,
        /// Strategy tag.
        strategy: String,
    },
    /// Stop every push feed for a symbol.
    Unsubscribe {
        /// Trading pair.
        symbol: String,
    },
    /// One-shot indicator computation (correlated response).
    GetIndicators {
        /// Trading pair.
        symbol: String,
        /// Candle interval.
        interval: String,
    },
    /// Keep-alive.
    Ping,
}

impl OutboundFrame {
    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Short name for logs.
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::GetIndicators { .. } => "get_indicators",
            Self::Ping => "ping",
        }
    }
}

/// Server → client frames, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Credential accepted.
    AuthenticationSuccess {
        /// Authenticated identity (string or number on the wire).
        #[serde(default)]
        user_id: Option<Value>,
    },
    /// Credential rejected.
    AuthenticationError {
        /// Error text.
        #[serde(default)]
        error: Option<String>,
        /// Alternative error text field.
        #[serde(default)]
        message: Option<String>,
    },
    /// Server demands authentication.
    AuthenticationRequired {
        /// Error text.
        #[serde(default)]
        error: Option<String>,
        /// Alternative error text field.
        #[serde(default)]
        message: Option<String>,
    },
    /// Subscription accepted.
    SubscriptionConfirmed {
        /// Trading pair.
        symbol: String,
    },
    /// Subscription refused.
    SubscriptionError {
        /// Trading pair.
        symbol: String,
        /// Reason.
        #[serde(default)]
        error: Option<String>,
    },
    /// Pushed snapshot for a subscribed symbol.
    SmartScalperUpdate {
        /// Trading pair.
        symbol: String,
        /// Snapshot payload.
        #[serde(default)]
        data: Payload,
    },
    /// Correlated answer to `get_indicators`.
    IndicatorsResponse {
        /// Trading pair.
        symbol: String,
        /// Indicator payload.
        #[serde(default)]
        data: Payload,
    },
    /// Keep-alive answer.
    Pong,
    /// Any frame type this client does not handle.
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Decode a JSON text frame.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Pick whichever reason field the server filled in.
    pub fn auth_reason(error: Option<&str>, message: Option<&str>) -> String {
        error
            .or(message)
            .unwrap_or("authentication rejected")
            .to_string()
    }
}

/// Events published by the stream client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// Credential accepted.
    Authenticated {
        /// Reported identity.
        user_id: Option<String>,
    },
    /// Credential rejected; the owning session must refresh or log out.
    AuthenticationFailed {
        /// Server-supplied reason.
        reason: String,
    },
    /// Server confirmed a subscription.
    SubscriptionConfirmed {
        /// Trading pair.
        symbol: String,
    },
    /// Server rejected a subscription (other symbols unaffected).
    SubscriptionFailed {
        /// Trading pair.
        symbol: String,
        /// Reason.
        reason: String,
    },
    /// Fresh pushed snapshot.
    Snapshot(SymbolSnapshot),
    /// Channel lost unexpectedly.
    ConnectionLost {
        /// Cause.
        reason: String,
    },
    /// Automatic reconnect armed.
    ReconnectScheduled {
        /// Attempt number (1-based).
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Automatic reconnection gave up; call `reconnect()` to resume.
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
}
