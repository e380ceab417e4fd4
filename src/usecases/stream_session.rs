//! Stream Session - Connection State Machine and Dispatch
//!
//! The authoritative transition table for the duplex channel. Every input
//! (caller command, channel event, inbound frame, timer tick) is a method
//! returning the `SessionAction`s the transport actor must execute. The
//! session never touches the socket or a timer itself, so all of its
//! behaviour is testable without I/O.
//!
//! Lifecycle:
//! `Disconnected → Connecting → ConnectedUnauthenticated → Authenticated
//!  → Closing → Disconnected`
//!
//! Unexpected channel loss schedules a fixed-delay reconnect while the
//! attempt budget lasts. The budget resets only through `reconnect()`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::correlator::{Delivery, Registration, Reply, RequestCorrelator, RequestKey};
use crate::domain::connection::{Connection, ConnectionState};
use crate::domain::market::{ResponseKind, SourceTag, Symbol, SymbolSnapshot};
use crate::domain::subscription::{SubscriptionKey, SubscriptionRegistry};
use crate::error::StreamError;
use crate::ports::stream::{InboundFrame, OutboundFrame, StreamEvent};

/// Session timings and bounds.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between `ping` frames while a channel is open.
    pub heartbeat_interval: Duration,
    /// Fixed delay before each automatic reconnect.
    pub reconnect_delay: Duration,
    /// Automatic reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Wait bound for correlated responses.
    pub request_timeout: Duration,
    /// Close the channel when no `pong` arrives within this window.
    /// `None` disables the check.
    pub pong_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            request_timeout: Duration::from_secs(10),
            pong_timeout: None,
        }
    }
}

/// Side effect requested from the transport actor.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Start opening the channel.
    OpenChannel,
    /// Close the channel (or abandon an open in flight).
    CloseChannel,
    /// Write a frame.
    Send(OutboundFrame),
    /// Arm the single reconnect timer.
    ScheduleReconnect(Duration),
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Start the heartbeat ticker.
    StartHeartbeat,
    /// Stop the heartbeat ticker.
    StopHeartbeat,
    /// Deliver an event to consumers.
    Publish(StreamEvent),
}

/// Connection, subscriptions, pending requests and live snapshots for one
/// client instance.
pub struct StreamSession {
    config: SessionConfig,
    credential: String,
    connection: Connection,
    subscriptions: SubscriptionRegistry,
    correlator: RequestCorrelator,
    snapshots: HashMap<Symbol, SymbolSnapshot>,
    reconnect_armed: bool,
    auth_failure: Option<String>,
    awaiting_pong_since: Option<Instant>,
}

impl StreamSession {
    /// New disconnected session.
    pub fn new(config: SessionConfig, credential: impl Into<String>) -> Self {
        let correlator = RequestCorrelator::new(config.request_timeout);
        Self {
            config,
            credential: credential.into(),
            connection: Connection::new(),
            subscriptions: SubscriptionRegistry::new(),
            correlator,
            snapshots: HashMap::new(),
            reconnect_armed: false,
            auth_failure: None,
            awaiting_pong_since: None,
        }
    }

    // ── Accessors ───────────────────────────────────────────

    /// Current connection state.
    pub const fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The connection record.
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Tracked subscriptions.
    pub const fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Latest pushed snapshot for `symbol`.
    pub fn snapshot(&self, symbol: &str) -> Option<&SymbolSnapshot> {
        self.snapshots.get(symbol)
    }

    /// Number of distinct pending correlated requests.
    pub fn pending_requests(&self) -> usize {
        self.correlator.len()
    }

    /// Session configuration.
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── Caller commands ─────────────────────────────────────

    /// Open the channel. Coalesced while not disconnected.
    pub fn connect(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        self.auth_failure = None;
        if self.state() != ConnectionState::Disconnected {
            debug!(state = %self.state(), "Connect ignored, channel already active");
            return actions;
        }
        self.disarm_reconnect(&mut actions);
        self.begin_open(&mut actions);
        actions
    }

    /// Reset the attempt budget and connect if disconnected.
    pub fn reconnect(&mut self) -> Vec<SessionAction> {
        self.connection.reset_reconnect_attempts();
        info!("Reconnect requested, attempt budget reset");
        self.connect()
    }

    /// Close the channel, clear timers and fail pending requests.
    /// Subscriptions are kept for the next `connect()`.
    pub fn disconnect(&mut self) -> Vec<SessionAction> {
        let mut actions = vec![SessionAction::StopHeartbeat];
        self.disarm_reconnect(&mut actions);
        self.awaiting_pong_since = None;
        self.subscriptions.clear_confirmations();

        let failed = self.correlator.fail_all(&StreamError::Cancelled);
        if failed > 0 {
            debug!(failed, "Pending requests cancelled by disconnect");
        }

        match self.state() {
            ConnectionState::Disconnected | ConnectionState::Closing => {}
            _ => {
                self.set_state(ConnectionState::Closing, &mut actions);
                actions.push(SessionAction::CloseChannel);
            }
        }
        actions
    }

    /// Terminal teardown: disconnect and forget every subscription.
    pub fn shutdown(&mut self) -> Vec<SessionAction> {
        let actions = self.disconnect();
        self.subscriptions.clear();
        self.snapshots.clear();
        actions
    }

    /// Track and send a subscription. `false` (no side effect) unless
    /// authenticated.
    pub fn subscribe(&mut self, key: SubscriptionKey) -> (bool, Vec<SessionAction>) {
        if self.state() != ConnectionState::Authenticated {
            debug!(symbol = %key.symbol, state = %self.state(), "Subscribe rejected, not authenticated");
            return (false, Vec::new());
        }
        let frame = subscribe_frame(&key);
        if !self.subscriptions.upsert(key) {
            debug!("Subscription already tracked, resending");
        }
        (true, vec![SessionAction::Send(frame)])
    }

    /// Forget every subscription for `symbol`. No-op for unknown symbols.
    pub fn unsubscribe(&mut self, symbol: &str) -> Vec<SessionAction> {
        let removed = self.subscriptions.remove_symbol(symbol);
        self.snapshots.remove(symbol);
        if removed > 0 && self.state().is_open() {
            return vec![SessionAction::Send(OutboundFrame::Unsubscribe {
                symbol: symbol.to_string(),
            })];
        }
        Vec::new()
    }

    /// Ask for indicators over the channel; `reply` receives the
    /// correlated response or a failure.
    pub fn request_indicators(
        &mut self,
        symbol: &str,
        interval: &str,
        reply: Reply,
        now: Instant,
    ) -> Vec<SessionAction> {
        if self.state() != ConnectionState::Authenticated {
            let _ = reply.send(Err(self.unauthenticated_error()));
            return Vec::new();
        }
        let key = RequestKey::new(symbol, ResponseKind::Indicators);
        match self.correlator.register(key, interval, reply, now) {
            Registration::Send => vec![indicators_frame(symbol, interval)],
            Registration::Joined | Registration::Queued => Vec::new(),
        }
    }

    // ── Channel events ──────────────────────────────────────

    /// The channel finished opening: send the credential.
    pub fn on_channel_open(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.state() != ConnectionState::Connecting {
            warn!(state = %self.state(), "Channel opened outside CONNECTING, ignoring");
            return actions;
        }
        self.set_state(ConnectionState::ConnectedUnauthenticated, &mut actions);
        self.awaiting_pong_since = None;
        actions.push(SessionAction::StartHeartbeat);
        actions.push(SessionAction::Send(OutboundFrame::Authenticate {
            token: self.credential.clone(),
        }));
        actions
    }

    /// The channel closed, errored or failed to open.
    pub fn on_channel_closed(&mut self, reason: &str) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match self.state() {
            ConnectionState::Disconnected => {}
            ConnectionState::Closing => {
                self.set_state(ConnectionState::Disconnected, &mut actions);
                info!("Stream channel closed");
            }
            _ => {
                warn!(reason, state = %self.state(), "Stream channel lost");
                self.set_state(ConnectionState::Disconnected, &mut actions);
                actions.push(SessionAction::StopHeartbeat);
                self.awaiting_pong_since = None;
                self.subscriptions.clear_confirmations();
                self.correlator
                    .fail_all(&StreamError::ConnectionLost(reason.to_string()));
                actions.push(SessionAction::Publish(StreamEvent::ConnectionLost {
                    reason: reason.to_string(),
                }));
                self.schedule_reconnect(&mut actions);
            }
        }
        actions
    }

    /// The reconnect timer fired.
    pub fn on_reconnect_timer(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if !self.reconnect_armed {
            return actions;
        }
        self.reconnect_armed = false;
        if self.state() == ConnectionState::Disconnected {
            info!(
                attempt = self.connection.reconnect_attempts(),
                "Reconnecting stream channel"
            );
            self.begin_open(&mut actions);
        }
        actions
    }

    /// Heartbeat tick: ping while a channel is open.
    pub fn on_heartbeat_tick(&mut self, now: Instant) -> Vec<SessionAction> {
        if !self.state().is_open() {
            return Vec::new();
        }
        if let (Some(limit), Some(since)) = (self.config.pong_timeout, self.awaiting_pong_since) {
            if now.saturating_duration_since(since) >= limit {
                warn!(
                    waited_ms = now.saturating_duration_since(since).as_millis(),
                    "No pong within timeout, dropping channel"
                );
                self.awaiting_pong_since = None;
                return vec![SessionAction::CloseChannel];
            }
        }
        self.awaiting_pong_since.get_or_insert(now);
        vec![SessionAction::Send(OutboundFrame::Ping)]
    }

    /// Periodic sweep of timed-out correlated requests. Requests queued
    /// behind an expired one are sent next.
    pub fn on_sweep(&mut self, now: Instant) -> Vec<SessionAction> {
        let expired = self.correlator.expire(now);
        if !expired.is_empty() {
            debug!(expired = expired.len(), "Correlated requests timed out");
        }
        expired
            .into_iter()
            .filter_map(|(key, next)| next.map(|interval| indicators_frame(&key.symbol, &interval)))
            .collect()
    }

    /// Dispatch one inbound frame.
    pub fn on_frame(&mut self, frame: InboundFrame) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match frame {
            InboundFrame::AuthenticationSuccess { user_id } => {
                self.on_authenticated(user_id, &mut actions);
            }
            InboundFrame::AuthenticationError { error, message }
            | InboundFrame::AuthenticationRequired { error, message } => {
                let reason = InboundFrame::auth_reason(error.as_deref(), message.as_deref());
                self.on_auth_rejected(reason, &mut actions);
            }
            InboundFrame::SubscriptionConfirmed { symbol } => {
                debug!(symbol = %symbol, "Subscription confirmed");
                self.subscriptions.confirm(&symbol);
                actions.push(SessionAction::Publish(StreamEvent::SubscriptionConfirmed {
                    symbol,
                }));
            }
            InboundFrame::SubscriptionError { symbol, error } => {
                let reason = error.unwrap_or_else(|| "subscription rejected".to_string());
                warn!(symbol = %symbol, reason = %reason, "Subscription rejected");
                self.subscriptions.unconfirm(&symbol);
                actions.push(SessionAction::Publish(StreamEvent::SubscriptionFailed {
                    symbol,
                    reason,
                }));
            }
            InboundFrame::SmartScalperUpdate { symbol, data } => {
                if !self.subscriptions.contains_symbol(&symbol) {
                    debug!(symbol = %symbol, "Update for untracked symbol dropped");
                    return actions;
                }
                let snapshot = SymbolSnapshot {
                    symbol: symbol.clone(),
                    data,
                    source: SourceTag::Live,
                    received_at_ms: Utc::now().timestamp_millis(),
                };
                self.snapshots.insert(symbol, snapshot.clone());
                actions.push(SessionAction::Publish(StreamEvent::Snapshot(snapshot)));
            }
            InboundFrame::IndicatorsResponse { symbol, data } => {
                let key = RequestKey::new(symbol, ResponseKind::Indicators);
                if let Delivery::Delivered {
                    next: Some(interval),
                } = self.correlator.resolve(&key, &data, Instant::now())
                {
                    actions.push(indicators_frame(&key.symbol, &interval));
                }
            }
            InboundFrame::Pong => {
                self.awaiting_pong_since = None;
            }
            InboundFrame::Unknown => {
                debug!("Ignoring unknown frame type");
            }
        }
        actions
    }

    // ── Internals ───────────────────────────────────────────

    fn on_authenticated(&mut self, user_id: Option<Value>, actions: &mut Vec<SessionAction>) {
        if self.state() != ConnectionState::ConnectedUnauthenticated {
            warn!(state = %self.state(), "Unexpected authentication_success, ignoring");
            return;
        }
        let identity = user_id.map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        });
        self.connection.set_identity(identity.clone());
        self.set_state(ConnectionState::Authenticated, actions);
        actions.push(SessionAction::Publish(StreamEvent::Authenticated {
            user_id: identity,
        }));

        let replay = self.subscriptions.replay();
        info!(replayed = replay.len(), "Stream authenticated, replaying subscriptions");
        actions.extend(
            replay
                .iter()
                .map(|key| SessionAction::Send(subscribe_frame(key))),
        );
    }

    fn on_auth_rejected(&mut self, reason: String, actions: &mut Vec<SessionAction>) {
        warn!(reason = %reason, "Stream authentication rejected");
        self.auth_failure = Some(reason.clone());
        self.awaiting_pong_since = None;
        self.correlator.fail_all(&StreamError::Authentication {
            reason: reason.clone(),
        });
        actions.push(SessionAction::StopHeartbeat);
        actions.push(SessionAction::Publish(StreamEvent::AuthenticationFailed {
            reason,
        }));
        if matches!(
            self.state(),
            ConnectionState::Connecting
                | ConnectionState::ConnectedUnauthenticated
                | ConnectionState::Authenticated
        ) {
            self.set_state(ConnectionState::Closing, actions);
            actions.push(SessionAction::CloseChannel);
        }
    }

    /// Why a request cannot be served right now.
    fn unauthenticated_error(&self) -> StreamError {
        if let Some(reason) = &self.auth_failure {
            return StreamError::Authentication {
                reason: reason.clone(),
            };
        }
        let attempts = self.connection.reconnect_attempts();
        if self.state() == ConnectionState::Disconnected
            && !self.reconnect_armed
            && attempts > 0
            && attempts >= self.config.max_reconnect_attempts
        {
            return StreamError::ReconnectExhausted { attempts };
        }
        StreamError::NotAuthenticated
    }

    fn schedule_reconnect(&mut self, actions: &mut Vec<SessionAction>) {
        if self.auth_failure.is_some() {
            return;
        }
        let attempts = self.connection.reconnect_attempts();
        if attempts >= self.config.max_reconnect_attempts {
            warn!(attempts, "Reconnect budget exhausted, waiting for explicit reconnect");
            actions.push(SessionAction::Publish(StreamEvent::ReconnectExhausted {
                attempts,
            }));
            return;
        }
        let attempt = self.connection.record_reconnect_attempt();
        let delay = self.config.reconnect_delay;
        self.reconnect_armed = true;
        info!(attempt, delay_ms = delay.as_millis(), "Reconnect scheduled");
        actions.push(SessionAction::ScheduleReconnect(delay));
        actions.push(SessionAction::Publish(StreamEvent::ReconnectScheduled {
            attempt,
            delay,
        }));
    }

    fn disarm_reconnect(&mut self, actions: &mut Vec<SessionAction>) {
        if std::mem::take(&mut self.reconnect_armed) {
            actions.push(SessionAction::CancelReconnect);
        }
    }

    fn begin_open(&mut self, actions: &mut Vec<SessionAction>) {
        self.set_state(ConnectionState::Connecting, actions);
        actions.push(SessionAction::OpenChannel);
    }

    fn set_state(&mut self, next: ConnectionState, actions: &mut Vec<SessionAction>) {
        match self.connection.transition(next) {
            Ok(prev) => {
                debug!(from = %prev, to = %next, "Connection state changed");
                actions.push(SessionAction::Publish(StreamEvent::StateChanged(next)));
            }
            Err(err) => warn!(error = %err, "Transition rejected"),
        }
    }
}

fn indicators_frame(symbol: &str, interval: &str) -> SessionAction {
    SessionAction::Send(OutboundFrame::GetIndicators {
        symbol: symbol.to_string(),
        interval: interval.to_string(),
    })
}

fn subscribe_frame(key: &SubscriptionKey) -> OutboundFrame {
    OutboundFrame::Subscribe {
        symbol: key.symbol.clone(),
        interval: key.interval.clone(),
        strategy: key.strategy.clone(),
    }
}
