//! Stream Client - WebSocket Transport Actor for the Stream Session
//!
//! Owns the socket and every timer, and feeds channel events into a
//! `StreamSession`. The session answers with `SessionAction`s, which the
//! actor executes in order. Callers talk to the actor through a cloneable
//! `StreamHandle` (mpsc commands, a watch on connection state, and a
//! broadcast of `StreamEvent`s).
//!
//! Event-driven via tokio::select! over:
//! - caller commands
//! - the in-flight connect future
//! - inbound socket messages
//! - the heartbeat ticker
//! - the reconnect deadline
//! - the request-timeout sweep

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::connection::ConnectionState;
use crate::domain::market::{Payload, SymbolSnapshot};
use crate::domain::subscription::SubscriptionKey;
use crate::error::StreamError;
use crate::ports::stream::{InboundFrame, LiveFeed, StreamEvent};
use crate::usecases::correlator::Reply;
use crate::usecases::stream_session::{SessionAction, SessionConfig, StreamSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type OpenFuture = Pin<Box<dyn Future<Output = Result<WsStream, String>> + Send>>;

/// Event broadcast buffer.
const EVENT_BUFFER: usize = 1024;
/// Command queue depth.
const COMMAND_BUFFER: usize = 256;

/// Transport settings for one stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// Upper bound on the WebSocket handshake.
    pub connect_timeout: Duration,
    /// How often pending correlated requests are checked for expiry.
    pub sweep_interval: Duration,
    /// Session timings.
    pub session: SessionConfig,
}

impl StreamClientConfig {
    /// Defaults for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_millis(500),
            session: SessionConfig::default(),
        }
    }
}

/// Caller → actor commands.
enum Command {
    Connect,
    Reconnect,
    Disconnect,
    Shutdown(oneshot::Sender<()>),
    Subscribe {
        key: SubscriptionKey,
        reply: oneshot::Sender<bool>,
    },
    Unsubscribe(String),
    RequestIndicators {
        symbol: String,
        interval: String,
        reply: Reply,
    },
    Snapshot {
        symbol: String,
        live_only: bool,
        reply: oneshot::Sender<Option<SymbolSnapshot>>,
    },
}

/// Cloneable handle to a running stream client.
#[derive(Clone)]
pub struct StreamHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<StreamEvent>,
}

impl StreamHandle {
    /// Open the channel. Coalesced while a channel is active.
    pub async fn connect(&self) -> Result<(), StreamError> {
        self.send(Command::Connect).await
    }

    /// Reset the reconnect budget and connect if disconnected.
    pub async fn reconnect(&self) -> Result<(), StreamError> {
        self.send(Command::Reconnect).await
    }

    /// Close the channel, keeping subscriptions for the next connect.
    pub async fn disconnect(&self) -> Result<(), StreamError> {
        self.send(Command::Disconnect).await
    }

    /// Track a subscription. `Ok(false)` unless authenticated.
    pub async fn subscribe(&self, key: SubscriptionKey) -> Result<bool, StreamError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe { key, reply }).await?;
        rx.await.map_err(|_| StreamError::ClientClosed)
    }

    /// Stop tracking every subscription for `symbol`.
    pub async fn unsubscribe(&self, symbol: &str) -> Result<(), StreamError> {
        self.send(Command::Unsubscribe(symbol.to_string())).await
    }

    /// Correlated indicator request over the channel.
    pub async fn request_indicators(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<Payload, StreamError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RequestIndicators {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| StreamError::ClientClosed)?
    }

    /// Latest pushed snapshot for `symbol`, regardless of channel state.
    pub async fn snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.query_snapshot(symbol, false).await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `target`, up to `within`.
    pub async fn wait_for_state(&self, target: ConnectionState, within: Duration) -> bool {
        let mut rx = self.state.clone();
        matches!(
            tokio::time::timeout(within, rx.wait_for(|s| *s == target)).await,
            Ok(Ok(_))
        )
    }

    /// Subscribe to client events.
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Terminal teardown. Returns once the actor has closed the channel.
    pub async fn shutdown(&self) -> Result<(), StreamError> {
        let (done, rx) = oneshot::channel();
        self.send(Command::Shutdown(done)).await?;
        rx.await.map_err(|_| StreamError::ClientClosed)
    }

    async fn query_snapshot(&self, symbol: &str, live_only: bool) -> Option<SymbolSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot {
            symbol: symbol.to_string(),
            live_only,
            reply,
        })
        .await
        .ok()?;
        rx.await.ok().flatten()
    }

    async fn send(&self, command: Command) -> Result<(), StreamError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| StreamError::ClientClosed)
    }
}

#[async_trait]
impl LiveFeed for StreamHandle {
    async fn live_snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.query_snapshot(symbol, true).await
    }
}

/// Spawner for the transport actor.
pub struct StreamClient;

impl StreamClient {
    /// Spawn a disconnected client. Call `connect()` on the handle to
    /// open the channel.
    pub fn spawn(
        config: StreamClientConfig,
        credential: impl Into<String>,
    ) -> (StreamHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let session_id = Uuid::new_v4();
        let span = info_span!("stream_client", session_id = %session_id);

        let actor = StreamActor {
            session: StreamSession::new(config.session.clone(), credential),
            config,
            commands: commands_rx,
            state_tx,
            events: events_tx.clone(),
            socket: None,
            opening: None,
            heartbeat: None,
            reconnect_at: None,
        };
        let task = tokio::spawn(actor.run().instrument(span));

        let handle = StreamHandle {
            commands: commands_tx,
            state: state_rx,
            events: events_tx,
        };
        (handle, task)
    }
}

/// The transport actor.
struct StreamActor {
    config: StreamClientConfig,
    session: StreamSession,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<StreamEvent>,
    socket: Option<WsStream>,
    opening: Option<OpenFuture>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
}

impl StreamActor {
    async fn run(mut self) {
        info!(url = %self.config.url, "Stream client started");
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All handles dropped, shutting down");
                        let actions = self.session.shutdown();
                        self.execute(actions).await;
                        break;
                    };
                    if self.handle_command(command).await {
                        break;
                    }
                }
                opened = next_open(&mut self.opening) => {
                    self.opening = None;
                    let actions = match opened {
                        Ok(ws) => {
                            info!("Stream channel open");
                            self.socket = Some(ws);
                            self.session.on_channel_open()
                        }
                        Err(reason) => self.session.on_channel_closed(&reason),
                    };
                    self.execute(actions).await;
                }
                message = next_message(&mut self.socket) => {
                    let actions = self.handle_message(message);
                    self.execute(actions).await;
                }
                _ = next_tick(&mut self.heartbeat) => {
                    let actions = self.session.on_heartbeat_tick(Instant::now());
                    self.execute(actions).await;
                }
                _ = deadline(self.reconnect_at) => {
                    self.reconnect_at = None;
                    let actions = self.session.on_reconnect_timer();
                    self.execute(actions).await;
                }
                _ = sweep.tick() => {
                    let actions = self.session.on_sweep(Instant::now());
                    self.execute(actions).await;
                }
            }
        }
        info!("Stream client stopped");
    }

    /// Returns `true` when the actor must stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        let actions = match command {
            Command::Connect => self.session.connect(),
            Command::Reconnect => self.session.reconnect(),
            Command::Disconnect => self.session.disconnect(),
            Command::Shutdown(done) => {
                let actions = self.session.shutdown();
                self.execute(actions).await;
                self.commands.close();
                let _ = done.send(());
                return true;
            }
            Command::Subscribe { key, reply } => {
                let (accepted, actions) = self.session.subscribe(key);
                let _ = reply.send(accepted);
                actions
            }
            Command::Unsubscribe(symbol) => self.session.unsubscribe(&symbol),
            Command::RequestIndicators {
                symbol,
                interval,
                reply,
            } => self
                .session
                .request_indicators(&symbol, &interval, reply, Instant::now()),
            Command::Snapshot {
                symbol,
                live_only,
                reply,
            } => {
                let usable = !live_only
                    || (self.session.state() == ConnectionState::Authenticated
                        && self.session.subscriptions().contains_symbol(&symbol));
                let snapshot = usable
                    .then(|| self.session.snapshot(&symbol).cloned())
                    .flatten();
                let _ = reply.send(snapshot);
                Vec::new()
            }
        };
        self.execute(actions).await;
        false
    }

    fn handle_message(
        &mut self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Vec<SessionAction> {
        match message {
            Some(Ok(Message::Text(text))) => match InboundFrame::parse(&text) {
                Ok(frame) => self.session.on_frame(frame),
                Err(e) => {
                    debug!(error = %e, "Malformed stream frame ignored");
                    Vec::new()
                }
            },
            Some(Ok(Message::Close(frame))) => {
                self.socket = None;
                let reason = frame.map_or_else(
                    || "closed by server".to_string(),
                    |f| format!("closed by server: {} {}", f.code, f.reason),
                );
                self.session.on_channel_closed(&reason)
            }
            Some(Ok(_)) => Vec::new(),
            Some(Err(e)) => {
                self.socket = None;
                self.session.on_channel_closed(&format!("stream error: {e}"))
            }
            None => {
                self.socket = None;
                self.session.on_channel_closed("stream ended")
            }
        }
    }

    async fn execute(&mut self, actions: Vec<SessionAction>) {
        let mut queue: VecDeque<SessionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::OpenChannel => self.open_channel(),
                SessionAction::CloseChannel => {
                    self.close_channel().await;
                    queue.extend(self.session.on_channel_closed("channel closed locally"));
                }
                SessionAction::Send(frame) => {
                    let Some(ws) = self.socket.as_mut() else {
                        debug!(action = frame.action(), "No open channel, frame dropped");
                        continue;
                    };
                    let json = match frame.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(action = frame.action(), error = %e, "Frame encoding failed");
                            continue;
                        }
                    };
                    if let Err(e) = ws.send(Message::text(json)).await {
                        warn!(action = frame.action(), error = %e, "Frame send failed");
                        self.socket = None;
                        queue.extend(self.session.on_channel_closed(&format!("send failed: {e}")));
                    }
                }
                SessionAction::ScheduleReconnect(delay) => {
                    self.reconnect_at = Some(Instant::now() + delay);
                }
                SessionAction::CancelReconnect => self.reconnect_at = None,
                SessionAction::StartHeartbeat => {
                    let period = self.session.config().heartbeat_interval;
                    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    self.heartbeat = Some(ticker);
                }
                SessionAction::StopHeartbeat => self.heartbeat = None,
                SessionAction::Publish(event) => {
                    if let StreamEvent::StateChanged(state) = event {
                        self.state_tx.send_replace(state);
                    }
                    // No receivers is fine.
                    let _ = self.events.send(event);
                }
            }
        }
    }

    fn open_channel(&mut self) {
        let url = self.config.url.clone();
        let budget = self.config.connect_timeout;
        debug!(url = %url, "Opening stream channel");
        self.opening = Some(Box::pin(async move {
            match tokio::time::timeout(budget, connect_async(url)).await {
                Ok(Ok((ws, _))) => Ok(ws),
                Ok(Err(e)) => Err(format!("connect failed: {e}")),
                Err(_) => Err(format!("connect timed out after {}ms", budget.as_millis())),
            }
        }));
    }

    async fn close_channel(&mut self) {
        self.opening = None;
        if let Some(mut ws) = self.socket.take() {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "Close handshake failed");
            }
        }
    }
}

async fn next_open(opening: &mut Option<OpenFuture>) -> Result<WsStream, String> {
    match opening {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_reports_disconnected_initially() {
        let (handle, _task) = StreamClient::spawn(StreamClientConfig::new("ws://127.0.0.1:1"), "t");
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(handle.snapshot("BTCUSDT").await.is_none());
    }

    #[tokio::test]
    async fn test_subscribe_rejected_before_connect() {
        let (handle, _task) = StreamClient::spawn(StreamClientConfig::new("ws://127.0.0.1:1"), "t");
        let accepted = handle
            .subscribe(SubscriptionKey::new("BTCUSDT", "1m", "scalper"))
            .await
            .unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn test_request_without_auth_fails_fast() {
        let (handle, _task) = StreamClient::spawn(StreamClientConfig::new("ws://127.0.0.1:1"), "t");
        let err = handle.request_indicators("BTCUSDT", "1m").await.unwrap_err();
        assert_eq!(err, StreamError::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let (handle, task) = StreamClient::spawn(StreamClientConfig::new("ws://127.0.0.1:1"), "t");
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert_eq!(handle.connect().await, Err(StreamError::ClientClosed));
    }
}
