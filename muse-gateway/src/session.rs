//! Gateway session implementation.
//!
//! A [`Session`] owns one websocket connection to the gateway and one
//! heartbeat clock. The client runs two of them concurrently: a *user*
//! session, whose READY session id authenticates interaction requests, and
//! a *bot* session, which receives richer event payloads. Both dispatch
//! their message events into the same channel.

use crate::backoff::{exponential_backoff, invalid_session_delay, with_jitter};
use crate::error::{CloseCode, GatewayError};
use crate::event::{parse_event, GatewayEvent};
use crate::heartbeat::HeartbeatHandler;
use crate::opcode::OpCode;
use crate::payload::{
    create_heartbeat_payload, ConnectionProperties, GatewayPayload, HelloPayload, IdentifyPayload,
    RawGatewayPayload, ReadyPayload, ResumePayload,
};
use crate::{DEFAULT_GATEWAY_URL, GATEWAY_VERSION};

use flume::Sender;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Internal action to take after parsing a frame.
enum GatewayAction {
    Dispatch(GatewayEvent),
    Heartbeat,
    Reconnect,
    InvalidSession(bool),
    None,
}

/// Type alias for the websocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Which identity a session authenticates as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// A regular user account. Interactions may only be sent under this
    /// identity, so its READY session id is what the transport signs
    /// requests with.
    User,
    /// An application bot account.
    Bot,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::User => f.write_str("user"),
            SessionKind::Bot => f.write_str("bot"),
        }
    }
}

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the websocket, waiting for Hello.
    Connecting,
    /// Sent Identify, waiting for READY.
    Identifying,
    /// Fully connected and receiving events.
    Ready,
    /// Re-establishing a previous session.
    Resuming,
    /// Not running.
    Closed,
}

/// Configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Authentication token.
    pub token: String,

    /// Identity the token belongs to.
    pub kind: SessionKind,

    /// Gateway intents mask.
    pub intents: muse_model::Intents,

    /// Gateway URL.
    pub gateway_url: String,

    /// Base reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,

    /// Maximum reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
}

impl SessionConfig {
    /// Create a new session configuration with required fields.
    pub fn new(token: impl Into<String>, kind: SessionKind) -> Self {
        Self {
            token: token.into(),
            kind,
            intents: muse_model::Intents::default(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
        }
    }

    /// Set a custom gateway URL.
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }
}

/// Session data for resuming connections.
#[derive(Debug, Clone)]
struct SessionData {
    /// Session ID from the READY event.
    session_id: String,
    /// Resume URL from the READY event.
    resume_url: Option<String>,
}

/// Signal broadcast when the session reaches (or fails to reach) READY.
#[derive(Debug, Clone)]
enum ReadySignal {
    Pending,
    Ready(String),
    Failed(u16),
}

/// A gateway session.
///
/// Handles the websocket connection, heartbeating, event dispatch, and
/// automatic reconnection with session resumption. Transient failures are
/// retried indefinitely with capped backoff; fatal close codes surface as
/// [`GatewayError::AuthenticationFailed`].
pub struct Session {
    /// Session configuration.
    config: SessionConfig,

    /// Current connection state.
    state: RwLock<SessionState>,

    /// Session data for resuming.
    session: RwLock<Option<SessionData>>,

    /// Last sequence number received.
    sequence: AtomicU64,

    /// Heartbeat handler.
    heartbeat: HeartbeatHandler,

    /// Whether shutdown has been requested.
    shutdown: AtomicBool,

    /// Wakes the event loop when shutdown is requested.
    shutdown_notify: Notify,

    /// Broadcasts READY acquisition to waiters.
    ready_tx: watch::Sender<ReadySignal>,
}

impl Session {
    /// Create a new session.
    pub fn new(config: SessionConfig) -> Self {
        let (ready_tx, _) = watch::channel(ReadySignal::Pending);

        Self {
            config,
            state: RwLock::new(SessionState::Closed),
            session: RwLock::new(None),
            sequence: AtomicU64::new(0),
            heartbeat: HeartbeatHandler::default(),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            ready_tx,
        }
    }

    /// The identity this session authenticates as.
    pub fn kind(&self) -> SessionKind {
        self.config.kind
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Get the last sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Session id assigned at READY, if the session has connected.
    pub fn session_id(&self) -> Option<String> {
        self.session.read().as_ref().map(|s| s.session_id.clone())
    }

    /// Get the last measured heartbeat latency.
    pub fn latency(&self) -> Option<Duration> {
        self.heartbeat.latency()
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    /// Wait until the session reports READY, returning its session id.
    ///
    /// Fails fast when the gateway closes with a fatal code, and with
    /// [`GatewayError::ReadyTimeout`] when `limit` elapses first.
    pub async fn wait_ready(&self, limit: Duration) -> Result<String, GatewayError> {
        let mut rx = self.ready_tx.subscribe();

        let outcome = timeout(limit, async {
            loop {
                let current = rx.borrow().clone();
                match current {
                    ReadySignal::Ready(session_id) => return Ok(session_id),
                    ReadySignal::Failed(code) => {
                        return Err(GatewayError::AuthenticationFailed { code })
                    }
                    ReadySignal::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return Err(GatewayError::NotConnected);
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(GatewayError::ReadyTimeout),
        }
    }

    /// Run the session event loop.
    ///
    /// Connects to the gateway, handles events, and reconnects on
    /// disconnection. Message events are sent to the provided channel.
    ///
    /// Returns `Ok(())` on graceful shutdown, or an error when the close
    /// code is fatal.
    pub async fn run(&self, event_tx: Sender<GatewayEvent>) -> Result<(), GatewayError> {
        let mut reconnect_attempts = 0u32;

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!(session = %self.config.kind, "Session shutdown requested");
                *self.state.write() = SessionState::Closed;
                return Ok(());
            }

            match self.connect_and_run(&event_tx).await {
                Ok(()) => {
                    *self.state.write() = SessionState::Closed;
                    return Ok(());
                }
                Err(GatewayError::HeartbeatTimeout) => {
                    warn!(session = %self.config.kind, "Heartbeat timeout, resuming");
                    reconnect_attempts += 1;
                }
                Err(GatewayError::InvalidSession { resumable }) => {
                    if !resumable {
                        *self.session.write() = None;
                        self.sequence.store(0, Ordering::SeqCst);
                    }
                    warn!(
                        session = %self.config.kind,
                        resumable,
                        "Session invalidated, re-identifying"
                    );
                    // Fresh identify only after a jittered 1-5s delay.
                    sleep(invalid_session_delay()).await;
                    continue;
                }
                Err(GatewayError::Closed { code, reason }) => {
                    if let Some(close_code) = CloseCode::from_code(code) {
                        if close_code.is_fatal() {
                            error!(
                                session = %self.config.kind,
                                code,
                                reason = %reason,
                                "Fatal close code, not reconnecting"
                            );
                            *self.state.write() = SessionState::Closed;
                            let _ = self.ready_tx.send(ReadySignal::Failed(code));
                            return Err(GatewayError::AuthenticationFailed { code });
                        }
                        if !close_code.is_resumable() {
                            *self.session.write() = None;
                            self.sequence.store(0, Ordering::SeqCst);
                        }
                    }
                    warn!(
                        session = %self.config.kind,
                        code,
                        reason = %reason,
                        "Connection closed, reconnecting"
                    );
                    reconnect_attempts += 1;
                }
                Err(e) => {
                    warn!(session = %self.config.kind, error = %e, "Session error, reconnecting");
                    reconnect_attempts += 1;
                }
            }

            // Transient failures are retried indefinitely with capped
            // backoff.
            let backoff = exponential_backoff(
                reconnect_attempts.saturating_sub(1),
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
            );
            let backoff = with_jitter(backoff, 0.25);

            info!(
                session = %self.config.kind,
                attempt = reconnect_attempts,
                backoff_ms = backoff.as_millis(),
                "Waiting before reconnect"
            );

            *self.state.write() = if self.session.read().is_some() {
                SessionState::Resuming
            } else {
                SessionState::Connecting
            };

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = self.shutdown_notify.notified() => {}
            }
        }
    }

    /// Connect and run the event loop once.
    async fn connect_and_run(&self, event_tx: &Sender<GatewayEvent>) -> Result<(), GatewayError> {
        let gateway_url = self.build_gateway_url()?;

        info!(session = %self.config.kind, url = %gateway_url, "Connecting to gateway");
        *self.state.write() = SessionState::Connecting;

        let (ws_stream, _response) = connect_async(gateway_url.as_str()).await?;
        let (mut sink, mut stream) = ws_stream.split();

        let hello = self.wait_for_hello(&mut stream).await?;
        let heartbeat_interval = Duration::from_millis(hello.heartbeat_interval);
        self.heartbeat.set_interval(heartbeat_interval);

        debug!(
            session = %self.config.kind,
            interval_ms = hello.heartbeat_interval,
            "Received Hello"
        );

        let session = self.session.read().clone();
        if let Some(ref session_data) = session {
            *self.state.write() = SessionState::Resuming;
            info!(
                session = %self.config.kind,
                session_id = %session_data.session_id,
                "Resuming session"
            );
            self.send_resume(&mut sink, session_data).await?;
        } else {
            *self.state.write() = SessionState::Identifying;
            info!(session = %self.config.kind, "Sending Identify");
            self.send_identify(&mut sink).await?;
        }

        self.heartbeat.reset();

        // Immediate heartbeat to get latency measured right away.
        self.send_heartbeat(&mut sink).await?;
        self.heartbeat.mark_sent();

        let mut next_heartbeat = Instant::now() + heartbeat_interval;

        loop {
            // An unacknowledged heartbeat has until twice the interval
            // after it was sent before the connection counts as a zombie.
            let ack_deadline = self.heartbeat.ack_deadline();

            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(msg)) => {
                            self.handle_message(msg, event_tx, &mut sink).await?;
                        }
                        Some(Err(e)) => {
                            return Err(GatewayError::WebSocket(e));
                        }
                        None => {
                            return Err(GatewayError::Closed {
                                code: 0,
                                reason: "WebSocket stream ended".to_string(),
                            });
                        }
                    }
                }

                _ = sleep(next_heartbeat.saturating_duration_since(Instant::now())) => {
                    if self.heartbeat.is_acked() {
                        self.send_heartbeat(&mut sink).await?;
                        self.heartbeat.mark_sent();
                    } else {
                        // Still inside the ack window; hold this beat so
                        // the outstanding send keeps its deadline.
                        debug!(
                            session = %self.config.kind,
                            "Heartbeat ACK outstanding, skipping beat"
                        );
                    }

                    next_heartbeat = Instant::now() + self.heartbeat.interval();
                }

                _ = sleep(ack_deadline.saturating_duration_since(Instant::now())),
                        if !self.heartbeat.is_acked() => {
                    error!(
                        session = %self.config.kind,
                        "No heartbeat ACK within twice the interval, assuming zombie connection"
                    );
                    return Err(GatewayError::HeartbeatTimeout);
                }

                _ = self.shutdown_notify.notified() => {
                    let _ = sink.close().await;
                    return Ok(());
                }
            }
        }
    }

    /// Build the gateway URL with query parameters.
    fn build_gateway_url(&self) -> Result<Url, GatewayError> {
        // Use the resume URL when one was handed out at READY.
        let base_url = self
            .session
            .read()
            .as_ref()
            .and_then(|s| s.resume_url.clone())
            .unwrap_or_else(|| self.config.gateway_url.clone());

        let mut url = Url::parse(&base_url)?;
        url.query_pairs_mut()
            .append_pair("v", &GATEWAY_VERSION.to_string())
            .append_pair("encoding", "json");

        Ok(url)
    }

    /// Wait for the Hello payload after connecting.
    async fn wait_for_hello(
        &self,
        stream: &mut futures_util::stream::SplitStream<WsStream>,
    ) -> Result<HelloPayload, GatewayError> {
        let hello_timeout = Duration::from_secs(10);

        let message = timeout(hello_timeout, stream.next())
            .await
            .map_err(|_| GatewayError::Closed {
                code: 0,
                reason: "Timeout waiting for Hello".to_string(),
            })?
            .ok_or_else(|| GatewayError::Closed {
                code: 0,
                reason: "Connection closed before Hello".to_string(),
            })??;

        if let WsMessage::Text(text) = message {
            let payload: RawGatewayPayload = serde_json::from_str(text.as_str())?;

            if payload.op == OpCode::Hello {
                if let Some(data) = payload.d {
                    let hello: HelloPayload = serde_json::from_str(data.get())?;
                    return Ok(hello);
                }
            }
        }

        Err(GatewayError::Closed {
            code: 0,
            reason: "Expected Hello payload".to_string(),
        })
    }

    /// Send an Identify payload.
    async fn send_identify(
        &self,
        sink: &mut futures_util::stream::SplitSink<WsStream, WsMessage>,
    ) -> Result<(), GatewayError> {
        let properties = match self.config.kind {
            SessionKind::User => ConnectionProperties::official_client(),
            SessionKind::Bot => ConnectionProperties::library(),
        };

        let identify = IdentifyPayload::new(
            std::borrow::Cow::Borrowed(self.config.token.as_str()),
            self.config.intents,
            properties,
        );

        let payload = GatewayPayload::new(OpCode::Identify, identify);
        let json = serde_json::to_string(&payload)?;

        trace!(session = %self.config.kind, "Sending Identify payload");
        sink.send(WsMessage::Text(json.into())).await?;

        Ok(())
    }

    /// Send a Resume payload.
    async fn send_resume(
        &self,
        sink: &mut futures_util::stream::SplitSink<WsStream, WsMessage>,
        session: &SessionData,
    ) -> Result<(), GatewayError> {
        let resume = ResumePayload {
            token: std::borrow::Cow::Borrowed(self.config.token.as_str()),
            session_id: std::borrow::Cow::Borrowed(session.session_id.as_str()),
            seq: self.sequence.load(Ordering::SeqCst),
        };

        let payload = GatewayPayload::new(OpCode::Resume, resume);
        let json = serde_json::to_string(&payload)?;

        trace!(session = %self.config.kind, "Sending Resume payload");
        sink.send(WsMessage::Text(json.into())).await?;

        Ok(())
    }

    /// Send a Heartbeat payload.
    async fn send_heartbeat(
        &self,
        sink: &mut futures_util::stream::SplitSink<WsStream, WsMessage>,
    ) -> Result<(), GatewayError> {
        let seq = self.sequence.load(Ordering::SeqCst);
        let seq_opt = if seq > 0 { Some(seq) } else { None };

        let json = create_heartbeat_payload(seq_opt);

        trace!(session = %self.config.kind, seq, "Sending Heartbeat");
        sink.send(WsMessage::Text(json.into())).await?;

        Ok(())
    }

    /// Handle a received websocket message.
    async fn handle_message(
        &self,
        message: WsMessage,
        event_tx: &Sender<GatewayEvent>,
        sink: &mut futures_util::stream::SplitSink<WsStream, WsMessage>,
    ) -> Result<(), GatewayError> {
        let action = match message {
            WsMessage::Text(text) => self.process_frame(text.as_str())?,
            WsMessage::Binary(_) => {
                // Compression is never negotiated; a binary frame is not
                // ours to decode.
                trace!(session = %self.config.kind, "Ignoring binary frame");
                GatewayAction::None
            }
            WsMessage::Close(frame) => {
                let (code, reason) = frame
                    .map(|f: CloseFrame| (f.code.into(), f.reason.to_string()))
                    .unwrap_or((0, String::new()));

                return Err(GatewayError::Closed { code, reason });
            }
            WsMessage::Ping(data) => {
                sink.send(WsMessage::Pong(data)).await?;
                return Ok(());
            }
            WsMessage::Pong(_) => return Ok(()),
            WsMessage::Frame(_) => return Ok(()),
        };

        match action {
            GatewayAction::Dispatch(event) => {
                event_tx.send_async(event).await?;
            }
            GatewayAction::Heartbeat => {
                debug!(session = %self.config.kind, "Received Heartbeat request");
                self.send_heartbeat(sink).await?;
            }
            GatewayAction::Reconnect => {
                info!(session = %self.config.kind, "Received Reconnect request");
                return Err(GatewayError::Closed {
                    code: 0,
                    reason: "Server requested reconnect".to_string(),
                });
            }
            GatewayAction::InvalidSession(resumable) => {
                warn!(session = %self.config.kind, resumable, "Session invalidated");
                return Err(GatewayError::InvalidSession { resumable });
            }
            GatewayAction::None => {}
        }

        Ok(())
    }

    /// Process a text frame (JSON) and determine the action.
    ///
    /// Synchronous; never holds locks across awaits.
    fn process_frame(&self, text: &str) -> Result<GatewayAction, GatewayError> {
        let payload: RawGatewayPayload = serde_json::from_str(text)?;

        if let Some(seq) = payload.s {
            self.sequence.store(seq, Ordering::SeqCst);
        }

        match payload.op {
            OpCode::Dispatch => {
                if let (Some(event_name), Some(data)) = (payload.t.as_deref(), payload.d) {
                    let event = parse_event(event_name, data)?;

                    match &event {
                        GatewayEvent::Ready(ready) => {
                            self.handle_ready(ready);
                            return Ok(GatewayAction::None);
                        }
                        GatewayEvent::Resumed => {
                            info!(session = %self.config.kind, "Session resumed");
                            *self.state.write() = SessionState::Ready;
                            return Ok(GatewayAction::None);
                        }
                        GatewayEvent::Unknown(name) => {
                            trace!(session = %self.config.kind, event = %name, "Dropping event");
                            return Ok(GatewayAction::None);
                        }
                        _ => {}
                    }

                    return Ok(GatewayAction::Dispatch(event));
                }
            }

            OpCode::Heartbeat => return Ok(GatewayAction::Heartbeat),
            OpCode::Reconnect => return Ok(GatewayAction::Reconnect),

            OpCode::InvalidSession => {
                let resumable = payload
                    .d
                    .map(|d| d.get().trim() == "true")
                    .unwrap_or(false);
                return Ok(GatewayAction::InvalidSession(resumable));
            }

            OpCode::HeartbeatAck => {
                self.heartbeat.mark_acked();
                let rtt = self.heartbeat.latency().unwrap_or_default();
                trace!(
                    session = %self.config.kind,
                    rtt_ms = rtt.as_millis(),
                    "Heartbeat ACK received"
                );
            }

            _ => {
                trace!(session = %self.config.kind, op = ?payload.op, "Ignoring opcode");
            }
        }

        Ok(GatewayAction::None)
    }

    /// Handle the READY event: record session data and wake waiters.
    fn handle_ready(&self, ready: &ReadyPayload) {
        *self.session.write() = Some(SessionData {
            session_id: ready.session_id.clone(),
            resume_url: ready.resume_gateway_url.clone(),
        });
        *self.state.write() = SessionState::Ready;
        let _ = self.ready_tx.send(ReadySignal::Ready(ready.session_id.clone()));

        info!(
            session = %self.config.kind,
            session_id = %ready.session_id,
            user = %ready.user.id,
            "Session ready"
        );
    }
}
