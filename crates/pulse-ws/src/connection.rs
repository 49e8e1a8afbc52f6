//! Streaming connection state machine.
//!
//! Owns the physical WebSocket transport and drives connect, disconnect,
//! bounded reconnection and heartbeat timing. Inbound frames are decoded
//! and routed through the event registry; outbound sends pass the health
//! monitor's gate first and fall back to its bounded buffer when blocked.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use pulse_health::HealthMonitor;
use pulse_telemetry::Metrics;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::dispatch::{EventRegistry, HandlerId};
use crate::envelope;
use crate::error::{WsError, WsResult};
use crate::heartbeat::{Heartbeat, HeartbeatStats};

/// Normal-closure sentinel: no retry.
const NORMAL_CLOSE_CODE: u16 = 1000;
/// Synthetic code for closures without a close frame (read error, EOF).
const ABNORMAL_CLOSE_CODE: u16 = 1006;
/// Outbound writer queue capacity.
const OUTBOUND_QUEUE: usize = 100;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    fn as_label(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

type StateHandler = dyn Fn(ConnectionState) + Send + Sync;

struct ClientShared {
    config: ConnectionConfig,
    monitor: Arc<HealthMonitor>,
    registry: EventRegistry,
    heartbeat: Heartbeat,
    state: RwLock<ConnectionState>,
    state_handlers: RwLock<Vec<(HandlerId, Arc<StateHandler>)>>,
    next_state_handler: AtomicU64,
    /// Abnormal closures consumed since the last manual connect.
    reconnect_count: RwLock<u32>,
    /// Outbound frame sender (consumed by the event loop).
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    /// Session token; cancelling it makes the event loop close and exit.
    session: Mutex<CancellationToken>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

/// Resilient streaming client.
///
/// One instance per logical connection; construct explicitly and share by
/// cloning (cheap, `Arc`-backed) rather than through globals so tests and
/// multiple independent connections stay isolated.
#[derive(Clone)]
pub struct StreamClient {
    shared: Arc<ClientShared>,
}

impl StreamClient {
    /// Create a client. Rejects a malformed configuration.
    pub fn new(config: ConnectionConfig, monitor: Arc<HealthMonitor>) -> WsResult<Self> {
        config.validate()?;
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let heartbeat = Heartbeat::new(config.heartbeat_interval_ms);
        Ok(Self {
            shared: Arc::new(ClientShared {
                config,
                monitor,
                registry: EventRegistry::new(),
                heartbeat,
                state: RwLock::new(ConnectionState::Disconnected),
                state_handlers: RwLock::new(Vec::new()),
                next_state_handler: AtomicU64::new(0),
                reconnect_count: RwLock::new(0),
                outbound_tx,
                outbound_rx: TokioMutex::new(outbound_rx),
                session: Mutex::new(CancellationToken::new()),
                loop_task: Mutex::new(None),
                reconnect_task: Mutex::new(None),
            }),
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Whether the transport is currently open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The health monitor gating this client's sends.
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.shared.monitor
    }

    /// Heartbeat counters for diagnostics.
    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.shared.heartbeat.stats()
    }

    /// Open the transport.
    ///
    /// No-op when already connecting or connected. Resolves once the
    /// transport is open; a failed open leaves the client in `ERROR` and is
    /// not retried automatically. `disconnect()` during a pending connect
    /// settles it with an error.
    pub async fn connect(&self) -> WsResult<()> {
        {
            let state = *self.shared.state.read();
            if state == ConnectionState::Connecting || state == ConnectionState::Connected {
                debug!(%state, "connect() ignored, already in progress");
                return Ok(());
            }
        }
        // A manual connect supersedes any pending automatic retry.
        self.shared.cancel_reconnect();
        ClientShared::open(&self.shared).await?;
        *self.shared.reconnect_count.write() = 0;
        Ok(())
    }

    /// Close the transport with a normal-closure code (1000) and cancel all
    /// timers. Always leaves the client in `DISCONNECTED`. This is the only
    /// manual, non-retrying exit path.
    pub async fn disconnect(&self) {
        self.shared.cancel_reconnect();
        self.shared.session.lock().cancel();

        let task = self.shared.loop_task.lock().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(Duration::from_secs(2), &mut task)
                .await
                .is_err()
            {
                warn!("Event loop did not stop in time, aborting");
                task.abort();
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        info!("Client disconnected");
    }

    /// Send a payload.
    ///
    /// Returns `false` with no transport write unless the state is
    /// `CONNECTED`. A payload refused by the health gate is parked in the
    /// monitor's bounded buffer as a side effect; the return value reports
    /// only whether the payload was handed to the transport.
    pub fn send(&self, payload: Value) -> bool {
        self.shared.send_payload(payload)
    }

    /// Drain the monitor's buffer through the normal send path. Returns how
    /// many payloads were handed to the transport; the remainder is put
    /// back in order.
    pub fn flush_buffered(&self) -> usize {
        self.shared.flush_buffered()
    }

    /// Register a handler for inbound frames whose `type` matches `event`.
    pub fn on(
        &self,
        event: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.registry.on(event, handler)
    }

    /// Remove an inbound-frame handler.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        self.shared.registry.off(event, id)
    }

    /// Register a handler invoked synchronously with each new state.
    pub fn on_state_change(
        &self,
        handler: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = HandlerId::new(self.shared.next_state_handler.fetch_add(1, Ordering::Relaxed));
        self.shared
            .state_handlers
            .write()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a state-change handler.
    pub fn off_state_change(&self, id: HandlerId) -> bool {
        let mut handlers = self.shared.state_handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }
}

impl ClientShared {
    /// Open the transport and hand it to a fresh event loop.
    async fn open(shared: &Arc<ClientShared>) -> WsResult<()> {
        shared.set_state(ConnectionState::Connecting);
        let token = shared.new_session();

        info!(url = %shared.config.url, "Connecting to streaming endpoint");
        let connect_result =
            connect_async_tls_with_config(&shared.config.url, None, true, None).await;

        let (ws_stream, _response) = match connect_result {
            Ok(ok) => ok,
            Err(e) => {
                error!(error = %e, "Transport failed to open");
                shared.monitor.record_error(Some("connect failed"));
                Metrics::circuit_open(shared.monitor.circuit_open());
                shared.set_state(ConnectionState::Error);
                return Err(e.into());
            }
        };

        if token.is_cancelled() {
            // disconnect() arrived while the handshake was in flight: tear
            // the transport down and settle the pending connect with an
            // error.
            let mut ws_stream = ws_stream;
            let _ = ws_stream.close(None).await;
            return Err(WsError::ConnectionClosed {
                code: NORMAL_CLOSE_CODE,
                reason: "client-initiated disconnect".to_string(),
            });
        }

        shared.set_state(ConnectionState::Connected);
        info!("Streaming transport connected");

        let (write, read) = ws_stream.split();
        {
            let mut slot = shared.loop_task.lock();
            if let Some(prev) = slot.take() {
                prev.abort();
            }
            let loop_shared = shared.clone();
            *slot = Some(tokio::spawn(run_loop(loop_shared, write, read, token)));
        }

        // Payloads parked while the connection was down go out first.
        shared.flush_buffered();
        Ok(())
    }

    fn send_payload(&self, payload: Value) -> bool {
        if *self.state.read() != ConnectionState::Connected {
            Metrics::ws_msg_blocked("not_connected");
            return false;
        }
        if !self.monitor.can_send_message() {
            let accepted = self.monitor.buffer_message(payload);
            Metrics::ws_msg_blocked("health_gate");
            Metrics::buffer_depth(self.monitor.buffered_len());
            debug!(accepted, "Send blocked by health gate");
            return false;
        }

        let frame = envelope::wrap(payload);
        match self.outbound_tx.try_send(frame.to_string()) {
            Ok(()) => {
                Metrics::ws_msg_sent("data");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Writer backlogged: keep the frame for a later flush. It is
                // re-stamped on the way back out.
                let accepted = self.monitor.buffer_message(frame);
                Metrics::ws_msg_blocked("queue_full");
                Metrics::buffer_depth(self.monitor.buffered_len());
                warn!(accepted, "Outbound queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Metrics::ws_msg_blocked("not_connected");
                false
            }
        }
    }

    fn flush_buffered(&self) -> usize {
        if self.monitor.buffered_len() == 0 {
            return 0;
        }
        if *self.state.read() != ConnectionState::Connected || !self.monitor.can_send_message() {
            return 0;
        }

        let pending = self.monitor.flush_message_buffer();
        let total = pending.len();
        let mut sent = 0;
        let mut leftover: Vec<Value> = Vec::new();
        for payload in pending {
            if !leftover.is_empty() {
                leftover.push(payload);
                continue;
            }
            let frame = envelope::wrap(payload);
            if self.outbound_tx.try_send(frame.to_string()).is_ok() {
                Metrics::ws_msg_sent("data");
                sent += 1;
            } else {
                leftover.push(frame);
            }
        }
        for payload in leftover {
            let _ = self.monitor.buffer_message(payload);
        }
        Metrics::buffer_depth(self.monitor.buffered_len());
        if sent > 0 {
            info!(sent, total, "Flushed buffered payloads");
        }
        sent
    }

    fn set_state(&self, new_state: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == new_state {
                return;
            }
            *state = new_state;
        }
        Metrics::ws_state_set(new_state.as_label());
        debug!(state = %new_state, "Connection state changed");

        let handlers: Vec<Arc<StateHandler>> = self
            .state_handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(new_state))).is_err() {
                warn!(state = %new_state, "State handler panicked");
            }
        }
    }

    /// Install a fresh session token, invalidating any previous one.
    fn new_session(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut slot = self.session.lock();
        slot.cancel();
        *slot = token.clone();
        token
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
    }

    /// Route one inbound text frame.
    fn handle_frame(&self, text: &str) {
        let now = Utc::now().timestamp_millis();
        let frame: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                // Unparseable frames still count as transport activity.
                self.monitor.record_message(None);
                debug!("Dropping unparseable frame");
                return;
            }
        };

        self.monitor
            .record_message(envelope::frame_latency_ms(&frame, now));

        match envelope::frame_type(&frame) {
            Some(event) => {
                let invoked = self.registry.emit(event, &frame);
                if invoked == 0 {
                    debug!(event, "No handlers registered for event");
                }
            }
            None => debug!("Frame without type dropped"),
        }
    }

    /// React to the transport going away.
    fn handle_closure(shared: &Arc<ClientShared>, code: u16, reason: &str) {
        if code == NORMAL_CLOSE_CODE {
            info!(code, reason, "Transport closed normally");
            shared.set_state(ConnectionState::Disconnected);
            return;
        }

        warn!(code, reason, "Abnormal transport closure");
        shared.monitor.record_error(Some(reason));
        Metrics::circuit_open(shared.monitor.circuit_open());
        Self::schedule_reconnect(shared);
    }

    /// Schedule a single delayed reconnect attempt, or give up.
    fn schedule_reconnect(shared: &Arc<ClientShared>) {
        let attempts = *shared.reconnect_count.read();
        if attempts >= shared.config.reconnect_attempts {
            warn!(attempts, "Reconnect attempts exhausted");
            shared.set_state(ConnectionState::Disconnected);
            return;
        }
        if shared.monitor.circuit_open() {
            warn!("Circuit breaker open, not reconnecting");
            shared.set_state(ConnectionState::Disconnected);
            return;
        }

        // Claim the attempt before the timer runs so a failing attempt
        // cannot re-enter unbounded.
        *shared.reconnect_count.write() = attempts + 1;
        shared.set_state(ConnectionState::Connecting);
        Metrics::ws_reconnect();
        info!(
            attempt = attempts + 1,
            max = shared.config.reconnect_attempts,
            delay_ms = shared.config.reconnect_interval_ms,
            "Reconnect scheduled"
        );

        let mut slot = shared.reconnect_task.lock();
        if let Some(prev) = slot.take() {
            prev.abort();
        }
        let delay = Duration::from_millis(shared.config.reconnect_interval_ms);
        let reconnect_shared = shared.clone();
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = ClientShared::open(&reconnect_shared).await {
                error!(error = %e, "Reconnect attempt failed");
            }
        }));
    }
}

/// Event loop: transport I/O, outbound drain, heartbeat.
async fn run_loop(
    shared: Arc<ClientShared>,
    mut write: WsSink,
    mut read: WsSource,
    token: CancellationToken,
) {
    let mut heartbeat = shared.heartbeat.ticker();

    loop {
        let outbound_recv = async { shared.outbound_rx.lock().await.recv().await };

        tokio::select! {
            () = token.cancelled() => {
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client-initiated disconnect".into(),
                };
                if let Err(e) = write.send(Message::Close(Some(close))).await {
                    debug!(error = %e, "Close frame not delivered");
                }
                return;
            }

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        shared.handle_frame(&text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            ClientShared::handle_closure(&shared, ABNORMAL_CLOSE_CODE, "pong write failed");
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.to_string()))
                            .unwrap_or((NORMAL_CLOSE_CODE, "closed without frame".to_string()));
                        ClientShared::handle_closure(&shared, code, &reason);
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "Transport read error");
                        ClientShared::handle_closure(&shared, ABNORMAL_CLOSE_CODE, "read error");
                        return;
                    }
                    None => {
                        warn!("Transport stream ended");
                        ClientShared::handle_closure(&shared, ABNORMAL_CLOSE_CODE, "stream ended");
                        return;
                    }
                }
            }

            outbound = outbound_recv => {
                if let Some(text) = outbound {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        error!(error = %e, "Transport write failed");
                        ClientShared::handle_closure(&shared, ABNORMAL_CLOSE_CODE, "write failed");
                        return;
                    }
                }
            }

            _ = heartbeat.tick() => {
                // The periodic health check is also what drives the
                // breaker's half-open transition.
                let _ = shared.monitor.is_healthy();
                Metrics::circuit_open(shared.monitor.circuit_open());

                if shared.monitor.can_send_message() {
                    let frame = envelope::wrap(envelope::heartbeat());
                    if let Err(e) = write.send(Message::Text(frame.to_string())).await {
                        error!(error = %e, "Heartbeat write failed");
                        ClientShared::handle_closure(&shared, ABNORMAL_CLOSE_CODE, "heartbeat write failed");
                        return;
                    }
                    shared.heartbeat.record_sent();
                    Metrics::ws_msg_sent("heartbeat");
                } else {
                    // Heartbeats are advisory: skipped, not buffered.
                    shared.heartbeat.record_suppressed();
                    debug!("Heartbeat skipped, sends blocked");
                }
            }
        }
    }
}
