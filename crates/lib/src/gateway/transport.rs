//! Gateway WebSocket transport: connection state machine, handshake, RPC
//! correlation, reconnection, and binary passthrough.
//!
//! One transport owns at most one socket. `start()` spawns the connection
//! loop on the current tokio runtime; callers observe [`TransportState`]
//! snapshots through `on_state_change` and issue `call()` once the status is
//! `Connected`. The gateway may push events or binary frames at any time
//! after the handshake; binary messages pass through verbatim in both
//! directions (the frames module holds the codec callers use).

use super::events::{Listeners, Subscription};
use super::pending::{CallOutcome, PendingCalls};
use super::protocol::{
    parse_inbound, ClientHello, HelloReject, InboundFrame, RpcEvent, RpcRequest, RpcResponse,
    ServerHello,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 30_000;

/// Delay before reconnect attempt number `retries + 1`.
fn reconnect_delay_ms(retries: u32) -> u64 {
    BACKOFF_BASE_MS
        .saturating_mul(1u64 << retries.min(16))
        .min(BACKOFF_CAP_MS)
}

/// Authoritative summary of where the connection is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Connected,
    Error,
    Rejected,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Handshaking => "handshaking",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot emitted on every status change. `server_hello` and
/// `rejection` are mutually exclusive and cleared at the start of every new
/// connection attempt.
#[derive(Debug, Clone, Default)]
pub struct TransportState {
    pub status: ConnectionStatus,
    pub server_hello: Option<ServerHello>,
    pub rejection: Option<HelloReject>,
    pub error: Option<String>,
}

/// Construction options for the transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// WebSocket URL of the gateway, e.g. `ws://127.0.0.1:15151/ws`.
    pub url: String,
    /// Client identifier sent in the hello.
    pub client_id: String,
    /// Optional shared secret for the hello.
    pub auth_token: Option<String>,
    /// Capability list advertised to the gateway, e.g. `["chat", "terminal"]`.
    pub capabilities: Vec<String>,
    /// When false the transport makes a single attempt per start() and never
    /// schedules a reconnect.
    pub reconnect: bool,
}

impl TransportOptions {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            auth_token: None,
            capabilities: Vec::new(),
            reconnect: true,
        }
    }
}

/// Why a `call()` did not resolve with a result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// The transport was not connected; nothing was sent.
    #[error("transport is not connected")]
    NotConnected,

    /// The gateway answered with a structured RPC error.
    #[error("{code}: {message}")]
    Rpc { code: String, message: String },

    /// The socket closed before the matching response arrived.
    #[error("connection closed before a response arrived")]
    ConnectionClosed,

    /// stop() tore the transport down while the call was pending.
    #[error("transport stopped")]
    Stopped,

    /// The request could not be written to the socket.
    #[error("failed to send request: {0}")]
    Send(String),
}

struct Inner {
    opts: TransportOptions,
    state: Mutex<TransportState>,
    state_listeners: Listeners<TransportState>,
    event_listeners: Listeners<RpcEvent>,
    binary_listeners: Listeners<Vec<u8>>,
    pending: PendingCalls,
    /// Write half of the active connection, present only while connected.
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// Connection cycle counter: odd while a loop owns the transport, even
    /// while stopped. start() and stop() step it; a loop holding a stale
    /// token must not touch shared state.
    cycle: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        self.state.lock().unwrap().status
    }

    /// Mutate the state under the lock, then emit the snapshot outside it.
    fn update_state(&self, f: impl FnOnce(&mut TransportState)) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            f(&mut state);
            state.clone()
        };
        self.state_listeners.emit(&snapshot);
    }

    /// True while this generation's loop is the one allowed to drive state.
    fn is_current(&self, generation: u64) -> bool {
        self.cycle.load(Ordering::SeqCst) == generation
    }

    /// End this generation's cycle. True when the loop still owned the
    /// transport; false when stop() or a newer start() got there first.
    /// The owning flag drops before the caller publishes its terminal
    /// state, so a listener reacting to that state can start() a fresh
    /// cycle without the two racing over the flag.
    fn retire(&self, generation: u64) -> bool {
        self.cycle
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Client transport multiplexing handshake, JSON RPC, and binary terminal
/// streams over one gateway WebSocket. Cheap to clone; clones share the
/// same connection.
#[derive(Clone)]
pub struct GatewayTransport {
    inner: Arc<Inner>,
}

impl GatewayTransport {
    pub fn new(opts: TransportOptions) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                opts,
                state: Mutex::new(TransportState::default()),
                state_listeners: Listeners::new(),
                event_listeners: Listeners::new(),
                binary_listeners: Listeners::new(),
                pending: PendingCalls::new(),
                outbound: Mutex::new(None),
                cycle: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Open the connection and keep it open (per the reconnect policy).
    /// No-op when already running. Must be called on a tokio runtime.
    pub fn start(&self) {
        let step = self
            .inner
            .cycle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                if c % 2 == 0 {
                    Some(c + 1)
                } else {
                    None
                }
            });
        let generation = match step {
            Ok(previous) => previous + 1,
            // Already running.
            Err(_) => return,
        };
        let _ = self.inner.shutdown.send_replace(false);
        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_connection_loop(inner, generation).await;
        });
    }

    /// Tear everything down: disable reconnection, close the socket, reject
    /// pending calls with [`CallError::Stopped`].
    pub fn stop(&self) {
        let _ = self
            .inner
            .cycle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                if c % 2 == 1 {
                    Some(c + 1)
                } else {
                    None
                }
            });
        let _ = self.inner.shutdown.send_replace(true);
        *self.inner.outbound.lock().unwrap() = None;
        self.inner.pending.fail_all(CallError::Stopped);
        if self.inner.status() != ConnectionStatus::Disconnected {
            self.inner.update_state(|s| {
                s.status = ConnectionStatus::Disconnected;
            });
        }
    }

    /// Issue one RPC and await its response. Fails immediately, without any
    /// network I/O, when the transport is not connected. There is no per-call
    /// timeout: a call ends on its response, on socket closure, or on stop().
    pub async fn call(&self, method: &str, params: Option<Value>) -> CallOutcome {
        if self.inner.status() != ConnectionStatus::Connected {
            return Err(CallError::NotConnected);
        }
        let id = Uuid::new_v4().to_string();
        let rx = self.inner.pending.register(&id);
        let request = RpcRequest::new(id.clone(), method, params);
        let text = match serde_json::to_string(&request) {
            Ok(t) => t,
            Err(e) => {
                self.inner.pending.discard(&id);
                return Err(CallError::Send(e.to_string()));
            }
        };
        let sent = {
            let outbound = self.inner.outbound.lock().unwrap();
            outbound
                .as_ref()
                .map(|tx| tx.send(Message::Text(text)).is_ok())
                .unwrap_or(false)
        };
        if !sent {
            self.inner.pending.discard(&id);
            return Err(CallError::NotConnected);
        }
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CallError::ConnectionClosed),
        }
    }

    /// Write raw bytes on the binary channel. Best effort: silently dropped
    /// when no connection is active, since late terminal bytes are
    /// meaningless once the viewer is gone.
    pub fn send_binary(&self, bytes: Vec<u8>) {
        if self.inner.status() != ConnectionStatus::Connected {
            return;
        }
        let outbound = self.inner.outbound.lock().unwrap();
        if let Some(tx) = outbound.as_ref() {
            let _ = tx.send(Message::Binary(bytes));
        }
    }

    /// Current state snapshot.
    pub fn get_state(&self) -> TransportState {
        self.inner.state.lock().unwrap().clone()
    }

    /// Observe every state change. The listener also runs for transitions
    /// caused by stop().
    pub fn on_state_change(
        &self,
        listener: impl Fn(&TransportState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.state_listeners.subscribe(listener)
    }

    /// Observe unsolicited server events.
    pub fn on_event(&self, listener: impl Fn(&RpcEvent) + Send + Sync + 'static) -> Subscription {
        self.inner.event_listeners.subscribe(listener)
    }

    /// Observe raw binary messages. Frames are delivered verbatim; decode
    /// with [`crate::gateway::decode_frame`].
    pub fn on_binary_message(
        &self,
        listener: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner
            .binary_listeners
            .subscribe(move |bytes: &Vec<u8>| listener(bytes.as_slice()))
    }
}

/// How one connection ended.
enum ConnectionEnd {
    /// Socket closed or failed; retry per the backoff policy.
    Closed,
    /// Gateway rejected the handshake; reconnection is off for this cycle.
    Rejected,
    /// stop() or a newer start() superseded this loop.
    Stopped,
}

async fn run_connection_loop(inner: Arc<Inner>, generation: u64) {
    let mut shutdown_rx = inner.shutdown.subscribe();
    let mut retries: u32 = 0;
    loop {
        if !inner.is_current(generation) {
            return;
        }
        inner.update_state(|s| {
            s.status = ConnectionStatus::Connecting;
            s.server_hello = None;
            s.rejection = None;
            s.error = None;
        });
        match run_connection(&inner, generation, &mut shutdown_rx, &mut retries).await {
            ConnectionEnd::Rejected | ConnectionEnd::Stopped => return,
            ConnectionEnd::Closed => {}
        }
        // A single-attempt cycle retires itself before publishing its
        // terminal state, so only a reconnecting loop that still owns the
        // transport reaches the backoff.
        if !inner.is_current(generation) {
            return;
        }
        let delay = Duration::from_millis(reconnect_delay_ms(retries));
        retries = retries.saturating_add(1);
        log::debug!(
            "gateway transport: reconnecting in {:?} (attempt {})",
            delay,
            retries
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

/// Publish a connection failure. A single-attempt transport is done after
/// the failure, so its cycle ends before the state becomes visible and a
/// listener may call start() from the callback.
fn fail_connection(inner: &Arc<Inner>, generation: u64, error: String) {
    let owns = if inner.opts.reconnect {
        inner.is_current(generation)
    } else {
        inner.retire(generation)
    };
    if owns {
        inner.update_state(|s| {
            s.status = ConnectionStatus::Error;
            s.error = Some(error);
        });
    }
}

/// Drive a single socket from dial to close. Returns how it ended.
async fn run_connection(
    inner: &Arc<Inner>,
    generation: u64,
    shutdown_rx: &mut watch::Receiver<bool>,
    retries: &mut u32,
) -> ConnectionEnd {
    // The dial races against shutdown: a stop() while the TCP or upgrade
    // handshake is in flight must not leave a second socket behind once a
    // newer cycle dials.
    let dial = connect_async(inner.opts.url.as_str());
    tokio::pin!(dial);
    let ws = loop {
        tokio::select! {
            dialed = &mut dial => match dialed {
                Ok((ws, _)) => break ws,
                Err(e) => {
                    log::warn!(
                        "gateway transport: connect to {} failed: {}",
                        inner.opts.url,
                        e
                    );
                    fail_connection(inner, generation, e.to_string());
                    return ConnectionEnd::Closed;
                }
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() || !inner.is_current(generation) {
                    return ConnectionEnd::Stopped;
                }
            }
        }
    };
    let (mut write, mut read) = ws.split();

    let hello = ClientHello::new(
        inner.opts.client_id.clone(),
        inner.opts.auth_token.clone(),
        inner.opts.capabilities.clone(),
    );
    let hello_text = match serde_json::to_string(&hello) {
        Ok(t) => t,
        Err(e) => {
            fail_connection(inner, generation, format!("serializing hello: {}", e));
            return ConnectionEnd::Closed;
        }
    };
    if let Err(e) = write.send(Message::Text(hello_text)).await {
        fail_connection(inner, generation, e.to_string());
        return ConnectionEnd::Closed;
    }
    if inner.is_current(generation) {
        inner.update_state(|s| {
            s.status = ConnectionStatus::Handshaking;
        });
    }

    // The first text frame decides the handshake. Control frames before it
    // are ignored; a close here is a transport-level error.
    let first = loop {
        let msg = tokio::select! {
            m = read.next() => m,
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = write.close().await;
                    return ConnectionEnd::Stopped;
                }
                continue;
            }
        };
        match msg {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | None => {
                fail_connection(
                    inner,
                    generation,
                    "socket closed during handshake".to_string(),
                );
                return ConnectionEnd::Closed;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                fail_connection(inner, generation, e.to_string());
                return ConnectionEnd::Closed;
            }
        }
    };

    if !inner.is_current(generation) {
        let _ = write.close().await;
        return ConnectionEnd::Stopped;
    }
    match parse_inbound(&first) {
        InboundFrame::Hello(hello) => {
            log::info!(
                "gateway transport: connected to {} (protocol {})",
                hello.server_id,
                hello.protocol_version
            );
            *retries = 0;
            inner.update_state(|s| {
                s.status = ConnectionStatus::Connected;
                s.server_hello = Some(hello);
            });
        }
        InboundFrame::Reject(reject) => {
            log::warn!(
                "gateway rejected connection: {} ({})",
                reject.reason,
                reject.code
            );
            // The cycle ends before the rejection is published so a state
            // listener can react with a fresh start().
            if inner.retire(generation) {
                inner.update_state(|s| {
                    s.status = ConnectionStatus::Rejected;
                    s.rejection = Some(reject);
                });
            }
            let _ = write.close().await;
            return ConnectionEnd::Rejected;
        }
        _ => {
            // Anything but hello/reject as the first frame is a protocol
            // violation, handled like a generic error close.
            fail_connection(inner, generation, "malformed handshake frame".to_string());
            let _ = write.close().await;
            return ConnectionEnd::Closed;
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *inner.outbound.lock().unwrap() = Some(tx);

    let end = loop {
        tokio::select! {
            out = rx.recv() => {
                match out {
                    Some(msg) => {
                        if let Err(e) = write.send(msg).await {
                            log::warn!("gateway transport: send failed: {}", e);
                            break ConnectionEnd::Closed;
                        }
                    }
                    // stop() dropped the sender.
                    None => break ConnectionEnd::Stopped,
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    let _ = write.close().await;
                    break ConnectionEnd::Stopped;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => route_text(inner, &text),
                    Some(Ok(Message::Binary(bytes))) => inner.binary_listeners.emit(&bytes),
                    Some(Ok(Message::Close(_))) | None => break ConnectionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if inner.is_current(generation) {
                            inner.update_state(|s| {
                                s.status = ConnectionStatus::Error;
                                s.error = Some(e.to_string());
                            });
                        }
                        break ConnectionEnd::Closed;
                    }
                }
            }
        }
    };

    // In single-attempt mode the loop is over after this connection, so the
    // cycle is retired before the final state goes out and a listener can
    // restart the transport from its callback.
    let owns = if inner.opts.reconnect {
        inner.is_current(generation)
    } else {
        inner.retire(generation)
    };
    if owns {
        *inner.outbound.lock().unwrap() = None;
        inner.pending.fail_all(CallError::ConnectionClosed);
        if matches!(end, ConnectionEnd::Closed) {
            inner.update_state(|s| {
                s.status = ConnectionStatus::Disconnected;
            });
        }
    }
    end
}

/// Route one post-handshake JSON frame. Responses go to the correlator,
/// events fan out, anything else is tolerated and dropped.
fn route_text(inner: &Arc<Inner>, text: &str) {
    match parse_inbound(text) {
        InboundFrame::Response(response) => {
            let (id, outcome) = response_outcome(response);
            inner.pending.complete(&id, outcome);
        }
        InboundFrame::Event(event) => inner.event_listeners.emit(&event),
        other => {
            log::debug!("gateway transport: ignoring frame: {:?}", other);
        }
    }
}

fn response_outcome(response: RpcResponse) -> (String, CallOutcome) {
    let outcome = match response.error {
        Some(err) => Err(CallError::Rpc {
            code: err.code,
            message: err.message,
        }),
        None => Ok(response.result.unwrap_or(Value::Null)),
    };
    (response.id, outcome)
}
