//! Reference-counted, self-reconnecting WebSocket to the session server.
//!
//! Every socket attempt gets a fresh generation number. Frames are tagged
//! with the generation that received them and outbound commands only go to
//! the socket of the current generation. Tearing down or reconnecting bumps
//! the generation first, so late frames from an old socket are recognisable
//! as stale.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use agtdesk_core::Command;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Raw payload of one inbound WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
}

/// An inbound message plus the generation of the socket that received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedFrame {
    pub generation: u64,
    pub inbound: Inbound,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub reconnect_delay: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Outbound side of the shared connection, as seen by the multiplexer.
pub trait CommandSink {
    /// Queue a command on the current socket. Fails with
    /// [`TransportError::NotConnected`] when no socket is open.
    fn send_command(&self, command: &Command) -> Result<(), TransportError>;

    /// Generation of the socket commands would currently go to.
    fn current_generation(&self) -> u64;
}

// ─── Connection ───────────────────────────────────────────────────

/// Cheap-to-clone handle to the shared connection.
///
/// The socket opens when the first consumer calls [`Connection::acquire`]
/// and closes when the last one calls [`Connection::release`]. Both must be
/// called from inside a tokio runtime.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    generation: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
    frames_tx: mpsc::UnboundedSender<TaggedFrame>,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    consumers: usize,
    /// Writer for the open socket, keyed by the generation that owns it.
    outbound: Option<(u64, mpsc::UnboundedSender<Message>)>,
    /// Cancels the dial/reconnect task while one is running.
    task: Option<CancellationToken>,
}

impl Connection {
    /// Create a closed connection and the receiver its frames arrive on.
    pub fn new(config: ConnectionConfig) -> (Self, mpsc::UnboundedReceiver<TaggedFrame>) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let inner = Arc::new(Inner {
            config,
            generation: AtomicU64::new(0),
            state_tx,
            frames_tx,
            shared: Mutex::new(Shared::default()),
        });
        (Self { inner }, frames_rx)
    }

    /// Register a consumer, opening the socket on the first one.
    pub fn acquire(&self) {
        let first = {
            let mut shared = self.inner.lock();
            shared.consumers += 1;
            shared.consumers == 1
        };
        if first {
            self.open();
        }
    }

    /// Drop a consumer, closing the socket when none remain. Extra releases
    /// are ignored.
    pub fn release(&self) {
        let last = {
            let mut shared = self.inner.lock();
            if shared.consumers == 0 {
                return;
            }
            shared.consumers -= 1;
            shared.consumers == 0
        };
        if last {
            self.teardown();
        }
    }

    pub fn consumers(&self) -> usize {
        self.inner.lock().consumers
    }

    /// Start dialing if no connection task is running.
    pub fn open(&self) {
        let mut shared = self.inner.lock();
        if shared.task.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        shared.task = Some(cancel.clone());
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(shared);

        tracing::debug!(url = %self.inner.config.url, generation, "transport: opening");
        tokio::spawn(run_connection(Arc::clone(&self.inner), generation, cancel));
    }

    fn teardown(&self) {
        let mut shared = self.inner.lock();
        if let Some(cancel) = shared.task.take() {
            cancel.cancel();
        }
        shared.outbound = None;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(shared);

        self.inner.state_tx.send_replace(ConnectionState::Closed);
        tracing::info!(generation, "transport: closed, no consumers left");
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn send_command(&self, command: &Command) -> Result<(), TransportError> {
        let text = command.encode()?;
        let current = self.generation();
        let shared = self.inner.lock();
        match &shared.outbound {
            Some((generation, tx)) if *generation == current => tx
                .send(Message::Text(text))
                .map_err(|_| TransportError::NotConnected),
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl CommandSink for Connection {
    fn send_command(&self, command: &Command) -> Result<(), TransportError> {
        Connection::send_command(self, command)
    }

    fn current_generation(&self) -> u64 {
        self.generation()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn set_state(&self, generation: u64, state: ConnectionState) {
        if self.is_current(generation) {
            self.state_tx.send_replace(state);
        }
    }

    /// Publish the writer for a freshly opened socket. Returns false when the
    /// generation was superseded while the handshake was in flight.
    fn install_outbound(&self, generation: u64, tx: mpsc::UnboundedSender<Message>) -> bool {
        let mut shared = self.lock();
        if !self.is_current(generation) {
            return false;
        }
        shared.outbound = Some((generation, tx));
        true
    }

    fn clear_outbound(&self, generation: u64) {
        let mut shared = self.lock();
        if matches!(shared.outbound, Some((g, _)) if g == generation) {
            shared.outbound = None;
        }
    }

    fn deliver(&self, generation: u64, inbound: Inbound) {
        // Receiver gone means nobody is consuming; dropping is fine.
        let _ = self.frames_tx.send(TaggedFrame {
            generation,
            inbound,
        });
    }
}

// ─── Socket task ──────────────────────────────────────────────────

async fn run_connection(inner: Arc<Inner>, mut generation: u64, cancel: CancellationToken) {
    loop {
        inner.set_state(generation, ConnectionState::Connecting);

        let dialed = tokio::select! {
            result = tokio_tungstenite::connect_async(inner.config.url.as_str()) => result,
            _ = cancel.cancelled() => return,
        };
        match dialed {
            Ok((ws, _response)) => {
                tracing::info!(url = %inner.config.url, generation, "transport: connected");
                pump_socket(&inner, generation, ws, &cancel).await;
            }
            Err(e) => {
                tracing::warn!(url = %inner.config.url, generation, error = %e, "transport: connect failed");
            }
        }

        inner.clear_outbound(generation);
        if cancel.is_cancelled() {
            return;
        }
        inner.set_state(generation, ConnectionState::Closed);

        tokio::select! {
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
            _ = cancel.cancelled() => return,
        }

        // Only the attempt that still owns the current generation may reconnect.
        match inner.generation.compare_exchange(
            generation,
            generation + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {
                generation += 1;
                tracing::debug!(generation, "transport: reconnecting");
            }
            Err(current) => {
                tracing::debug!(generation, current, "transport: superseded, not reconnecting");
                return;
            }
        }
    }
}

async fn pump_socket<S>(
    inner: &Inner,
    generation: u64,
    ws: tokio_tungstenite::WebSocketStream<S>,
    cancel: &CancellationToken,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    if !inner.install_outbound(generation, out_tx) {
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }
    inner.set_state(generation, ConnectionState::Open);

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => inner.deliver(generation, Inbound::Text(text)),
                Some(Ok(Message::Binary(data))) => inner.deliver(generation, Inbound::Binary(data)),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(generation, "transport: server closed the socket");
                    break;
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(generation, error = %e, "transport: read error");
                    break;
                }
            },
            Some(msg) = out_rx.recv() => {
                if let Err(e) = ws_tx.send(msg).await {
                    tracing::warn!(generation, error = %e, "transport: write error");
                    break;
                }
            }
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
