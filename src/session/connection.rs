use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use super::SessionError;
use crate::bus::Direction;
use crate::proto::{Command, Pdu};

/// Monotonic instance counter. A connection id can be reused after a
/// restart; the epoch tells deferred timers whether the instance they were
/// armed for is still the live one.
static NEXT_EPOCH: AtomicU64 = AtomicU64::new(1);

/// Which bind the peer (or we) completed on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRole {
    Transmitter,
    Receiver,
    Transceiver,
}

impl BindRole {
    pub fn from_command(command: Command) -> Option<Self> {
        match command {
            Command::BindTransmitter | Command::BindTransmitterResp => Some(BindRole::Transmitter),
            Command::BindReceiver | Command::BindReceiverResp => Some(BindRole::Receiver),
            Command::BindTransceiver | Command::BindTransceiverResp => Some(BindRole::Transceiver),
            _ => None,
        }
    }
}

impl fmt::Display for BindRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindRole::Transmitter => f.write_str("transmitter"),
            BindRole::Receiver => f.write_str("receiver"),
            BindRole::Transceiver => f.write_str("transceiver"),
        }
    }
}

#[derive(Debug, Default)]
struct BindState {
    role: Option<BindRole>,
    system_id: Option<String>,
}

/// A request in flight on the wire, waiting for its response by sequence
/// number.
pub struct PendingRequest {
    pub command: u32,
    pub sent_at: Instant,
    pub response_tx: oneshot::Sender<Pdu>,
}

/// Shared state for one TCP connection. The session task owns the socket;
/// everyone else talks to the connection through this handle.
pub struct Connection {
    pub id: String,
    pub epoch: u64,
    pub direction: Direction,
    /// Listener that accepted this connection; `None` for outbound.
    pub listener_id: Option<String>,
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
    request_timeout: Duration,
    bind: RwLock<BindState>,
    sequence: AtomicU32,
    pending: Mutex<HashMap<u32, PendingRequest>>,
    outbox: mpsc::Sender<Pdu>,
    closing: AtomicBool,
    close_tx: watch::Sender<bool>,
}

impl Connection {
    pub fn new(
        id: String,
        direction: Direction,
        listener_id: Option<String>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        outbox: mpsc::Sender<Pdu>,
        request_timeout: Duration,
    ) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            id,
            epoch: NEXT_EPOCH.fetch_add(1, Ordering::Relaxed),
            direction,
            listener_id,
            local_addr,
            peer_addr,
            request_timeout,
            bind: RwLock::new(BindState::default()),
            sequence: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            outbox,
            closing: AtomicBool::new(false),
            close_tx,
        }
    }

    /// Next sequence number for a request we originate.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed).max(1)
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub async fn is_bound(&self) -> bool {
        self.bind.read().await.role.is_some()
    }

    pub async fn bind_role(&self) -> Option<BindRole> {
        self.bind.read().await.role
    }

    pub async fn system_id(&self) -> Option<String> {
        self.bind.read().await.system_id.clone()
    }

    pub async fn set_bound(&self, role: BindRole, system_id: &str) {
        let mut bind = self.bind.write().await;
        bind.role = Some(role);
        bind.system_id = Some(system_id.to_string());
    }

    pub async fn clear_bound(&self) {
        let mut bind = self.bind.write().await;
        bind.role = None;
        bind.system_id = None;
    }

    /// Queue a PDU for the writer task. Applies the connection's
    /// backpressure; fails once the session is gone.
    pub async fn send(&self, pdu: Pdu) -> Result<(), SessionError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        self.outbox.send(pdu).await.map_err(|_| SessionError::Closed)
    }

    /// Send a request PDU and return the channel its response will arrive
    /// on. The entry is reaped by the sweep if no response ever comes.
    pub async fn send_request(&self, pdu: Pdu) -> Result<oneshot::Receiver<Pdu>, SessionError> {
        let (tx, rx) = oneshot::channel();
        let sequence = pdu.sequence;
        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                sequence,
                PendingRequest {
                    command: pdu.command,
                    sent_at: Instant::now(),
                    response_tx: tx,
                },
            );
        }
        if let Err(err) = self.send(pdu).await {
            self.pending.lock().await.remove(&sequence);
            return Err(err);
        }
        Ok(rx)
    }

    /// Hand a response to whoever is waiting on its sequence number.
    /// Returns false when nothing was pending.
    pub async fn resolve_pending(&self, sequence: u32, response: Pdu) -> bool {
        let entry = self.pending.lock().await.remove(&sequence);
        match entry {
            Some(request) => {
                let _ = request.response_tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Drop pending entries older than the request timeout. Their waiters
    /// see the closed channel as a timeout.
    pub async fn sweep_pending(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|sequence, request| {
            if now.duration_since(request.sent_at) < self.request_timeout {
                return true;
            }
            debug!(
                sequence,
                command = format_args!("{:#010x}", request.command),
                "reaping request without a response"
            );
            false
        });
        before - pending.len()
    }

    /// Fail every in-flight request, used at teardown.
    pub async fn fail_pending(&self) {
        self.pending.lock().await.clear();
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Ask the session task to close the socket. Idempotent.
    pub fn request_close(&self) {
        self.closing.store(true, Ordering::Release);
        let _ = self.close_tx.send(true);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Endpoint fields attached to every event about this connection.
    pub fn endpoint_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("local_host".into(), Value::from(self.local_addr.ip().to_string()));
        fields.insert("local_port".into(), Value::from(self.local_addr.port()));
        fields.insert("remote_host".into(), Value::from(self.peer_addr.ip().to_string()));
        fields.insert("remote_port".into(), Value::from(self.peer_addr.port()));
        fields
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("direction", &self.direction)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}
