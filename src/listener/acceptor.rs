//! TCP acceptor for incoming SMPP peers.
//!
//! Every accepted socket is submitted to the bus as an `smpp.connect`
//! decision before a session is created; only an explicit accept admits the
//! peer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, span, warn, Instrument, Level};

use crate::bootstrap::SharedServerState;
use crate::bus::{Direction, Event};
use crate::config::{IpFamily, ListenerConfig};
use crate::session::{accepted, Connection, Session, OUTBOX_CAPACITY};

use super::ListenerError;

/// A bound TCP listener with its accept loop.
pub struct Listener {
    pub id: String,
    pub local_addr: SocketAddr,
    pub family: IpFamily,
    config: ListenerConfig,
    next_connection: AtomicU64,
    close_tx: watch::Sender<bool>,
}

impl Listener {
    /// Bind the socket, register the listener and start its accept loop.
    pub async fn create(
        state: SharedServerState,
        id: String,
        config: ListenerConfig,
    ) -> Result<Arc<Listener>, ListenerError> {
        if state.listeners.contains(&id).await {
            return Err(ListenerError::AlreadyExists);
        }

        let addr = config.family.resolve(&config.host, config.port).await?;
        let socket = TcpListener::bind(addr).await?;
        let local_addr = socket.local_addr()?;

        let (close_tx, _) = watch::channel(false);
        let listener = Arc::new(Listener {
            id: id.clone(),
            local_addr,
            family: config.family,
            config,
            next_connection: AtomicU64::new(1),
            close_tx,
        });

        state.listeners.insert(listener.clone()).await;

        info!(listener_id = %id, address = %local_addr, "listener started");
        metrics::counter!("smpp_listeners_started_total").increment(1);
        metrics::gauge!("smpp_listeners_active").increment(1.0);
        state.bus.enqueue(
            Event::notice("smpp.listen")
                .with("listener_id", id.clone())
                .with("host", local_addr.ip().to_string())
                .with("port", local_addr.port())
                .with("family", listener.family.as_str()),
        );

        let span = span!(Level::INFO, "listener", listener_id = %id);
        tokio::spawn(
            listener.clone().run(state, socket).instrument(span),
        );

        Ok(listener)
    }

    /// Ask the accept loop to stop. Established sessions stay up.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }

    async fn run(self: Arc<Self>, state: SharedServerState, socket: TcpListener) {
        let mut shutdown_rx = state.shutdown.subscribe();
        let mut close_rx = self.close_tx.subscribe();
        let mut accept_error = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("listener shutting down");
                    break;
                }

                _ = close_rx.changed() => {
                    info!("listener closed");
                    break;
                }

                result = socket.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        let listener = self.clone();
                        let state = state.clone();
                        let span = span!(Level::INFO, "accept", peer = %peer_addr);
                        tokio::spawn(
                            async move {
                                listener.handle_accept(state, stream, peer_addr).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(err) => {
                        error!(error = %err, "accept error, closing listener");
                        metrics::counter!("smpp_accept_errors_total").increment(1);
                        accept_error = Some(err.to_string());
                        break;
                    }
                },
            }
        }

        state.listeners.remove(&self.id).await;
        metrics::gauge!("smpp_listeners_active").decrement(1.0);
        let mut notice = Event::notice("smpp.unlisten").with("listener_id", self.id.clone());
        if let Some(error) = accept_error {
            notice.set("error", error);
        }
        state.bus.enqueue(notice);
    }

    async fn handle_accept(
        self: Arc<Self>,
        state: SharedServerState,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) {
        if let Err(err) = configure_socket(&stream) {
            warn!(error = %err, "socket configuration failed");
        }

        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(_) => self.local_addr,
        };

        let n = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let connection_id = format!("{}.{}", self.id, n);

        // the session does not exist yet, so the peer waits for the verdict
        let event = Event::new("smpp.connect", Direction::Incoming)
            .with("connection_id", connection_id.clone())
            .with("listener_id", self.id.clone())
            .with("local_host", local_addr.ip().to_string())
            .with("local_port", local_addr.port())
            .with("remote_host", peer_addr.ip().to_string())
            .with("remote_port", peer_addr.port());

        let admitted = match state.bus.dispatch(event).await {
            Ok(answer) => accepted(&answer),
            Err(_) => false,
        };

        if !admitted {
            info!(connection_id = %connection_id, "connection refused");
            metrics::counter!("smpp_connections_refused_total").increment(1);
            return;
        }

        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let conn = Arc::new(Connection::new(
            connection_id.clone(),
            Direction::Incoming,
            Some(self.id.clone()),
            local_addr,
            peer_addr,
            outbox_tx,
            self.config.request_timeout,
        ));

        state.connections.insert(conn.clone()).await;
        debug!(connection_id = %connection_id, "connection accepted");
        metrics::counter!("smpp_connections_accepted_total").increment(1);
        metrics::gauge!("smpp_connections_active").increment(1.0);

        self.arm_bind_timeout(&state, &conn);
        Session::spawn(state, conn, stream, outbox_rx);
    }

    /// A peer that never binds is force-closed once the timeout elapses.
    /// The timer re-checks the registry so a reused id is never hit.
    fn arm_bind_timeout(&self, state: &SharedServerState, conn: &Arc<Connection>) {
        let state = state.clone();
        let id = conn.id.clone();
        let epoch = conn.epoch;
        let timeout = self.config.bind_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(live) = state.connections.get(&id).await {
                if live.epoch == epoch && !live.is_bound().await {
                    warn!(connection_id = %id, "bind timeout, closing connection");
                    metrics::counter!("smpp_bind_timeouts_total").increment(1);
                    live.request_close();
                }
            }
        });
    }
}

/// Configure TCP socket options.
fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    Ok(())
}
