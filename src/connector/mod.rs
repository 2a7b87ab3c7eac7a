//! Outbound side: dialing configured peers, and the deferred restart and
//! rebind timers that keep those links alive.
//!
//! The timers never act on captured handles. They re-check the live registry
//! (and the connection epoch) when they fire, so a link that was replaced or
//! closed in the meantime is left alone.

use std::io;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::bootstrap::SharedServerState;
use crate::bus::{Direction, Event};
use crate::config::ConnectionConfig;
use crate::session::{Connection, Session, OUTBOX_CAPACITY};

use std::sync::Arc;

/// Dial a configured peer and hand the socket to the session layer. The
/// connection is live in the registry when this returns.
pub async fn dial(
    state: &SharedServerState,
    id: &str,
    config: &ConnectionConfig,
) -> io::Result<Arc<Connection>> {
    let addr = config.family.resolve(&config.host, config.port).await?;
    let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;

    if let Err(err) = stream.set_nodelay(true) {
        debug!(error = %err, "socket configuration failed");
    }
    let local_addr = stream.local_addr()?;
    let peer_addr = stream.peer_addr()?;

    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let conn = Arc::new(Connection::new(
        id.to_string(),
        Direction::Outgoing,
        None,
        local_addr,
        peer_addr,
        outbox_tx,
        config.request_timeout,
    ));

    state.connections.insert(conn.clone()).await;
    Session::spawn(state.clone(), conn.clone(), stream, outbox_rx);

    info!(connection_id = %id, peer = %peer_addr, "connected");
    metrics::counter!("smpp_connects_total").increment(1);
    metrics::gauge!("smpp_connections_active").increment(1.0);
    Ok(conn)
}

/// Connect through the bus and, once up, issue the configured bind after the
/// bind delay. Returns whether the connect succeeded.
async fn connect_and_bind(state: &SharedServerState, id: &str, config: &ConnectionConfig) -> bool {
    let connect = Event::new("smpp.connect", Direction::Outgoing)
        .with("connection_id", id.to_string());
    match state.bus.dispatch(connect).await {
        Ok(answer) if answer.error.is_none() => {}
        Ok(answer) => {
            warn!(connection_id = %id, error = ?answer.error, "connect failed");
            return false;
        }
        Err(_) => return false,
    }

    tokio::time::sleep(config.bind_delay).await;

    let bind = Event::new(config.bind_type.event_name(), Direction::Outgoing)
        .with("connection_id", id.to_string())
        .with("system_id", config.system_id.clone())
        .with("password", config.password.clone());
    match state.bus.dispatch(bind).await {
        Ok(answer) if answer.error.is_none() => {
            info!(connection_id = %id, bind = config.bind_type.event_name(), "bound");
        }
        Ok(answer) => {
            warn!(connection_id = %id, error = ?answer.error, "bind failed");
        }
        Err(_) => {}
    }
    true
}

/// Arm the restart timer for a lost connection. When it fires, the link is
/// redialed and rebound unless somebody already brought it back.
pub fn schedule_restart(state: SharedServerState, id: String, config: ConnectionConfig) {
    let Some(restart) = config.restart else {
        return;
    };
    tokio::spawn(async move {
        tokio::time::sleep(restart).await;
        if state.shutdown.is_triggered() {
            return;
        }
        if state.connections.get(&id).await.is_some() {
            debug!(connection_id = %id, "connection already back, skipping restart");
            return;
        }
        info!(connection_id = %id, "restarting connection");
        metrics::counter!("smpp_restarts_total").increment(1);
        if !connect_and_bind(&state, &id, &config).await {
            // keep trying until the peer comes back
            schedule_restart(state.clone(), id, config);
        }
    });
}

/// Arm the rebind timer after a peer-initiated unbind. Fires only if the
/// same connection instance is still up and still unbound.
pub fn schedule_rebind(state: SharedServerState, id: String, epoch: u64, config: ConnectionConfig) {
    let Some(restart) = config.restart else {
        return;
    };
    tokio::spawn(async move {
        tokio::time::sleep(restart).await;
        if state.shutdown.is_triggered() {
            return;
        }
        let Some(conn) = state.connections.get(&id).await else {
            return;
        };
        if conn.epoch != epoch || conn.is_bound().await {
            return;
        }
        info!(connection_id = %id, "rebinding");
        let bind = Event::new(config.bind_type.event_name(), Direction::Outgoing)
            .with("connection_id", id.clone())
            .with("system_id", config.system_id.clone())
            .with("password", config.password.clone());
        match state.bus.dispatch(bind).await {
            Ok(answer) if answer.error.is_none() => {}
            Ok(answer) => warn!(connection_id = %id, error = ?answer.error, "rebind failed"),
            Err(_) => {}
        }
    });
}

/// Bring up every connection the configuration enables.
pub fn start_configured(state: SharedServerState) {
    for (id, config) in &state.config.connection {
        if !config.enabled {
            continue;
        }
        let state = state.clone();
        let id = id.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if !connect_and_bind(&state, &id, &config).await && config.restart.is_some() {
                schedule_restart(state, id, config);
            }
        });
    }
}
