use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::bootstrap::SharedServerState;
use crate::bus::{Direction, Event, EventHandler};
use crate::config::{BindType, ConnectionConfig, IpFamily, ListenerConfig};
use crate::connector;
use crate::listener::{Listener, ListenerError};
use crate::proto::{Command, Pdu};
use crate::session::Connection;

use super::ErrorKind;

/// Answers the `smpp.*` command events: listener and connection lifecycle
/// plus every PDU send. Installed once for all names; the event name selects
/// the operation.
pub struct SmppHandler {
    state: SharedServerState,
}

impl SmppHandler {
    pub fn new(state: SharedServerState) -> Self {
        Self { state }
    }

    async fn listen(&self, event: Event) -> Event {
        let Some(id) = non_empty(event.get_str("listener_id")) else {
            return event.fail(ErrorKind::InvalidId.as_str());
        };
        let id = id.to_string();

        let mut config = self
            .state
            .config
            .listener
            .get(&id)
            .cloned()
            .unwrap_or_default();
        apply_listener_fields(&mut config, &event);

        match Listener::create(self.state.clone(), id, config).await {
            Ok(listener) => {
                let addr = listener.local_addr;
                event.resolve(json!({
                    "host": addr.ip().to_string(),
                    "port": addr.port(),
                }))
            }
            Err(ListenerError::AlreadyExists) => event.fail(ErrorKind::AlreadyExists.as_str()),
            Err(ListenerError::Bind(err)) => {
                warn!(error = %err, "listener bind failed");
                event.fail(ErrorKind::BindFailure.as_str())
            }
        }
    }

    async fn unlisten(&self, event: Event) -> Event {
        let Some(id) = non_empty(event.get_str("listener_id")) else {
            return event.fail(ErrorKind::NotFound.as_str());
        };
        match self.state.listeners.get(id).await {
            Some(listener) => {
                listener.close();
                event.resolve(true)
            }
            None => event.fail(ErrorKind::NotFound.as_str()),
        }
    }

    /// Create an outgoing connection, or describe the live one. Repeating
    /// the command for a live id is a snapshot, never a second socket.
    async fn connect(&self, event: Event) -> Event {
        let Some(id) = non_empty(event.get_str("connection_id")) else {
            return event.fail(ErrorKind::InvalidId.as_str());
        };
        let id = id.to_string();

        if let Some(conn) = self.state.connections.get(&id).await {
            return event.resolve(snapshot(&conn).await);
        }

        let mut config = self
            .state
            .config
            .connection
            .get(&id)
            .cloned()
            .unwrap_or_default();
        apply_connection_fields(&mut config, &event);

        match connector::dial(&self.state, &id, &config).await {
            Ok(conn) => event.resolve(snapshot(&conn).await),
            Err(err) => {
                warn!(connection_id = %id, error = %err, "connect failed");
                event.fail(ErrorKind::ConnectFailure.as_str())
            }
        }
    }

    async fn disconnect(&self, event: Event) -> Event {
        let Some(id) = non_empty(event.get_str("connection_id")) else {
            return event.fail(ErrorKind::NoConnection.as_str());
        };
        match self.state.connections.get(id).await {
            Some(conn) => {
                conn.request_close();
                event.resolve(true)
            }
            None => event.fail(ErrorKind::NoConnection.as_str()),
        }
    }

    /// Send a PDU on a live connection. Requests settle with the peer's
    /// response; responses and nacks settle as soon as they are queued.
    async fn send_pdu(&self, event: Event) -> Option<Event> {
        let command = event
            .name
            .strip_prefix("smpp.")
            .and_then(Command::from_name)?;

        // a missing or non-string connection id is silently ignored
        match event.get("connection_id") {
            Some(Value::String(_)) => {}
            _ => return None,
        }
        let id = event.get_str("connection_id").unwrap_or_default().to_string();

        let Some(conn) = self.state.connections.get(&id).await else {
            return Some(event.fail(ErrorKind::NoConnection.as_str()));
        };
        if requires_bound(command) && !conn.is_bound().await {
            return Some(event.fail(ErrorKind::NotBound.as_str()));
        }

        let sequence = event
            .get_u32("sequence_number")
            .unwrap_or_else(|| conn.next_sequence());
        let pdu = Pdu::from_fields(command, &event.fields, sequence);

        if command.is_response() {
            return Some(match conn.send(pdu).await {
                Ok(()) => event.resolve(true),
                Err(_) => event.fail(ErrorKind::NoConnection.as_str()),
            });
        }

        let waiter = match conn.send_request(pdu).await {
            Ok(waiter) => waiter,
            Err(_) => return Some(event.fail(ErrorKind::NoConnection.as_str())),
        };

        match timeout(conn.request_timeout(), waiter).await {
            Ok(Ok(response)) => {
                let mut fields = response.to_fields();
                fields.insert("command_id".into(), Value::from(response.command));
                Some(event.resolve(Value::Object(fields)))
            }
            _ => {
                debug!(connection_id = %id, command = command.name(), "request timed out");
                Some(event.fail(ErrorKind::Timeout.as_str()))
            }
        }
    }
}

#[async_trait]
impl EventHandler for SmppHandler {
    async fn handle(&self, event: Event) -> Option<Event> {
        // peer traffic and already-answered events are not commands
        if event.handled || event.direction == Some(Direction::Incoming) {
            return None;
        }
        match event.name.as_str() {
            "smpp.listen" => Some(self.listen(event).await),
            "smpp.unlisten" => Some(self.unlisten(event).await),
            "smpp.connect" => Some(self.connect(event).await),
            "smpp.disconnect" => Some(self.disconnect(event).await),
            _ => self.send_pdu(event).await,
        }
    }
}

/// Live-state description of a connection, used as the connect snapshot.
async fn snapshot(conn: &Connection) -> Value {
    let mut fields = conn.endpoint_fields();
    fields.insert("connection_id".into(), Value::from(conn.id.clone()));
    if let Some(listener_id) = &conn.listener_id {
        fields.insert("listener_id".into(), Value::from(listener_id.clone()));
    }
    let bound = conn
        .bind_role()
        .await
        .map_or(Value::Null, |role| Value::from(role.to_string()));
    fields.insert("bound".into(), bound);
    if let Some(system_id) = conn.system_id().await {
        fields.insert("system_id".into(), Value::from(system_id));
    }
    Value::Object(fields)
}

fn requires_bound(command: Command) -> bool {
    matches!(
        command,
        Command::SubmitSm
            | Command::SubmitSmResp
            | Command::DeliverSm
            | Command::DeliverSmResp
            | Command::Unbind
            | Command::UnbindResp
    )
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

fn parse_family(value: &str) -> Option<IpFamily> {
    match value {
        "ipv4" => Some(IpFamily::V4),
        "ipv6" => Some(IpFamily::V6),
        _ => None,
    }
}

/// Ad-hoc creation commands may override the configured defaults.
fn apply_listener_fields(config: &mut ListenerConfig, event: &Event) {
    if let Some(host) = non_empty(event.get_str("host")) {
        config.host = host.to_string();
    }
    if let Some(port) = event.get_u32("port") {
        config.port = port as u16;
    }
    if let Some(family) = event.get_str("family").and_then(parse_family) {
        config.family = family;
    }
}

fn apply_connection_fields(config: &mut ConnectionConfig, event: &Event) {
    if let Some(host) = non_empty(event.get_str("host")) {
        config.host = host.to_string();
    }
    if let Some(port) = event.get_u32("port") {
        config.port = port as u16;
    }
    if let Some(family) = event.get_str("family").and_then(parse_family) {
        config.family = family;
    }
    if let Some(system_id) = event.get_str("system_id") {
        config.system_id = system_id.to_string();
    }
    if let Some(password) = event.get_str("password") {
        config.password = password.to_string();
    }
    if let Some(bind_type) = event.get_str("type") {
        config.bind_type = match bind_type {
            "transmitter" => BindType::Transmitter,
            "receiver" => BindType::Receiver,
            _ => BindType::Transceiver,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_gate_covers_traffic_classes() {
        assert!(requires_bound(Command::SubmitSm));
        assert!(requires_bound(Command::DeliverSmResp));
        assert!(requires_bound(Command::Unbind));
        assert!(!requires_bound(Command::GenericNack));
        assert!(!requires_bound(Command::BindTransceiver));
        assert!(!requires_bound(Command::EnquireLink));
    }

    #[test]
    fn field_overrides_apply() {
        let mut config = ListenerConfig::default();
        let event = Event::request("smpp.listen")
            .with("host", "0.0.0.0")
            .with("port", 12775u32)
            .with("family", "ipv6");
        apply_listener_fields(&mut config, &event);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 12775);
        assert_eq!(config.family, IpFamily::V6);

        let mut config = ConnectionConfig::default();
        let event = Event::request("smpp.connect")
            .with("system_id", "acme")
            .with("type", "receiver");
        apply_connection_fields(&mut config, &event);
        assert_eq!(config.system_id, "acme");
        assert_eq!(config.bind_type, BindType::Receiver);
    }
}
