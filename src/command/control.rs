use async_trait::async_trait;
use serde_json::{json, Value};

use crate::bootstrap::SharedServerState;
use crate::bus::{Event, EventHandler};

const HELP_TEXT: &str = "smpp listeners|connections";

/// Operator queries: `bus.status` for a one-line health summary and
/// `bus.command` for the `smpp ...` sub-commands.
pub struct ControlHandler {
    state: SharedServerState,
}

impl ControlHandler {
    pub fn new(state: SharedServerState) -> Self {
        Self { state }
    }

    async fn status(&self, event: Event) -> Event {
        let listeners = self.state.listeners.len().await;
        let connections = self.state.connections.len().await;
        event.resolve(format!(
            "listeners:{listeners};connections:{connections};status:on"
        ))
    }

    async fn command(&self, event: Event) -> Option<Event> {
        let line = event.get_str("line").unwrap_or_default().trim().to_string();
        match line.as_str() {
            "smpp listeners" => {
                let mut rows = Vec::new();
                for listener in self.state.listeners.list().await {
                    rows.push(json!({
                        "id": listener.id,
                        "host": listener.local_addr.ip().to_string(),
                        "port": listener.local_addr.port(),
                        "family": listener.family.as_str(),
                    }));
                }
                Some(event.resolve(Value::Array(rows)))
            }
            "smpp connections" => {
                let mut rows = Vec::new();
                for conn in self.state.connections.list().await {
                    let bound = conn
                        .bind_role()
                        .await
                        .map_or(Value::Null, |role| Value::from(role.to_string()));
                    rows.push(json!({
                        "id": conn.id,
                        "bound": bound,
                        "system_id": conn.system_id().await,
                    }));
                }
                Some(event.resolve(Value::Array(rows)))
            }
            "help" => {
                let text = match &event.result {
                    Some(Value::String(existing)) => format!("{existing}\n{HELP_TEXT}"),
                    _ => HELP_TEXT.to_string(),
                };
                let mut event = event;
                event.result = Some(Value::from(text));
                Some(event)
            }
            _ => None,
        }
    }
}

#[async_trait]
impl EventHandler for ControlHandler {
    async fn handle(&self, event: Event) -> Option<Event> {
        if event.handled {
            return None;
        }
        match event.name.as_str() {
            "bus.status" => Some(self.status(event).await),
            "bus.command" => self.command(event).await,
            _ => None,
        }
    }
}
