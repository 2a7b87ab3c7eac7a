//! Internal event bus.
//!
//! All traffic between the SMPP session layer and the rest of the process
//! flows through events: open field maps with a name, a direction, and a
//! handled/error/result envelope. `dispatch` submits an event and waits for
//! the handler chain to answer it; `enqueue` is fire-and-forget for notices
//! nobody needs to answer.

mod local;

pub use local::LocalBus;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Whether an event describes traffic arriving from a peer or traffic we are
/// being asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Incoming => f.write_str("incoming"),
            Direction::Outgoing => f.write_str("outgoing"),
        }
    }
}

/// A bus event. Beyond the fixed envelope everything lives in `fields`, so
/// handlers can attach whatever they need without schema churn.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub direction: Option<Direction>,
    pub handled: bool,
    pub error: Option<String>,
    pub result: Option<Value>,
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            direction: Some(direction),
            handled: false,
            error: None,
            result: None,
            fields: Map::new(),
        }
    }

    /// A fire-and-forget notice. `handled` is pre-set: the producer does
    /// not expect a reply and command handlers must not treat it as one.
    pub fn notice(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: None,
            handled: true,
            error: None,
            result: None,
            fields: Map::new(),
        }
    }

    /// An undirected query that does expect an answer, used by operators.
    pub fn request(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: None,
            handled: false,
            error: None,
            result: None,
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.fields.get(key).and_then(Value::as_u64).map(|v| v as u32)
    }

    /// Mark the event answered with an error kind.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.handled = true;
        self.error = Some(error.into());
        self
    }

    /// Mark the event answered with a result.
    pub fn resolve(mut self, result: impl Into<Value>) -> Self {
        self.handled = true;
        self.result = Some(result.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus is shutting down")]
    Closed,
}

/// A handler installed on the bus for one event name. Returning `None` passes
/// the event to the next handler in the chain; returning `Some` answers it.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Option<Event>;
}

/// The bus surface the rest of the process talks to.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Submit an event and wait for the handler chain to answer it. If no
    /// handler answers, the event comes back unchanged.
    async fn dispatch(&self, event: Event) -> Result<Event, BusError>;

    /// Fire-and-forget submission. Handlers still run, but nobody waits.
    fn enqueue(&self, event: Event);

    /// Install a handler at the end of the chain for `name`.
    fn install(&self, name: &str, handler: Arc<dyn EventHandler>);

    /// Subscribe to a copy of every event submitted to the bus.
    fn observe(&self) -> broadcast::Receiver<Event>;
}

pub type SharedBus = Arc<dyn EventBus>;
