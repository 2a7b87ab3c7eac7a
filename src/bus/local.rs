use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::{BusError, Event, EventBus, EventHandler};

const OBSERVER_BUFFER: usize = 256;

/// In-process bus. Handlers for a name run in installation order; the first
/// one that answers wins. Observers get a broadcast copy of every submission
/// and may lag without affecting delivery.
pub struct LocalBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    observers: broadcast::Sender<Event>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_BUFFER);
        Self {
            handlers: RwLock::new(HashMap::new()),
            observers,
        }
    }

    fn chain(&self, name: &str) -> Vec<Arc<dyn EventHandler>> {
        match self.handlers.read() {
            Ok(map) => map.get(name).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn broadcast(&self, event: &Event) {
        // Nobody listening is fine.
        let _ = self.observers.send(event.clone());
    }

    async fn run_chain(chain: Vec<Arc<dyn EventHandler>>, event: Event) -> Event {
        let mut current = event;
        for handler in chain {
            if let Some(answered) = handler.handle(current.clone()).await {
                current = answered;
                break;
            }
        }
        current
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn dispatch(&self, event: Event) -> Result<Event, BusError> {
        self.broadcast(&event);
        let chain = self.chain(&event.name);
        if chain.is_empty() {
            debug!(event = %event.name, "no handler installed");
            return Ok(event);
        }
        Ok(Self::run_chain(chain, event).await)
    }

    fn enqueue(&self, event: Event) {
        self.broadcast(&event);
        let chain = self.chain(&event.name);
        if chain.is_empty() {
            return;
        }
        tokio::spawn(async move {
            let _ = Self::run_chain(chain, event).await;
        });
    }

    fn install(&self, name: &str, handler: Arc<dyn EventHandler>) {
        if let Ok(mut map) = self.handlers.write() {
            map.entry(name.to_string()).or_default().push(handler);
        }
    }

    fn observe(&self) -> broadcast::Receiver<Event> {
        self.observers.subscribe()
    }
}
