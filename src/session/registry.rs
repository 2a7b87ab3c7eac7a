use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::Connection;

/// Live connections by id. An id maps to at most one connection; a restart
/// replaces the entry with a new epoch.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, displacing any previous instance under the
    /// same id. The displaced instance, if any, is asked to close.
    pub async fn insert(&self, conn: Arc<Connection>) {
        let previous = self.inner.write().await.insert(conn.id.clone(), conn);
        if let Some(previous) = previous {
            debug!(connection_id = %previous.id, epoch = previous.epoch, "displacing stale connection");
            previous.request_close();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.read().await.get(id).cloned()
    }

    /// Remove the entry for `id` only if it still holds the given epoch.
    /// Deferred cleanup must not evict a newer instance that reused the id.
    pub async fn remove_if(&self, id: &str, epoch: u64) -> Option<Arc<Connection>> {
        let mut map = self.inner.write().await;
        match map.get(id) {
            Some(conn) if conn.epoch == epoch => map.remove(id),
            _ => None,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<Arc<Connection>> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Ask every live connection to close, for shutdown.
    pub async fn close_all(&self) {
        for conn in self.inner.read().await.values() {
            conn.request_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Direction;
    use crate::proto::Pdu;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn conn(id: &str, outbox: mpsc::Sender<Pdu>) -> Arc<Connection> {
        Arc::new(Connection::new(
            id.to_string(),
            Direction::Outgoing,
            None,
            "127.0.0.1:40001".parse().unwrap(),
            "127.0.0.1:2775".parse().unwrap(),
            outbox,
            Duration::from_secs(30),
        ))
    }

    #[tokio::test]
    async fn insert_displaces_same_id() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let first = conn("upstream", tx.clone());
        let second = conn("upstream", tx);
        registry.insert(first.clone()).await;
        registry.insert(second.clone()).await;
        assert_eq!(registry.len().await, 1);
        assert!(first.is_closing());
        assert!(!second.is_closing());
        assert_eq!(registry.get("upstream").await.unwrap().epoch, second.epoch);
    }

    #[tokio::test]
    async fn remove_if_respects_epoch() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let old = conn("upstream", tx.clone());
        let new = conn("upstream", tx);
        registry.insert(new.clone()).await;
        // a timer armed for the old epoch must not evict the new instance
        assert!(registry.remove_if("upstream", old.epoch).await.is_none());
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove_if("upstream", new.epoch).await.is_some());
        assert!(registry.is_empty().await);
    }
}
