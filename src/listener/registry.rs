use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::Listener;

/// Live listeners by id.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: RwLock<HashMap<String, Arc<Listener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    pub async fn insert(&self, listener: Arc<Listener>) {
        self.inner
            .write()
            .await
            .insert(listener.id.clone(), listener);
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Listener>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Listener>> {
        self.inner.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn list(&self) -> Vec<Arc<Listener>> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Stop every accept loop, for shutdown.
    pub async fn close_all(&self) {
        for listener in self.inner.read().await.values() {
            listener.close();
        }
    }
}
