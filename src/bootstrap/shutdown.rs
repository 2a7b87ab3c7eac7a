use tokio::sync::watch;
use tracing::info;

/// Process-wide shutdown signal. Every long-lived task subscribes and bails
/// out when the flag flips.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Flip the flag. Idempotent.
    pub fn trigger(&self) {
        if !self.is_triggered() {
            info!("shutdown triggered");
            let _ = self.tx.send(true);
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_subscribers() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        // second trigger is a no-op
        shutdown.trigger();
        assert!(shutdown.is_triggered());
    }
}
