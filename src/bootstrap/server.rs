use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use crate::bus::LocalBus;
use crate::command;
use crate::config::Config;
use crate::connector;
use crate::listener::Listener;
use crate::telemetry;

use super::{ServerState, SharedServerState};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The smpplink daemon: one bus, the configured listeners and connections,
/// and a signal-driven shutdown.
pub struct Server {
    state: SharedServerState,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let bus = Arc::new(LocalBus::new());
        let state = ServerState::new(config, bus);
        command::install(&state);
        Self { state }
    }

    pub fn state(&self) -> SharedServerState {
        self.state.clone()
    }

    /// Run the server until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            listeners = self.state.config.listener.len(),
            connections = self.state.config.connection.len(),
            "starting smpplink"
        );

        if let Some(address) = self.state.config.metrics_address {
            telemetry::install_prometheus(address)?;
        }

        self.start_listeners().await;
        connector::start_configured(self.state.clone());

        metrics::counter!("smpp_server_starts_total").increment(1);

        wait_for_signal().await;
        info!("shutting down");

        self.state.shutdown.trigger();
        self.state.listeners.close_all().await;
        self.state.connections.close_all().await;
        self.drain().await;

        info!("smpplink stopped");
        Ok(())
    }

    async fn start_listeners(&self) {
        for (id, config) in &self.state.config.listener {
            if !config.enabled {
                continue;
            }
            match Listener::create(self.state.clone(), id.clone(), config.clone()).await {
                Ok(_) => {}
                Err(err) => {
                    warn!(listener_id = %id, error = %err, "failed to start listener");
                }
            }
        }
    }

    /// Give sessions a moment to flush and tear down.
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if self.state.connections.is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let remaining = self.state.connections.len().await;
        if remaining > 0 {
            warn!(remaining, "drain timeout reached with live connections");
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
