use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Install the process-wide Prometheus recorder with an HTTP scrape
/// endpoint. Counters recorded through the `metrics` facade before this
/// runs are dropped, which is fine for boot-time noise.
pub fn install_prometheus(address: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("failed to install prometheus exporter")?;
    info!(address = %address, "metrics endpoint started");
    Ok(())
}
