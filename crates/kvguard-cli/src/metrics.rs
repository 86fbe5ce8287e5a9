//! Metrics bootstrap

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Describe the lock and filter metrics and, when an address is configured,
/// serve them for Prometheus to scrape
pub fn init_metrics(prometheus_address: Option<SocketAddr>) -> anyhow::Result<()> {
    if let Some(address) = prometheus_address {
        PrometheusBuilder::new()
            .with_http_listener(address)
            .install()?;
        info!(address = %address, "Prometheus exporter listening");
    }

    kvguard_lock::metrics::describe();
    kvguard_filter::describe_metrics();
    Ok(())
}
