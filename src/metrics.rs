// ABOUTME: Prometheus recorder installation for the relay binary.
// ABOUTME: Installed once per process; later calls hand back the same handle.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder and describe the relay's metrics
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    chatrelay_core::metrics::describe();
    Ok(HANDLE.get_or_init(|| handle).clone())
}
