use crate::error::AppError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder behind the `metrics` macros.
///
/// Without a recorder every `counter!`/`histogram!` call is a no-op, so library
/// code can emit metrics unconditionally.
pub fn init_metrics() -> Result<(), AppError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to install metrics recorder: {}", e)))?;

    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Render the current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    match METRICS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => {
            tracing::error!("Metrics recorder not initialized");
            "# Metrics recorder not initialized\n".to_string()
        }
    }
}
