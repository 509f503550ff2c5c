//! Prometheus metrics for batches, dispatch, watermark progress and errors.
//!
//! ```rust,no_run
//! use registry_core::telemetry::metrics::{BatchMetrics, DispatchMetrics};
//!
//! DispatchMetrics::dispatched("listing");
//! BatchMetrics::record("success", 0.042);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Port for the Prometheus scrape listener; no listener when unset
    #[serde(default)]
    pub listen_port: Option<u16>,

    /// Histogram buckets for batch durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen_port: None,
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
}

/// Handle to the installed recorder.
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

/// Initialize the metrics subsystem.
///
/// With `listen_port` set the exporter also serves `/metrics` over HTTP,
/// which requires a running Tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry {
            prometheus_handle: None,
        });
    }

    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder = builder.set_buckets(&config.duration_buckets)?;

    let handle = match config.listen_port {
        Some(port) => {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            let (recorder, exporter) = builder.with_http_listener(addr).build()?;
            let handle = recorder.handle();
            tokio::spawn(async move {
                if let Err(e) = exporter.await {
                    tracing::error!(error = ?e, "Prometheus exporter stopped");
                }
            });
            metrics::set_global_recorder(recorder)
                .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;
            handle
        }
        None => builder.install_recorder()?,
    };

    register_metric_descriptions();

    tracing::info!(listen_port = ?config.listen_port, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

fn register_metric_descriptions() {
    describe_counter!(
        "registry_events_dispatched_total",
        "Events claimed and applied by a handler"
    );
    describe_counter!(
        "registry_events_unclaimed_total",
        "Events no handler claimed"
    );
    describe_counter!(
        "registry_events_dead_lettered_total",
        "Events skipped under the skip-and-dead-letter policy"
    );
    describe_counter!("registry_batches_total", "Processed batches by outcome");
    describe_histogram!(
        "registry_batch_duration_seconds",
        "Batch processing duration in seconds"
    );
    describe_gauge!(
        "registry_watermark_timestamp",
        "Timestamp of the last fully processed event"
    );
    describe_counter!(
        "registry_reconciliations_total",
        "Aggregates recovered from chain state"
    );
    describe_counter!(
        "registry_notifications_total",
        "Inbound notifications by kind"
    );
    describe_counter!("registry_errors_total", "Errors by code, category and severity");
}

/// Per-event dispatch metrics.
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn dispatched(handler: &'static str) {
        counter!("registry_events_dispatched_total", "handler" => handler).increment(1);
    }

    pub fn unclaimed() {
        counter!("registry_events_unclaimed_total").increment(1);
    }

    pub fn dead_lettered() {
        counter!("registry_events_dead_lettered_total").increment(1);
    }
}

/// Batch-level metrics.
pub struct BatchMetrics;

impl BatchMetrics {
    /// Record a finished batch.
    pub fn record(outcome: &'static str, duration_seconds: f64) {
        counter!("registry_batches_total", "outcome" => outcome).increment(1);
        histogram!("registry_batch_duration_seconds", "outcome" => outcome).record(duration_seconds);
    }

    pub fn watermark(timestamp: i64) {
        gauge!("registry_watermark_timestamp").set(timestamp as f64);
    }
}

/// Chain reconciliation metrics.
pub struct ReconciliationMetrics;

impl ReconciliationMetrics {
    pub fn record(kind: &'static str) {
        counter!("registry_reconciliations_total", "kind" => kind).increment(1);
    }
}

/// Push driver notification metrics.
pub struct NotificationMetrics;

impl NotificationMetrics {
    pub fn record(kind: &'static str) {
        counter!("registry_notifications_total", "kind" => kind).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert!(config.listen_port.is_none());
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_disabled_registry_renders_empty() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        let registry = init_metrics(&config).unwrap();
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_helpers_without_recorder() {
        // No recorder installed: the macros are no-ops.
        DispatchMetrics::dispatched("listing");
        DispatchMetrics::unclaimed();
        BatchMetrics::record("success", 0.01);
        BatchMetrics::watermark(1_700_000_000);
    }
}
