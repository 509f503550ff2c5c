//! Telemetry: structured logging, OpenTelemetry export and Prometheus metrics.
//!
//! - **Logging**: JSON/pretty/compact `tracing` output with per-module filters
//! - **Tracing**: optional OTLP span export layered onto the same subscriber
//! - **Metrics**: Prometheus recorder for batch, dispatch and watermark metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use registry_core::telemetry::{init_logging, init_metrics, LoggingConfig, MetricsConfig};
//!
//! init_logging(&LoggingConfig::default()).expect("Failed to initialize logging");
//! init_metrics(&MetricsConfig::default()).expect("Failed to initialize metrics");
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, shutdown, LogFormat, LoggingConfig, SpanEventConfig};
pub use metrics::{
    init_metrics, BatchMetrics, DispatchMetrics, MetricsConfig, MetricsRegistry,
    NotificationMetrics, ReconciliationMetrics,
};
