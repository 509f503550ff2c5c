//! Structured logging with JSON/pretty/compact formats and optional OTLP export.
//!
//! - JSON format for production environments
//! - Pretty format for development
//! - Per-module log level configuration
//! - Span export to an OpenTelemetry collector when an endpoint is configured

use opentelemetry_otlp::WithExportConfig;
use serde::Deserialize;
use std::collections::HashMap;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty or compact)
    #[serde(default)]
    pub format: LogFormat,

    /// Per-module log levels
    #[serde(default)]
    pub module_levels: HashMap<String, String>,

    /// Whether to include file/line information
    #[serde(default = "default_include_location")]
    pub include_location: bool,

    /// Whether to include target (module path)
    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Span event configuration
    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Service name reported to the trace collector
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP collector endpoint; spans are only exported when set
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            module_levels: HashMap::new(),
            include_location: default_include_location(),
            include_target: default_include_target(),
            span_events: SpanEventConfig::default(),
            service_name: default_service_name(),
            otlp_endpoint: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production/structured logging
    #[default]
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact single-line format
    Compact,
}

/// Configuration for span event logging.
#[derive(Debug, Clone, Deserialize)]
pub struct SpanEventConfig {
    /// Log when spans are created
    #[serde(default)]
    pub on_new: bool,

    /// Log when spans are closed
    #[serde(default = "default_on_close")]
    pub on_close: bool,
}

impl Default for SpanEventConfig {
    fn default() -> Self {
        Self {
            on_new: false,
            on_close: default_on_close(),
        }
    }
}

impl SpanEventConfig {
    fn to_fmt_span(&self) -> FmtSpan {
        let mut span = FmtSpan::NONE;
        if self.on_new {
            span |= FmtSpan::NEW;
        }
        if self.on_close {
            span |= FmtSpan::CLOSE;
        }
        span
    }
}

// Default value functions
fn default_log_level() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string())
}

fn default_include_location() -> bool {
    false
}

fn default_include_target() -> bool {
    true
}

fn default_on_close() -> bool {
    false
}

fn default_service_name() -> String {
    "registry-processor".to_string()
}

impl LoggingConfig {
    /// Build the environment filter from the global level and module directives.
    pub fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level)?;
        for (module, level) in &self.module_levels {
            let directive = format!("{}={}", module, level);
            filter = filter.add_directive(directive.parse()?);
        }
        Ok(filter)
    }
}

fn otlp_tracer(endpoint: &str, service_name: &str) -> anyhow::Result<opentelemetry_sdk::trace::Tracer> {
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::config().with_resource(opentelemetry_sdk::Resource::new(vec![
                opentelemetry::KeyValue::new("service.name", service_name.to_string()),
            ])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;
    Ok(tracer)
}

/// Initialize the logging subsystem.
///
/// Installs a global subscriber made of an [`EnvFilter`], an optional
/// OpenTelemetry layer and one fmt layer in the configured format. Must be
/// called from within a Tokio runtime when `otlp_endpoint` is set.
///
/// # Errors
///
/// Returns an error if a filter directive is invalid, the OTLP pipeline
/// cannot be built, or a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = config.env_filter()?;

    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = otlp_tracer(endpoint, &config.service_name)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(otel_layer)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(otel_layer)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_span_events(config.span_events.to_fmt_span())
                .with_file(config.include_location)
                .with_line_number(config.include_location)
                .with_target(config.include_target);

            tracing_subscriber::registry()
                .with(filter)
                .with(otel_layer)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}

/// Flush and shut down the OpenTelemetry tracer provider.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
