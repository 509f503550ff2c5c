//! Configuration management.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ProcessorError, Result};
use crate::model::Address;
use crate::telemetry::{LogFormat, LoggingConfig, MetricsConfig};

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Processing loop configuration
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Notification subscription (push mode only)
    #[serde(default)]
    pub subscription: Option<SubscriptionConfig>,

    /// Chain RPC configuration
    #[serde(default)]
    pub chain: ChainConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Idle connections are closed after this long
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// Connections are recycled after this long
    #[serde(default = "default_max_lifetime", with = "humantime_serde")]
    pub max_lifetime: Duration,

    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

/// How the processor is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Fixed-interval cycles
    #[default]
    Polling,
    /// One cycle per inbound notification
    Push,
}

impl std::str::FromStr for RunMode {
    type Err = ProcessorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(Self::Polling),
            "push" | "subscription" => Ok(Self::Push),
            other => Err(ProcessorError::configuration(format!("unknown run mode: {}", other))),
        }
    }
}

/// What the dispatcher does when an event fails with a data error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchErrorPolicy {
    /// Abort the remaining batch; the watermark is not advanced
    #[default]
    Abort,
    /// Record the event in the dead-letter queue and continue
    SkipAndDeadLetter,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub mode: RunMode,

    /// Interval between polling cycles
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Window after a proposal's application expiry during which a failed
    /// challenge still promotes the proposed value
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub processing_grace_period: Duration,

    #[serde(default)]
    pub error_policy: BatchErrorPolicy,

    /// Maximum number of dead-lettered events kept in memory
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
}

impl ProcessorConfig {
    /// Grace period in whole seconds, saturating at `i64::MAX`.
    pub fn grace_period_secs(&self) -> i64 {
        i64::try_from(self.processing_grace_period.as_secs()).unwrap_or(i64::MAX)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            poll_interval: default_poll_interval(),
            processing_grace_period: default_grace_period(),
            error_policy: BatchErrorPolicy::default(),
            dead_letter_capacity: default_dead_letter_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Stream the crawler publishes notifications to
    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// XREADGROUP block timeout
    #[serde(default = "default_block_timeout", with = "humantime_serde")]
    pub block_timeout: Duration,

    /// Capacity of the inbound message channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            stream_key: default_stream_key(),
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            block_timeout: default_block_timeout(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Ethereum JSON-RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Address of the Government contract; proposals read from this address
    /// use the government record layout
    #[serde(default)]
    pub government_address: Option<Address>,

    #[serde(default = "default_chain_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            government_address: None,
            request_timeout: default_chain_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Prometheus scrape port; metrics are recorded but not served when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: None,
        }
    }
}

impl ObservabilityConfig {
    /// Build the logging configuration for [`crate::telemetry::init_logging`].
    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: if self.json_logging { LogFormat::Json } else { LogFormat::Pretty },
            otlp_endpoint: self.otlp_endpoint.clone(),
            ..LoggingConfig::default()
        }
    }

    /// Build the metrics configuration for [`crate::telemetry::init_metrics`].
    pub fn metrics(&self) -> MetricsConfig {
        MetricsConfig {
            listen_port: self.metrics_port,
            ..MetricsConfig::default()
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_idle_timeout() -> Duration { Duration::from_secs(600) }
fn default_max_lifetime() -> Duration { Duration::from_secs(1800) }
fn default_acquire_timeout() -> Duration { Duration::from_secs(30) }
fn default_poll_interval() -> Duration { Duration::from_secs(300) }
fn default_grace_period() -> Duration { Duration::from_secs(604_800) }
fn default_dead_letter_capacity() -> usize { 1000 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_stream_key() -> String { "registry:events".to_string() }
fn default_consumer_group() -> String { "registry-processor".to_string() }
fn default_consumer_name() -> String { "processor-1".to_string() }
fn default_block_timeout() -> Duration { Duration::from_secs(5) }
fn default_channel_capacity() -> usize { 256 }
fn default_rpc_url() -> String { "http://localhost:8545".to_string() }
fn default_chain_timeout() -> Duration { Duration::from_secs(10) }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

const ENV_PREFIX: &str = "REGISTRY";

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the processor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(ProcessorError::configuration("database.url must not be empty"));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ProcessorError::configuration(format!(
                "database.min_connections ({}) exceeds database.max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ProcessorError::configuration("database.max_connections must be positive"));
        }
        if self.processor.poll_interval.is_zero() {
            return Err(ProcessorError::configuration("processor.poll_interval must be positive"));
        }
        if self.processor.mode == RunMode::Push {
            match &self.subscription {
                None => {
                    return Err(ProcessorError::configuration(
                        "push mode requires a [subscription] section",
                    ))
                }
                Some(sub) if sub.channel_capacity == 0 => {
                    return Err(ProcessorError::configuration(
                        "subscription.channel_capacity must be positive",
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_from_file_applies_defaults() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://registry@localhost/registry"
            "#,
        );

        let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.processor.mode, RunMode::Polling);
        assert_eq!(cfg.processor.error_policy, BatchErrorPolicy::Abort);
        assert_eq!(cfg.processor.processing_grace_period, Duration::from_secs(604_800));
        assert_eq!(cfg.database.max_connections, 10);
        assert!(cfg.subscription.is_none());
    }

    #[test]
    fn test_from_file_parses_durations_and_policy() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://registry@localhost/registry"
            max_lifetime = "1h"

            [processor]
            mode = "push"
            poll_interval = "30s"
            error_policy = "skip_and_dead_letter"

            [subscription]
            stream_key = "crawler:notifications"

            [chain]
            government_address = "0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD"
            "#,
        );

        let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.processor.mode, RunMode::Push);
        assert_eq!(cfg.processor.poll_interval, Duration::from_secs(30));
        assert_eq!(cfg.processor.error_policy, BatchErrorPolicy::SkipAndDeadLetter);
        assert_eq!(cfg.database.max_lifetime, Duration::from_secs(3600));
        assert_eq!(
            cfg.subscription.unwrap().stream_key,
            "crawler:notifications"
        );
        assert_eq!(
            cfg.chain.government_address.unwrap().as_str(),
            "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd"
        );
    }

    #[test]
    fn test_validate_rejects_push_without_subscription() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://registry@localhost/registry"

            [processor]
            mode = "push"
            "#,
        );

        let err = Config::from_file(file.path().to_str().unwrap()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_validate_rejects_inverted_pool_bounds() {
        let file = write_config(
            r#"
            [database]
            url = "postgres://registry@localhost/registry"
            min_connections = 20
            max_connections = 5
            "#,
        );

        assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_run_mode_from_str() {
        assert_eq!("push".parse::<RunMode>().unwrap(), RunMode::Push);
        assert_eq!("Polling".parse::<RunMode>().unwrap(), RunMode::Polling);
        assert!("cron".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_grace_period_secs_saturates() {
        let mut processor = ProcessorConfig::default();
        assert_eq!(processor.grace_period_secs(), 604_800);

        processor.processing_grace_period = Duration::from_secs(u64::MAX);
        assert_eq!(processor.grace_period_secs(), i64::MAX);
    }
}
