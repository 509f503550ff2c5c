//! Registry processor - main entry point
//!
//! Folds governance contract events from the crawler's event log into the
//! registry's aggregates, either on a fixed schedule or on push
//! notifications.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::sync::watch;

use registry_core::{
    chain::{ChainReader, RpcChainReader},
    config::{Config, RunMode},
    jobs::{EventPipeline, PollingDriver, PushDriver, RedisStreamSubscriber},
    processor::Dispatcher,
    store::PgStore,
    telemetry,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Polling,
    Push,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Polling => RunMode::Polling,
            Mode::Push => RunMode::Push,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "registry-processor", version, about)]
struct Cli {
    /// Configuration file; environment variables prefixed REGISTRY__ override it
    #[arg(short, long, env = "REGISTRY_CONFIG")]
    config: Option<String>,

    /// Override the configured run mode
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Run a single processing cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(mode) = cli.mode {
        config.processor.mode = mode.into();
        config.validate().context("Invalid configuration")?;
    }

    telemetry::init_logging(&config.observability.logging())?;
    let _metrics = telemetry::init_metrics(&config.observability.metrics())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?config.processor.mode,
        policy = ?config.processor.error_policy,
        "Starting registry processor"
    );

    let result = run(config, cli.once).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Processor exited with error");
    }

    telemetry::shutdown();
    result
}

async fn run(config: Config, once: bool) -> anyhow::Result<()> {
    let store = Arc::new(PgStore::connect(&config.database).await?);
    store.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Connected to database, migrations applied");

    let chain: Arc<dyn ChainReader> = Arc::new(RpcChainReader::new(&config.chain)?);
    let dispatcher = Arc::new(Dispatcher::with_default_handlers(
        store.clone(),
        chain,
        &config.processor,
    ));
    tracing::info!(handlers = ?dispatcher.handler_names(), "Dispatcher ready");

    let pipeline = Arc::new(EventPipeline::from_store(store, dispatcher.clone()));

    if once {
        let outcome = PollingDriver::new(pipeline, config.processor.poll_interval)
            .run_once()
            .await?;
        tracing::info!(
            fetched = outcome.fetched,
            handled = outcome.report.handled,
            dead_lettered = outcome.report.dead_lettered,
            last_timestamp = outcome.last_timestamp,
            "Single cycle complete"
        );
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match config.processor.mode {
        RunMode::Polling => {
            PollingDriver::new(pipeline, config.processor.poll_interval)
                .run_until(shutdown_rx)
                .await?;
        }
        RunMode::Push => {
            let subscription = config
                .subscription
                .as_ref()
                .context("push mode requires a subscription section")?;
            let subscriber = RedisStreamSubscriber::connect(subscription).await?;
            let (inbound, errors, reader) = subscriber.spawn(shutdown_rx.clone());

            let stats = PushDriver::new(pipeline)
                .run(inbound, errors, shutdown_rx)
                .await?;
            reader.await.context("Subscription task failed")?;
            tracing::info!(received = stats.received, acked = stats.acked, "Push processing stopped");
        }
    }

    let dead_letters = dispatcher.drain_dead_letters();
    if !dead_letters.is_empty() {
        tracing::warn!(count = dead_letters.len(), "Exiting with dead-lettered events");
        for letter in &dead_letters {
            tracing::warn!(
                hash = %letter.hash,
                contract = %letter.event.contract_name,
                event_type = %letter.event.event_type,
                code = ?letter.error_code,
                error = %letter.error,
                "Dead-lettered event"
            );
        }
    }

    tracing::info!("Processor shutdown complete");
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
