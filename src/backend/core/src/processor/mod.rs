//! Event dispatch and the per-domain governance handlers.
//!
//! The [`Dispatcher`] decodes each event once and offers it to every
//! registered [`EventHandler`] in registration order. A handler returns
//! `Ok(true)` when it applied the event, `Ok(false)` when the event is not
//! its concern. Several handlers may claim one event: a TCR `Challenge`
//! creates the Challenge and Poll in [`ChallengeHandler`] and moves the
//! Listing in [`ListingHandler`].
//!
//! Events are applied strictly in delivered order, one at a time. Each
//! handler's writes are durable as soon as it returns; there is no staging
//! phase.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::chain::ChainReader;
use crate::config::{BatchErrorPolicy, ProcessorConfig};
use crate::error::{ErrorCode, ProcessorError, Result};
use crate::events::{Event, GovernanceEvent};
use crate::model::Amount;
use crate::store::AggregateStore;
use crate::telemetry::{BatchMetrics, DispatchMetrics};

pub mod appeal;
pub mod challenge;
pub mod government;
pub mod listing;
pub mod multisig;
pub mod parameterizer;
pub mod reconcile;
pub mod token;

pub use appeal::AppealHandler;
pub use challenge::ChallengeHandler;
pub use government::GovernmentHandler;
pub use listing::ListingHandler;
pub use multisig::MultiSigHandler;
pub use parameterizer::ParameterizerHandler;
pub use reconcile::Reconciler;
pub use token::TokenTransferHandler;

/// A slice of the governance state machine.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Apply `decoded` if it belongs to this handler.
    async fn handle(&self, event: &Event, decoded: &GovernanceEvent) -> Result<bool>;
}

/// `timestamp + seconds`, saturating.
pub(crate) fn expiry_after(timestamp: i64, seconds: Amount) -> i64 {
    timestamp.saturating_add(i64::try_from(seconds).unwrap_or(i64::MAX))
}

// =============================================================================
// Dead letters
// =============================================================================

/// An event skipped under [`BatchErrorPolicy::SkipAndDeadLetter`].
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub event: Event,
    pub hash: String,
    pub error_code: ErrorCode,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    fn new(event: &Event, error: &ProcessorError) -> Self {
        Self {
            event: event.clone(),
            hash: event.hash(),
            error_code: error.code(),
            error: error.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// Bounded queue of dead letters. The oldest entry is dropped when full.
#[derive(Debug)]
pub struct DeadLetterQueue {
    entries: VecDeque<DeadLetter>,
    max_size: usize,
}

impl DeadLetterQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
        }
    }

    pub fn push(&mut self, entry: DeadLetter) {
        if self.max_size == 0 {
            return;
        }
        if self.entries.len() >= self.max_size {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> Vec<DeadLetter> {
        self.entries.drain(..).collect()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Outcome of one [`Dispatcher::process`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Events looked at
    pub processed: usize,
    /// Events at least one handler applied
    pub handled: usize,
    /// Events no handler owns
    pub unclaimed: usize,
    /// Events skipped with a data error
    pub dead_lettered: usize,
}

pub struct Dispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
    policy: BatchErrorPolicy,
    dead_letters: Mutex<DeadLetterQueue>,
}

impl Dispatcher {
    /// A dispatcher with no handlers.
    pub fn new(policy: BatchErrorPolicy, dead_letter_capacity: usize) -> Self {
        Self {
            handlers: Vec::new(),
            policy,
            dead_letters: Mutex::new(DeadLetterQueue::new(dead_letter_capacity)),
        }
    }

    /// Register a handler after the existing ones.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// The full handler set over one store.
    ///
    /// The challenge handler runs before the listing handler so a new
    /// challenge reads the listing's deposit before the stake is deducted.
    pub fn with_default_handlers<S>(
        store: Arc<S>,
        chain: Arc<dyn ChainReader>,
        config: &ProcessorConfig,
    ) -> Self
    where
        S: AggregateStore + 'static,
    {
        let reconciler = Reconciler::new(chain);
        let grace_period = config.grace_period_secs();

        Self::new(config.error_policy, config.dead_letter_capacity)
            .with_handler(Arc::new(ChallengeHandler::new(store.clone())))
            .with_handler(Arc::new(AppealHandler::new(store.clone(), store.clone())))
            .with_handler(Arc::new(ListingHandler::new(store.clone(), store.clone())))
            .with_handler(Arc::new(ParameterizerHandler::new(
                store.clone(),
                store.clone(),
                reconciler.clone(),
                grace_period,
            )))
            .with_handler(Arc::new(GovernmentHandler::new(
                store.clone(),
                store.clone(),
                reconciler,
            )))
            .with_handler(Arc::new(TokenTransferHandler::new(store.clone())))
            .with_handler(Arc::new(MultiSigHandler::new(store)))
    }

    pub fn policy(&self) -> BatchErrorPolicy {
        self.policy
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Apply `events` in order.
    ///
    /// Under [`BatchErrorPolicy::Abort`] the first error stops the batch.
    /// Under [`BatchErrorPolicy::SkipAndDeadLetter`] data errors are recorded
    /// and skipped; infrastructure errors still stop the batch.
    pub async fn process(&self, events: &[Event]) -> Result<DispatchReport> {
        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", %batch_id, events = events.len());

        async move {
            let started = Instant::now();
            let result = self.process_batch(events).await;
            let elapsed = started.elapsed().as_secs_f64();

            match &result {
                Ok(report) => {
                    BatchMetrics::record("success", elapsed);
                    info!(
                        handled = report.handled,
                        unclaimed = report.unclaimed,
                        dead_lettered = report.dead_lettered,
                        "Processed batch"
                    );
                }
                Err(err) => {
                    BatchMetrics::record("failure", elapsed);
                    err.log();
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn process_batch(&self, events: &[Event]) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();

        for event in events {
            match self.dispatch(event).await {
                Ok(true) => report.handled += 1,
                Ok(false) => report.unclaimed += 1,
                Err(err)
                    if self.policy == BatchErrorPolicy::SkipAndDeadLetter && err.is_data_error() =>
                {
                    warn!(
                        contract = %event.contract_name,
                        event_type = %event.event_type,
                        tx_hash = %event.tx_hash,
                        log_index = event.log_index,
                        error = %err,
                        "Skipping event"
                    );
                    self.dead_letters.lock().push(DeadLetter::new(event, &err));
                    DispatchMetrics::dead_lettered();
                    report.dead_lettered += 1;
                }
                Err(err) => {
                    return Err(err
                        .with_context("tx_hash", &event.tx_hash)
                        .with_context("log_index", event.log_index)
                        .with_context("processed", report.processed));
                }
            }
            report.processed += 1;
        }

        Ok(report)
    }

    /// Offer one event to every handler. Returns whether any claimed it.
    #[instrument(
        level = "debug",
        skip_all,
        fields(
            contract = %event.contract_name,
            event_type = %event.event_type,
            tx_hash = %event.tx_hash,
            log_index = event.log_index,
        )
    )]
    pub async fn dispatch(&self, event: &Event) -> Result<bool> {
        let Some(decoded) = GovernanceEvent::decode(event)? else {
            debug!("Unclaimed event");
            DispatchMetrics::unclaimed();
            return Ok(false);
        };

        let mut claimed = false;
        for handler in &self.handlers {
            if handler.handle(event, &decoded).await? {
                debug!(handler = handler.name(), "Applied event");
                DispatchMetrics::dispatched(handler.name());
                claimed = true;
            }
        }

        if !claimed {
            DispatchMetrics::unclaimed();
        }
        Ok(claimed)
    }

    /// Take the events skipped so far.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().drain()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().len()
    }
}
