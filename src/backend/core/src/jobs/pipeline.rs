//! One processing cycle: fetch unseen events, dispatch, advance the watermark.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::model::Address;
use crate::processor::{DispatchReport, Dispatcher};
use crate::store::{EventSource, WatermarkStore};
use crate::watermark::Watermark;

/// Result of [`EventPipeline::run_cycle`].
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    /// Events returned by the event log
    pub fetched: usize,
    pub report: DispatchReport,
    /// Last applied timestamp after the cycle
    pub last_timestamp: i64,
}

/// The fetch, dispatch and advance sequence shared by both drivers.
pub struct EventPipeline {
    events: Arc<dyn EventSource>,
    watermarks: Arc<dyn WatermarkStore>,
    dispatcher: Arc<Dispatcher>,
}

impl EventPipeline {
    pub fn new(
        events: Arc<dyn EventSource>,
        watermarks: Arc<dyn WatermarkStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            events,
            watermarks,
            dispatcher,
        }
    }

    /// A pipeline reading events and the watermark from the same store.
    pub fn from_store<S>(store: Arc<S>, dispatcher: Arc<Dispatcher>) -> Self
    where
        S: EventSource + WatermarkStore + 'static,
    {
        Self::new(store.clone(), store, dispatcher)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run one cycle. The watermark only moves when the whole batch was
    /// dispatched; a failed cycle is simply retried by the next one.
    #[instrument(level = "debug", skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let watermark = Watermark::load(self.watermarks.as_ref()).await?;
        let events = self
            .events
            .retrieve_events(
                watermark.last_timestamp,
                &watermark.hashes_at_last_timestamp,
                None,
            )
            .await?;

        if events.is_empty() {
            debug!(last_timestamp = watermark.last_timestamp, "No new events");
            return Ok(CycleOutcome {
                fetched: 0,
                report: DispatchReport::default(),
                last_timestamp: watermark.last_timestamp,
            });
        }

        let report = self.dispatcher.process(&events).await?;
        let advanced = watermark.advance(self.watermarks.as_ref(), &events).await?;

        Ok(CycleOutcome {
            fetched: events.len(),
            report,
            last_timestamp: advanced.last_timestamp,
        })
    }

    /// Replay the full history of one contract without touching the
    /// watermark. Handlers are idempotent, so replaying applied events only
    /// fills in what was missed.
    #[instrument(skip(self), fields(contract = %contract_address))]
    pub async fn refresh_contract(&self, contract_address: &Address) -> Result<DispatchReport> {
        let events = self
            .events
            .retrieve_events(0, &HashSet::new(), Some(contract_address))
            .await?;
        info!(events = events.len(), "Refreshing contract");
        self.dispatcher.process(&events).await
    }
}
