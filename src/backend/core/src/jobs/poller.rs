//! Fixed-interval polling driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use super::pipeline::{CycleOutcome, EventPipeline};
use super::scheduler::{Clock, CycleScheduler, SchedulerHandle, SystemClock};
use crate::error::Result;

pub struct PollingDriver {
    pipeline: Arc<EventPipeline>,
    interval: Duration,
    clock: Arc<dyn Clock>,
}

impl PollingDriver {
    pub fn new(pipeline: Arc<EventPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// A single cycle, outside any schedule.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        self.pipeline.run_cycle().await
    }

    /// Start cycling now and every `interval` after. Cycle errors are
    /// logged and retried on the next tick.
    pub fn start(&self) -> SchedulerHandle {
        let pipeline = self.pipeline.clone();
        CycleScheduler::new(self.interval, self.clock.clone())
            .with_immediate()
            .start(move || {
                let pipeline = pipeline.clone();
                async move {
                    match pipeline.run_cycle().await {
                        Ok(outcome) if outcome.fetched > 0 => info!(
                            fetched = outcome.fetched,
                            handled = outcome.report.handled,
                            last_timestamp = outcome.last_timestamp,
                            "Polling cycle complete"
                        ),
                        Ok(_) => {}
                        Err(err) => warn!(
                            error = %err,
                            code = ?err.code(),
                            "Polling cycle failed, retrying on next tick"
                        ),
                    }
                }
            })
    }

    /// Poll until `shutdown` turns true. The in-flight cycle finishes
    /// before this returns.
    pub async fn run_until(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(interval = ?self.interval, "Polling driver started");
        let handle = self.start();

        let _ = shutdown.wait_for(|stop| *stop).await;

        info!("Polling driver stopping");
        handle.stop();
        handle.join().await?;
        info!("Polling driver stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchErrorPolicy;
    use crate::events::decode::CIVIL_TCR;
    use crate::jobs::scheduler::ManualClock;
    use crate::processor::test_support::{addr, event};
    use crate::processor::{Dispatcher, ListingHandler};
    use crate::store::{InMemoryStore, ListingStore, WatermarkStore};
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_polls_until_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Dispatcher::new(BatchErrorPolicy::Abort, 10)
            .with_handler(Arc::new(ListingHandler::new(store.clone(), store.clone())));
        let pipeline = Arc::new(EventPipeline::from_store(store.clone(), Arc::new(dispatcher)));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let driver = PollingDriver::new(pipeline, Duration::from_secs(300)).with_clock(clock.clone());

        store.push_events(vec![event(
            CIVIL_TCR,
            "Application",
            addr(900),
            json!({
                "ListingAddress": addr(1).as_str(),
                "Deposit": 10,
                "AppEndDate": 100,
                "Data": "",
                "Applicant": addr(2).as_str(),
            }),
            50,
            0,
        )]);

        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { driver.run_until(rx).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.last_timestamp().await.unwrap() != 50 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("first cycle runs immediately");
        assert!(store.get_listing(&addr(1)).await.unwrap().is_some());

        tx.send(true).unwrap();
        run.await.unwrap().unwrap();
    }
}
