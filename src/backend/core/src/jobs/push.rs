//! Notification-driven processing.
//!
//! A notification only says "something new is stored". Each one triggers a
//! regular cycle that re-reads the event log from the watermark, so several
//! notifications for one batch collapse into one useful cycle and a few
//! empty ones. The notification is acknowledged only after its cycle has
//! committed the watermark; anything unacknowledged is redelivered and
//! replays harmlessly.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::pipeline::EventPipeline;
use super::subscription::InboundMessage;
use crate::error::{ProcessorError, Result};
use crate::model::Address;
use crate::telemetry::NotificationMetrics;

/// Counters for one [`PushDriver::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushStats {
    pub received: u64,
    /// Cycles or refreshes that completed and were acked
    pub acked: u64,
    /// Left unacknowledged for redelivery
    pub failed: u64,
    pub transport_errors: u64,
}

pub struct PushDriver {
    pipeline: Arc<EventPipeline>,
}

impl PushDriver {
    pub fn new(pipeline: Arc<EventPipeline>) -> Self {
        Self { pipeline }
    }

    /// Consume `inbound` until `shutdown` turns true or the channel closes.
    ///
    /// A message being processed when shutdown arrives is finished and
    /// acknowledged first.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut errors: mpsc::Receiver<ProcessorError>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<PushStats> {
        let mut stats = PushStats::default();
        let mut errors_open = true;
        info!("Push driver started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                message = inbound.recv() => match message {
                    Some(message) => self.handle(message, &mut stats).await,
                    None => {
                        info!("Inbound channel closed");
                        break;
                    }
                },
                transport = errors.recv(), if errors_open => match transport {
                    Some(err) => {
                        stats.transport_errors += 1;
                        NotificationMetrics::record("transport_error");
                        warn!(error = %err, code = ?err.code(), "Subscription transport error");
                    }
                    None => errors_open = false,
                },
            }
        }

        inbound.close();
        info!(
            received = stats.received,
            acked = stats.acked,
            failed = stats.failed,
            transport_errors = stats.transport_errors,
            "Push driver stopped"
        );
        Ok(stats)
    }

    async fn handle(&self, message: InboundMessage, stats: &mut PushStats) {
        stats.received += 1;
        let notification = &message.notification;
        debug!(
            hash = %notification.hash,
            timestamp = notification.timestamp,
            exception = notification.is_exception,
            "Received notification"
        );

        let acked = if notification.is_exception {
            self.refresh(&message).await
        } else {
            match self.pipeline.run_cycle().await {
                Ok(_) => {
                    NotificationMetrics::record("processed");
                    true
                }
                Err(err) => {
                    NotificationMetrics::record("failed");
                    error!(error = %err, hash = %notification.hash, "Cycle failed, leaving notification pending");
                    false
                }
            }
        };

        if !acked {
            stats.failed += 1;
            return;
        }
        match message.ack().await {
            Ok(()) => stats.acked += 1,
            Err(err) => {
                stats.failed += 1;
                warn!(error = %err, hash = %notification.hash, "Failed to acknowledge notification");
            }
        }
    }

    /// Out-of-band refresh of one contract. A notification that can never
    /// succeed (bad address, bad data) is acked and dropped; an
    /// infrastructure failure leaves it pending.
    async fn refresh(&self, message: &InboundMessage) -> bool {
        let notification = &message.notification;
        let refreshed = match Address::parse(&notification.contract_address) {
            Ok(address) => self.pipeline.refresh_contract(&address).await,
            Err(err) => Err(err),
        };

        match refreshed {
            Ok(report) => {
                NotificationMetrics::record("exception");
                info!(
                    contract = %notification.contract_address,
                    handled = report.handled,
                    "Refreshed contract"
                );
                true
            }
            Err(err) if err.is_data_error() => {
                NotificationMetrics::record("rejected");
                warn!(
                    contract = %notification.contract_address,
                    error = %err,
                    "Dropping exception notification"
                );
                true
            }
            Err(err) => {
                NotificationMetrics::record("failed");
                error!(
                    contract = %notification.contract_address,
                    error = %err,
                    "Refresh failed, leaving notification pending"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchErrorPolicy;
    use crate::events::Notification;
    use crate::jobs::subscription::Acker;
    use crate::processor::Dispatcher;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAcker(Arc<AtomicUsize>);

    #[async_trait]
    impl Acker for CountingAcker {
        async fn ack(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn notification(exception: bool, contract: &str) -> Notification {
        Notification {
            hash: "h".into(),
            timestamp: 1,
            contract_address: contract.into(),
            is_exception: exception,
        }
    }

    #[tokio::test]
    async fn test_acks_and_stops_when_channel_closes() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(Dispatcher::new(BatchErrorPolicy::Abort, 10));
        let driver = PushDriver::new(Arc::new(EventPipeline::from_store(store, dispatcher)));
        let acks = Arc::new(AtomicUsize::new(0));

        let (tx, rx) = mpsc::channel(4);
        let (_err_tx, err_rx) = mpsc::channel(4);
        let (_stop_tx, stop_rx) = watch::channel(false);

        tx.send(InboundMessage::new(notification(false, ""), CountingAcker(acks.clone())))
            .await
            .unwrap();
        tx.send(InboundMessage::new(notification(true, "not-an-address"), CountingAcker(acks.clone())))
            .await
            .unwrap();
        drop(tx);

        let stats = driver.run(rx, err_rx, stop_rx).await.unwrap();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.acked, 2);
        assert_eq!(acks.load(Ordering::SeqCst), 2);
    }
}
