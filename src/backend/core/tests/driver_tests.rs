//! Polling and push drivers over the in-memory store.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use common::*;
use registry_core::error::ProcessorError;
use registry_core::events::Notification;
use registry_core::jobs::{Acker, InboundMessage, PollingDriver, PushDriver};
use registry_core::store::{ListingStore, WatermarkStore};
use registry_core::Result;

#[derive(Clone, Default)]
struct Acks(Arc<AtomicUsize>);

impl Acks {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Acker for Acks {
    async fn ack(&self) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn notification(timestamp: i64) -> Notification {
    Notification {
        hash: format!("n{}", timestamp),
        timestamp,
        contract_address: String::new(),
        is_exception: false,
    }
}

fn exception(contract: &str) -> Notification {
    Notification {
        hash: "refresh".into(),
        timestamp: 0,
        contract_address: contract.into(),
        is_exception: true,
    }
}

// ============================================================================
// Watermark
// ============================================================================

#[tokio::test]
async fn test_watermark_is_monotonic_and_tracks_its_timestamp() {
    let h = Harness::new(StubChain::default());
    let batches = vec![
        vec![application(&addr(1), 100, 0), application(&addr(2), 100, 1)],
        vec![application(&addr(3), 100, 2)],
        vec![application(&addr(4), 200, 0)],
        // Arrives late with an older timestamp; it is never fetched.
        vec![application(&addr(5), 150, 0)],
        vec![application(&addr(6), 200, 1), application(&addr(7), 300, 0)],
    ];

    let mut seen = Vec::new();
    let mut previous = 0;
    for batch in batches {
        seen.extend(batch.iter().cloned());
        h.store.push_events(batch);
        h.pipeline.run_cycle().await.unwrap();

        let last = h.store.last_timestamp().await.unwrap();
        assert!(last >= previous);
        previous = last;

        let expected: HashSet<String> = seen
            .iter()
            .filter(|e| e.timestamp == last)
            .map(|e| e.hash())
            .collect();
        assert_eq!(h.store.hashes_at_last_timestamp().await.unwrap(), expected);
    }

    assert_eq!(previous, 300);
    assert!(h.store.get_listing(&addr(5)).await.unwrap().is_none());
    assert!(h.store.get_listing(&addr(7)).await.unwrap().is_some());
}

// ============================================================================
// Polling
// ============================================================================

#[tokio::test]
async fn test_run_once_processes_backlog() {
    let h = Harness::new(StubChain::default());
    h.store.push_events(vec![
        application(&addr(1), 100, 0),
        listing_event("ApplicationWhitelisted", &addr(1), 800, 0),
    ]);

    let driver = PollingDriver::new(h.pipeline.clone(), Duration::from_secs(300));
    let outcome = driver.run_once().await.unwrap();
    assert_eq!(outcome.fetched, 2);
    assert_eq!(outcome.last_timestamp, 800);

    let idle = driver.run_once().await.unwrap();
    assert_eq!(idle.fetched, 0);
    assert!(h.store.get_listing(&addr(1)).await.unwrap().unwrap().whitelisted);
}

// ============================================================================
// Push
// ============================================================================

#[tokio::test]
async fn test_push_acks_only_after_successful_cycle() {
    let h = Harness::new(StubChain::default());
    let driver = PushDriver::new(h.pipeline.clone());
    let (tx, rx) = mpsc::channel(8);
    let (err_tx, err_rx) = mpsc::channel::<ProcessorError>(8);
    let (_stop_tx, stop_rx) = watch::channel(false);

    // The first notification meets a poisoned log and stays pending.
    h.store.push_events(vec![name_changed(&addr(9), "orphan", 50)]);
    let failing = Acks::default();
    tx.send(InboundMessage::new(notification(50), failing.clone())).await.unwrap();

    err_tx.send(ProcessorError::subscription("connection reset")).await.unwrap();
    drop(err_tx);
    drop(tx);

    let stats = driver.run(rx, err_rx, stop_rx).await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.acked, 0);
    assert_eq!(failing.count(), 0);
    assert_eq!(h.store.last_timestamp().await.unwrap(), 0);
}

#[tokio::test]
async fn test_push_processes_from_the_log() {
    let h = Harness::new(StubChain::default());
    let driver = PushDriver::new(h.pipeline.clone());
    let (tx, rx) = mpsc::channel(8);
    let (_err_tx, err_rx) = mpsc::channel::<ProcessorError>(8);
    let (_stop_tx, stop_rx) = watch::channel(false);

    h.store.push_events(vec![application(&addr(1), 100, 0), application(&addr(2), 100, 1)]);
    let acks = Acks::default();
    // Two notifications for one stored batch: the second cycle finds nothing.
    tx.send(InboundMessage::new(notification(100), acks.clone())).await.unwrap();
    tx.send(InboundMessage::new(notification(100), acks.clone())).await.unwrap();
    drop(tx);

    let stats = driver.run(rx, err_rx, stop_rx).await.unwrap();
    assert_eq!(stats.acked, 2);
    assert_eq!(acks.count(), 2);
    assert_eq!(h.store.last_timestamp().await.unwrap(), 100);
    assert_eq!(h.store.listings(false).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_exception_refresh_bypasses_watermark() {
    let h = Harness::new(StubChain::default());
    let newsroom = addr(1);
    h.store.push_events(vec![application(&newsroom, 100, 0)]);
    h.pipeline.run_cycle().await.unwrap();

    // Stored behind the watermark, so a regular cycle would never see it.
    h.store.push_events(vec![name_changed(&newsroom, "The Ledger", 90)]);

    let driver = PushDriver::new(h.pipeline.clone());
    let (tx, rx) = mpsc::channel(8);
    let (_err_tx, err_rx) = mpsc::channel::<ProcessorError>(8);
    let (_stop_tx, stop_rx) = watch::channel(false);

    let acks = Acks::default();
    tx.send(InboundMessage::new(exception(newsroom.as_str()), acks.clone())).await.unwrap();
    tx.send(InboundMessage::new(exception("0xnot-hex"), acks.clone())).await.unwrap();
    drop(tx);

    let stats = driver.run(rx, err_rx, stop_rx).await.unwrap();
    assert_eq!(stats.acked, 2);
    assert_eq!(acks.count(), 2);
    assert_eq!(h.store.last_timestamp().await.unwrap(), 100);
    assert_eq!(h.store.get_listing(&newsroom).await.unwrap().unwrap().name, "The Ledger");
}

#[tokio::test]
async fn test_push_stops_on_shutdown() {
    let h = Harness::new(StubChain::default());
    let driver = PushDriver::new(h.pipeline.clone());
    let (tx, rx) = mpsc::channel::<InboundMessage>(8);
    let (_err_tx, err_rx) = mpsc::channel::<ProcessorError>(8);
    let (stop_tx, stop_rx) = watch::channel(false);

    let run = tokio::spawn(async move { driver.run(rx, err_rx, stop_rx).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    stop_tx.send(true).unwrap();

    let stats = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("driver stops")
        .unwrap()
        .unwrap();
    assert_eq!(stats.received, 0);
    // The sender was never dropped; the driver closed the channel itself.
    assert!(tx.is_closed());
}
