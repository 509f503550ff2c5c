//! Benchmarks for event dispatch and full processing cycles.
use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use registry_core::chain::{ChainReader, ProposalRecord};
use registry_core::config::ProcessorConfig;
use registry_core::events::decode::CIVIL_TCR;
use registry_core::events::Event;
use registry_core::jobs::EventPipeline;
use registry_core::model::{Address, ProposalId};
use registry_core::processor::Dispatcher;
use registry_core::store::InMemoryStore;
use registry_core::Result;

struct NoChain;

#[async_trait]
impl ChainReader for NoChain {
    async fn read_on_chain_proposal(&self, _: &Address, _: &ProposalId) -> Result<Option<ProposalRecord>> {
        Ok(None)
    }
}

fn addr(n: u64) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

fn lifecycle(n: usize) -> Vec<Event> {
    let registry = addr(0x900);
    let mut events = Vec::with_capacity(n * 2);
    for i in 0..n as u64 {
        let listing = addr(0x1000 + i);
        let ts = 100 + i as i64;
        events.push(
            Event::new(
                CIVIL_TCR,
                "Application",
                registry.clone(),
                json!({
                    "ListingAddress": listing.as_str(),
                    "Deposit": "1000",
                    "AppEndDate": ts + 600,
                    "Data": "",
                    "Applicant": addr(7).as_str(),
                }),
                ts,
            )
            .at(ts as u64, 0, 0)
            .with_tx(format!("0x{:064x}", ts), format!("0x{:064x}", ts)),
        );
        events.push(
            Event::new(
                CIVIL_TCR,
                "ApplicationWhitelisted",
                registry.clone(),
                json!({ "ListingAddress": listing.as_str() }),
                ts + 1_000,
            )
            .at(ts as u64 + 1_000, 0, 0)
            .with_tx(format!("0x{:064x}", ts + 1_000), format!("0x{:064x}", ts + 1_000)),
        );
    }
    events
}

fn dispatcher(store: Arc<InMemoryStore>) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::with_default_handlers(
        store,
        Arc::new(NoChain),
        &ProcessorConfig::default(),
    ))
}

fn bench_dispatch_batch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch_batch");
    for listings in [10, 100, 1_000] {
        let events = lifecycle(listings);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(listings), &events, |b, events| {
            b.to_async(&rt).iter(|| async {
                let dispatcher = dispatcher(Arc::new(InMemoryStore::new()));
                black_box(dispatcher.process(events).await.unwrap())
            });
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let events = lifecycle(500);
    let store = Arc::new(InMemoryStore::new());
    let dispatcher = dispatcher(store);
    rt.block_on(dispatcher.process(&events)).unwrap();

    c.bench_function("replay_applied_history", |b| {
        b.to_async(&rt).iter(|| async { black_box(dispatcher.process(&events).await.unwrap()) });
    });
}

fn bench_pipeline_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("pipeline_cycle");
    for listings in [100, 1_000] {
        let events = lifecycle(listings);
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(listings), &events, |b, events| {
            b.to_async(&rt).iter(|| async {
                let store = Arc::new(InMemoryStore::new());
                store.push_events(events.iter().cloned());
                let pipeline = EventPipeline::from_store(store.clone(), dispatcher(store));
                black_box(pipeline.run_cycle().await.unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dispatch_batch, bench_replay, bench_pipeline_cycle);
criterion_main!(benches);
