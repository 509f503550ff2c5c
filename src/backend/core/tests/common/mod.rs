//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use registry_core::chain::{ChainReader, ParameterizerProposalRecord, ProposalRecord};
use registry_core::config::{BatchErrorPolicy, ProcessorConfig};
use registry_core::events::decode::{CIVIL_TCR, NEWSROOM, PARAMETERIZER};
use registry_core::events::Event;
use registry_core::jobs::EventPipeline;
use registry_core::model::{Address, ProposalId};
use registry_core::processor::Dispatcher;
use registry_core::store::InMemoryStore;
use registry_core::Result;

pub const TCR: u64 = 0x900;
pub const PARAM: u64 = 0x800;

pub fn addr(n: u64) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

pub fn prop_id(n: u8) -> ProposalId {
    ProposalId::parse(&format!("0x{:02x}", n)).unwrap()
}

/// An event whose transaction coordinates derive from `(ts, log_index)`.
pub fn event(contract: &str, event_type: &str, address: Address, payload: Value, ts: i64, log_index: u32) -> Event {
    Event::new(contract, event_type, address, payload, ts)
        .at(ts as u64, 0, log_index)
        .with_tx(format!("0x{:064x}", ts), format!("0x{:064x}", ts + 1))
}

pub fn application(listing: &Address, ts: i64, log_index: u32) -> Event {
    event(
        CIVIL_TCR,
        "Application",
        addr(TCR),
        json!({
            "ListingAddress": listing.as_str(),
            "Deposit": "1000",
            "AppEndDate": ts + 600,
            "Data": "https://example.com/newsroom",
            "Applicant": addr(7).as_str(),
        }),
        ts,
        log_index,
    )
}

pub fn listing_event(event_type: &str, listing: &Address, ts: i64, log_index: u32) -> Event {
    event(
        CIVIL_TCR,
        event_type,
        addr(TCR),
        json!({ "ListingAddress": listing.as_str() }),
        ts,
        log_index,
    )
}

pub fn challenge(listing: &Address, id: u64, ts: i64) -> Event {
    event(
        CIVIL_TCR,
        "Challenge",
        addr(TCR),
        json!({
            "ListingAddress": listing.as_str(),
            "ChallengeID": id,
            "Data": "ipfs://statement",
            "CommitEndDate": ts + 100,
            "RevealEndDate": ts + 200,
            "Challenger": addr(3).as_str(),
        }),
        ts,
        0,
    )
}

pub fn challenge_resolution(event_type: &str, listing: &Address, id: u64, ts: i64) -> Event {
    event(
        CIVIL_TCR,
        event_type,
        addr(TCR),
        json!({
            "ListingAddress": listing.as_str(),
            "ChallengeID": id,
            "RewardPool": "250",
            "TotalTokens": "900",
        }),
        ts,
        0,
    )
}

pub fn name_changed(listing: &Address, name: &str, ts: i64) -> Event {
    event(NEWSROOM, "NameChanged", listing.clone(), json!({ "NewName": name }), ts, 0)
}

pub fn proposal_accepted(n: u8, ts: i64) -> Event {
    event(
        PARAMETERIZER,
        "ProposalAccepted",
        addr(PARAM),
        json!({ "PropID": prop_id(n).as_str() }),
        ts,
        0,
    )
}

pub fn proposal_challenge_resolution(event_type: &str, n: u8, challenge_id: u64, ts: i64) -> Event {
    event(
        PARAMETERIZER,
        event_type,
        addr(PARAM),
        json!({
            "PropID": prop_id(n).as_str(),
            "ChallengeID": challenge_id,
            "RewardPool": "10",
            "TotalTokens": "40",
        }),
        ts,
        0,
    )
}

/// Chain reader answering from a fixed map.
#[derive(Default)]
pub struct StubChain {
    records: Mutex<HashMap<ProposalId, ProposalRecord>>,
}

impl StubChain {
    pub fn with_parameter(self, prop_id: ProposalId, name: &str, value: u128) -> Self {
        self.records.lock().insert(
            prop_id,
            ProposalRecord::Parameterizer(ParameterizerProposalRecord {
                app_expiry: 1_000,
                challenge_id: 0,
                deposit: 100,
                name: name.to_string(),
                owner: addr(5),
                process_by: 2_000,
                value,
            }),
        );
        self
    }
}

#[async_trait]
impl ChainReader for StubChain {
    async fn read_on_chain_proposal(
        &self,
        _contract_address: &Address,
        prop_id: &ProposalId,
    ) -> Result<Option<ProposalRecord>> {
        Ok(self.records.lock().get(prop_id).cloned())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub pipeline: Arc<EventPipeline>,
}

impl Harness {
    pub fn new(chain: StubChain) -> Self {
        Self::with_policy(chain, BatchErrorPolicy::Abort)
    }

    pub fn with_policy(chain: StubChain, policy: BatchErrorPolicy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let config = ProcessorConfig {
            error_policy: policy,
            ..ProcessorConfig::default()
        };
        let dispatcher = Arc::new(Dispatcher::with_default_handlers(
            store.clone(),
            Arc::new(chain),
            &config,
        ));
        let pipeline = Arc::new(EventPipeline::from_store(store.clone(), dispatcher.clone()));
        Self {
            store,
            dispatcher,
            pipeline,
        }
    }
}
