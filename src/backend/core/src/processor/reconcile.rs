//! Recovery of proposals the store has never seen.
//!
//! A resolution event can reference a proposal whose creation event was
//! missed or predates this processor's history. Rather than fail, the
//! proposal is rebuilt from the contract's own storage. The rebuilt value is
//! returned, not created; the handler's subsequent upsert is the only write.

use std::sync::Arc;

use tracing::{info, warn};

use crate::chain::ChainReader;
use crate::error::{ProcessorError, Result};
use crate::model::{Address, Amount, GovernmentParameterProposal, ParameterProposal, ProposalId};
use crate::store::{GovernmentParameterProposalStore, ParameterProposalStore};
use crate::telemetry::ReconciliationMetrics;

/// Name and value carried by the resolution event itself, used when the
/// chain has no record either.
#[derive(Debug, Clone, Copy)]
pub struct ProposalHint<'a> {
    pub name: &'a str,
    pub value: Amount,
}

#[derive(Clone)]
pub struct Reconciler {
    chain: Arc<dyn ChainReader>,
}

impl Reconciler {
    pub fn new(chain: Arc<dyn ChainReader>) -> Self {
        Self { chain }
    }

    /// Load a parameterizer proposal, falling back to chain state and then
    /// to `hint`.
    pub async fn parameter_proposal(
        &self,
        store: &dyn ParameterProposalStore,
        contract_address: &Address,
        prop_id: &ProposalId,
        timestamp: i64,
        hint: Option<ProposalHint<'_>>,
    ) -> Result<ParameterProposal> {
        if let Some(proposal) = store.get_parameter_proposal(prop_id).await? {
            return Ok(proposal);
        }

        let record = self.chain.read_on_chain_proposal(contract_address, prop_id).await?;
        if let Some(proposal) =
            record.and_then(|r| r.into_parameter_proposal(contract_address, prop_id, timestamp))
        {
            ReconciliationMetrics::record("parameter_proposal");
            info!(prop_id = %prop_id, name = %proposal.name, "Reconciled proposal from chain");
            return Ok(proposal);
        }

        if let Some(hint) = hint {
            ReconciliationMetrics::record("parameter_proposal_hint");
            warn!(prop_id = %prop_id, name = hint.name, "Proposal unknown on chain, using event payload");
            return Ok(ParameterProposal {
                prop_id: prop_id.clone(),
                contract_address: contract_address.clone(),
                name: hint.name.to_string(),
                value: hint.value,
                deposit: 0,
                app_expiry: 0,
                challenge_id: 0,
                proposer: Address::zero(),
                accepted: false,
                expired: false,
                last_updated: timestamp,
            });
        }

        Err(ProcessorError::reconciliation_failed("ParameterProposal", prop_id.as_str()))
    }

    /// Load a government proposal, falling back to chain state.
    pub async fn government_proposal(
        &self,
        store: &dyn GovernmentParameterProposalStore,
        contract_address: &Address,
        prop_id: &ProposalId,
        timestamp: i64,
    ) -> Result<GovernmentParameterProposal> {
        if let Some(proposal) = store.get_government_parameter_proposal(prop_id).await? {
            return Ok(proposal);
        }

        let record = self.chain.read_on_chain_proposal(contract_address, prop_id).await?;
        match record.and_then(|r| r.into_government_proposal(prop_id, timestamp)) {
            Some(proposal) => {
                ReconciliationMetrics::record("government_proposal");
                info!(prop_id = %prop_id, name = %proposal.name, "Reconciled government proposal from chain");
                Ok(proposal)
            }
            None => Err(ProcessorError::reconciliation_failed(
                "GovernmentParameterProposal",
                prop_id.as_str(),
            )),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::{
        GovernmentProposalRecord, ParameterizerProposalRecord, ProposalRecord,
    };
    use crate::error::ErrorCode;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Chain reader backed by a map; counts reads.
    #[derive(Default)]
    pub(crate) struct StubChain {
        pub records: Mutex<HashMap<ProposalId, ProposalRecord>>,
        pub reads: Mutex<usize>,
    }

    impl StubChain {
        pub fn with(prop_id: ProposalId, record: ProposalRecord) -> Self {
            let stub = Self::default();
            stub.records.lock().insert(prop_id, record);
            stub
        }
    }

    #[async_trait]
    impl ChainReader for StubChain {
        async fn read_on_chain_proposal(
            &self,
            _contract_address: &Address,
            prop_id: &ProposalId,
        ) -> Result<Option<ProposalRecord>> {
            *self.reads.lock() += 1;
            Ok(self.records.lock().get(prop_id).cloned())
        }
    }

    pub(crate) fn parameterizer_record(name: &str, value: Amount) -> ProposalRecord {
        ProposalRecord::Parameterizer(ParameterizerProposalRecord {
            app_expiry: 1_000,
            challenge_id: 0,
            deposit: 50,
            name: name.to_string(),
            owner: Address::zero(),
            process_by: 2_000,
            value,
        })
    }

    fn prop(n: u8) -> ProposalId {
        ProposalId::parse(&format!("0x{:02x}", n)).unwrap()
    }

    #[tokio::test]
    async fn test_store_hit_skips_chain() {
        let store = InMemoryStore::new();
        let chain = Arc::new(StubChain::default());
        let reconciler = Reconciler::new(chain.clone());

        let local = ParameterProposal {
            prop_id: prop(1),
            contract_address: Address::zero(),
            name: "voteQuorum".into(),
            value: 60,
            deposit: 0,
            app_expiry: 0,
            challenge_id: 0,
            proposer: Address::zero(),
            accepted: false,
            expired: false,
            last_updated: 1,
        };
        store.create_parameter_proposal(&local).await.unwrap();

        let loaded = reconciler
            .parameter_proposal(&store, &Address::zero(), &prop(1), 5, None)
            .await
            .unwrap();
        assert_eq!(loaded, local);
        assert_eq!(*chain.reads.lock(), 0);
    }

    #[tokio::test]
    async fn test_chain_record_fills_a_miss() {
        let store = InMemoryStore::new();
        let chain = Arc::new(StubChain::with(prop(2), parameterizer_record("commitStageLen", 1800)));
        let reconciler = Reconciler::new(chain);

        let proposal = reconciler
            .parameter_proposal(&store, &Address::zero(), &prop(2), 5, None)
            .await
            .unwrap();
        assert_eq!(proposal.name, "commitStageLen");
        assert_eq!(proposal.value, 1800);
        assert_eq!(proposal.app_expiry, 1_000);
        // Nothing is written until the caller updates.
        assert!(store.get_parameter_proposal(&prop(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hint_used_when_chain_has_nothing() {
        let store = InMemoryStore::new();
        let reconciler = Reconciler::new(Arc::new(StubChain::default()));

        let proposal = reconciler
            .parameter_proposal(
                &store,
                &Address::zero(),
                &prop(3),
                5,
                Some(ProposalHint { name: "pStageLen", value: 7 }),
            )
            .await
            .unwrap();
        assert_eq!((proposal.name.as_str(), proposal.value), ("pStageLen", 7));

        let err = reconciler
            .parameter_proposal(&store, &Address::zero(), &prop(3), 5, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReconciliationFailed);
    }

    #[tokio::test]
    async fn test_government_layout_mismatch_fails() {
        let store = InMemoryStore::new();
        let chain = StubChain::with(prop(4), parameterizer_record("appealFee", 1));
        let reconciler = Reconciler::new(Arc::new(chain));

        let err = reconciler
            .government_proposal(&store, &Address::zero(), &prop(4), 5)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReconciliationFailed);

        let chain = StubChain::with(
            prop(5),
            ProposalRecord::Government(GovernmentProposalRecord {
                poll_id: 3,
                name: "appealFee".into(),
                process_by: 10,
                value: 9,
            }),
        );
        let reconciler = Reconciler::new(Arc::new(chain));
        let proposal = reconciler
            .government_proposal(&store, &Address::zero(), &prop(5), 5)
            .await
            .unwrap();
        assert_eq!(proposal.value, 9);
        assert_eq!(proposal.poll_id, 3);
    }
}
