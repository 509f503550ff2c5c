//! Read-only access to on-chain state, used to reconcile aggregates the
//! store does not have.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    Address, Amount, GovernmentParameterProposal, ParameterProposal, ProposalId,
};

pub mod rpc;

pub use rpc::RpcChainReader;

/// `Parameterizer.proposals(bytes32)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterizerProposalRecord {
    pub app_expiry: i64,
    pub challenge_id: u64,
    pub deposit: Amount,
    pub name: String,
    pub owner: Address,
    pub process_by: i64,
    pub value: Amount,
}

/// `Government.proposals(bytes32)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernmentProposalRecord {
    pub poll_id: u64,
    pub name: String,
    pub process_by: i64,
    pub value: Amount,
}

/// Authoritative proposal state read from a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalRecord {
    Parameterizer(ParameterizerProposalRecord),
    Government(GovernmentProposalRecord),
}

impl ProposalRecord {
    /// Build an unresolved parameter proposal from chain state.
    pub fn into_parameter_proposal(
        self,
        contract_address: &Address,
        prop_id: &ProposalId,
        timestamp: i64,
    ) -> Option<ParameterProposal> {
        match self {
            Self::Parameterizer(record) => Some(ParameterProposal {
                prop_id: prop_id.clone(),
                contract_address: contract_address.clone(),
                name: record.name,
                value: record.value,
                deposit: record.deposit,
                app_expiry: record.app_expiry,
                challenge_id: record.challenge_id,
                proposer: record.owner,
                accepted: false,
                expired: false,
                last_updated: timestamp,
            }),
            Self::Government(_) => None,
        }
    }

    /// Build an unresolved government proposal from chain state.
    pub fn into_government_proposal(
        self,
        prop_id: &ProposalId,
        timestamp: i64,
    ) -> Option<GovernmentParameterProposal> {
        match self {
            Self::Government(record) => Some(GovernmentParameterProposal {
                prop_id: prop_id.clone(),
                name: record.name,
                value: record.value,
                poll_id: record.poll_id,
                process_by: record.process_by,
                accepted: false,
                expired: false,
                last_updated: timestamp,
            }),
            Self::Parameterizer(_) => None,
        }
    }
}

/// Chain state reader.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Read a proposal from `contract_address`. `Ok(None)` when the contract
    /// has no record of it.
    async fn read_on_chain_proposal(
        &self,
        contract_address: &Address,
        prop_id: &ProposalId,
    ) -> Result<Option<ProposalRecord>>;
}
