//! Storage ports.
//!
//! One narrow trait per aggregate, plus the event-log and watermark ports.
//! Handlers depend only on the ports they use; a single store type
//! ([`memory::InMemoryStore`], [`postgres::PgStore`]) implements all of them
//! and is handed out as `Arc<dyn Port>` handles.
//!
//! Conventions shared by every implementation:
//! - `get_*` returns `Ok(None)` for a missing record.
//! - `create_*` fails with `DuplicateRecord` when the identity already exists.
//! - `update_*` fails with `RecordNotFound` when it does not, except for
//!   proposals and parameters whose update is an upsert.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::events::Event;
use crate::model::{
    Address, Appeal, Challenge, GovernmentParameter, GovernmentParameterProposal, Listing,
    MultiSig, Parameter, ParameterProposal, Poll, ProposalId, TokenTransfer, UserChallengeData,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn get_listing(&self, address: &Address) -> Result<Option<Listing>>;
    async fn create_listing(&self, listing: &Listing) -> Result<()>;
    async fn update_listing(&self, listing: &Listing) -> Result<()>;
    async fn listings(&self, whitelisted_only: bool) -> Result<Vec<Listing>>;
}

#[async_trait]
pub trait ChallengeStore: Send + Sync {
    async fn get_challenge(&self, challenge_id: u64) -> Result<Option<Challenge>>;
    async fn create_challenge(&self, challenge: &Challenge) -> Result<()>;
    async fn update_challenge(&self, challenge: &Challenge) -> Result<()>;
    async fn challenges_for_listing(&self, address: &Address) -> Result<Vec<Challenge>>;
}

#[async_trait]
pub trait PollStore: Send + Sync {
    async fn get_poll(&self, poll_id: u64) -> Result<Option<Poll>>;
    async fn create_poll(&self, poll: &Poll) -> Result<()>;
    async fn update_poll(&self, poll: &Poll) -> Result<()>;
}

#[async_trait]
pub trait AppealStore: Send + Sync {
    async fn get_appeal(&self, original_challenge_id: u64) -> Result<Option<Appeal>>;
    async fn create_appeal(&self, appeal: &Appeal) -> Result<()>;
    async fn update_appeal(&self, appeal: &Appeal) -> Result<()>;
}

#[async_trait]
pub trait UserChallengeDataStore: Send + Sync {
    async fn get_user_challenge_data(
        &self,
        poll_id: u64,
        user: &Address,
    ) -> Result<Option<UserChallengeData>>;
    async fn create_user_challenge_data(&self, data: &UserChallengeData) -> Result<()>;
    async fn update_user_challenge_data(&self, data: &UserChallengeData) -> Result<()>;
    async fn user_challenge_data_for_poll(&self, poll_id: u64) -> Result<Vec<UserChallengeData>>;
}

#[async_trait]
pub trait ParameterProposalStore: Send + Sync {
    async fn get_parameter_proposal(&self, prop_id: &ProposalId) -> Result<Option<ParameterProposal>>;
    async fn create_parameter_proposal(&self, proposal: &ParameterProposal) -> Result<()>;
    /// Upsert.
    async fn update_parameter_proposal(&self, proposal: &ParameterProposal) -> Result<()>;
}

#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameter(&self, name: &str) -> Result<Option<Parameter>>;
    /// Upsert.
    async fn update_parameter(&self, parameter: &Parameter) -> Result<()>;
    async fn parameters(&self) -> Result<Vec<Parameter>>;
}

#[async_trait]
pub trait GovernmentParameterProposalStore: Send + Sync {
    async fn get_government_parameter_proposal(
        &self,
        prop_id: &ProposalId,
    ) -> Result<Option<GovernmentParameterProposal>>;
    async fn create_government_parameter_proposal(
        &self,
        proposal: &GovernmentParameterProposal,
    ) -> Result<()>;
    /// Upsert.
    async fn update_government_parameter_proposal(
        &self,
        proposal: &GovernmentParameterProposal,
    ) -> Result<()>;
}

#[async_trait]
pub trait GovernmentParameterStore: Send + Sync {
    async fn get_government_parameter(&self, name: &str) -> Result<Option<GovernmentParameter>>;
    /// Upsert.
    async fn update_government_parameter(&self, parameter: &GovernmentParameter) -> Result<()>;
}

#[async_trait]
pub trait TokenTransferStore: Send + Sync {
    /// Insert unless a transfer with the same `(tx_hash, log_index)` exists.
    /// Returns whether a row was inserted.
    async fn create_token_transfer(&self, transfer: &TokenTransfer) -> Result<bool>;
    async fn token_transfers_for(&self, address: &Address) -> Result<Vec<TokenTransfer>>;
}

#[async_trait]
pub trait MultiSigStore: Send + Sync {
    async fn get_multisig(&self, address: &Address) -> Result<Option<MultiSig>>;
    async fn create_multisig(&self, multisig: &MultiSig) -> Result<()>;
    async fn update_multisig(&self, multisig: &MultiSig) -> Result<()>;
}

/// The crawler's event log.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events with `timestamp >= from_timestamp` whose hash is not in
    /// `exclude_hashes`, optionally restricted to one contract, in
    /// `(timestamp, block_number, tx_index, log_index)` order. Repeated calls
    /// with the same arguments return the same sequence.
    async fn retrieve_events(
        &self,
        from_timestamp: i64,
        exclude_hashes: &HashSet<String>,
        contract_address: Option<&Address>,
    ) -> Result<Vec<Event>>;
}

/// Durable processing cursor.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn last_timestamp(&self) -> Result<i64>;
    /// Only meaningful together with [`WatermarkStore::last_timestamp`].
    async fn hashes_at_last_timestamp(&self) -> Result<HashSet<String>>;
    async fn advance_to(&self, timestamp: i64, hashes: &HashSet<String>) -> Result<()>;
}

/// Every aggregate port at once.
pub trait AggregateStore:
    ListingStore
    + ChallengeStore
    + PollStore
    + AppealStore
    + UserChallengeDataStore
    + ParameterProposalStore
    + ParameterStore
    + GovernmentParameterProposalStore
    + GovernmentParameterStore
    + TokenTransferStore
    + MultiSigStore
{
}

impl<T> AggregateStore for T where
    T: ListingStore
        + ChallengeStore
        + PollStore
        + AppealStore
        + UserChallengeDataStore
        + ParameterProposalStore
        + ParameterStore
        + GovernmentParameterProposalStore
        + GovernmentParameterStore
        + TokenTransferStore
        + MultiSigStore
{
}
