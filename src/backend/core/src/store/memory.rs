//! In-memory implementation of every storage port.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    AppealStore, ChallengeStore, EventSource, GovernmentParameterProposalStore,
    GovernmentParameterStore, ListingStore, MultiSigStore, ParameterProposalStore, ParameterStore,
    PollStore, TokenTransferStore, UserChallengeDataStore, WatermarkStore,
};
use crate::error::{ErrorCode, ProcessorError, Result};
use crate::events::Event;
use crate::model::{
    Address, Appeal, Challenge, GovernmentParameter, GovernmentParameterProposal, Listing,
    MultiSig, Parameter, ParameterProposal, Poll, ProposalId, TokenTransfer, UserChallengeData,
};

#[derive(Default)]
struct Tables {
    listings: HashMap<Address, Listing>,
    challenges: HashMap<u64, Challenge>,
    polls: HashMap<u64, Poll>,
    appeals: HashMap<u64, Appeal>,
    user_challenge_data: BTreeMap<(u64, Address), UserChallengeData>,
    parameter_proposals: HashMap<ProposalId, ParameterProposal>,
    parameters: BTreeMap<String, Parameter>,
    government_proposals: HashMap<ProposalId, GovernmentParameterProposal>,
    government_parameters: HashMap<String, GovernmentParameter>,
    token_transfers: BTreeMap<(String, u32), TokenTransfer>,
    multisigs: HashMap<Address, MultiSig>,
}

#[derive(Default)]
struct Cursor {
    last_timestamp: i64,
    hashes: HashSet<String>,
}

/// Process-local store used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    events: RwLock<Vec<Event>>,
    cursor: RwLock<Cursor>,
}

fn duplicate(entity: &str, id: impl std::fmt::Display) -> ProcessorError {
    ProcessorError::new(
        ErrorCode::DuplicateRecord,
        format!("{} already exists: {}", entity, id),
    )
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append events to the event log.
    pub fn push_events(&self, events: impl IntoIterator<Item = Event>) {
        let mut log = self.events.write();
        log.extend(events);
        log.sort_by_key(|e| e.ordering_key());
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }
}

#[async_trait]
impl ListingStore for InMemoryStore {
    async fn get_listing(&self, address: &Address) -> Result<Option<Listing>> {
        Ok(self.tables.read().listings.get(address).cloned())
    }

    async fn create_listing(&self, listing: &Listing) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.listings.contains_key(&listing.contract_address) {
            return Err(duplicate("listing", &listing.contract_address));
        }
        tables.listings.insert(listing.contract_address.clone(), listing.clone());
        Ok(())
    }

    async fn update_listing(&self, listing: &Listing) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.listings.get_mut(&listing.contract_address) {
            Some(existing) => {
                *existing = listing.clone();
                Ok(())
            }
            None => Err(ProcessorError::not_found("listing", listing.contract_address.as_str())),
        }
    }

    async fn listings(&self, whitelisted_only: bool) -> Result<Vec<Listing>> {
        let tables = self.tables.read();
        let mut listings: Vec<Listing> = tables
            .listings
            .values()
            .filter(|l| !whitelisted_only || l.whitelisted)
            .cloned()
            .collect();
        listings.sort_by(|a, b| a.contract_address.cmp(&b.contract_address));
        Ok(listings)
    }
}

#[async_trait]
impl ChallengeStore for InMemoryStore {
    async fn get_challenge(&self, challenge_id: u64) -> Result<Option<Challenge>> {
        Ok(self.tables.read().challenges.get(&challenge_id).cloned())
    }

    async fn create_challenge(&self, challenge: &Challenge) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.challenges.contains_key(&challenge.challenge_id) {
            return Err(duplicate("challenge", challenge.challenge_id));
        }
        tables.challenges.insert(challenge.challenge_id, challenge.clone());
        Ok(())
    }

    async fn update_challenge(&self, challenge: &Challenge) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.challenges.get_mut(&challenge.challenge_id) {
            Some(existing) => {
                *existing = challenge.clone();
                Ok(())
            }
            None => Err(ProcessorError::not_found("challenge", challenge.challenge_id.to_string())),
        }
    }

    async fn challenges_for_listing(&self, address: &Address) -> Result<Vec<Challenge>> {
        let tables = self.tables.read();
        let mut challenges: Vec<Challenge> = tables
            .challenges
            .values()
            .filter(|c| &c.listing_address == address)
            .cloned()
            .collect();
        challenges.sort_by_key(|c| c.challenge_id);
        Ok(challenges)
    }
}

#[async_trait]
impl PollStore for InMemoryStore {
    async fn get_poll(&self, poll_id: u64) -> Result<Option<Poll>> {
        Ok(self.tables.read().polls.get(&poll_id).cloned())
    }

    async fn create_poll(&self, poll: &Poll) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.polls.contains_key(&poll.poll_id) {
            return Err(duplicate("poll", poll.poll_id));
        }
        tables.polls.insert(poll.poll_id, poll.clone());
        Ok(())
    }

    async fn update_poll(&self, poll: &Poll) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.polls.get_mut(&poll.poll_id) {
            Some(existing) => {
                *existing = poll.clone();
                Ok(())
            }
            None => Err(ProcessorError::not_found("poll", poll.poll_id.to_string())),
        }
    }
}

#[async_trait]
impl AppealStore for InMemoryStore {
    async fn get_appeal(&self, original_challenge_id: u64) -> Result<Option<Appeal>> {
        Ok(self.tables.read().appeals.get(&original_challenge_id).cloned())
    }

    async fn create_appeal(&self, appeal: &Appeal) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.appeals.contains_key(&appeal.original_challenge_id) {
            return Err(duplicate("appeal", appeal.original_challenge_id));
        }
        tables.appeals.insert(appeal.original_challenge_id, appeal.clone());
        Ok(())
    }

    async fn update_appeal(&self, appeal: &Appeal) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.appeals.get_mut(&appeal.original_challenge_id) {
            Some(existing) => {
                *existing = appeal.clone();
                Ok(())
            }
            None => Err(ProcessorError::not_found(
                "appeal",
                appeal.original_challenge_id.to_string(),
            )),
        }
    }
}

#[async_trait]
impl UserChallengeDataStore for InMemoryStore {
    async fn get_user_challenge_data(
        &self,
        poll_id: u64,
        user: &Address,
    ) -> Result<Option<UserChallengeData>> {
        Ok(self
            .tables
            .read()
            .user_challenge_data
            .get(&(poll_id, user.clone()))
            .cloned())
    }

    async fn create_user_challenge_data(&self, data: &UserChallengeData) -> Result<()> {
        let mut tables = self.tables.write();
        let key = (data.poll_id, data.user_address.clone());
        if tables.user_challenge_data.contains_key(&key) {
            return Err(duplicate(
                "user challenge data",
                format!("{}/{}", data.poll_id, data.user_address),
            ));
        }
        tables.user_challenge_data.insert(key, data.clone());
        Ok(())
    }

    async fn update_user_challenge_data(&self, data: &UserChallengeData) -> Result<()> {
        let mut tables = self.tables.write();
        match tables
            .user_challenge_data
            .get_mut(&(data.poll_id, data.user_address.clone()))
        {
            Some(existing) => {
                *existing = data.clone();
                Ok(())
            }
            None => Err(ProcessorError::not_found(
                "user challenge data",
                format!("{}/{}", data.poll_id, data.user_address),
            )),
        }
    }

    async fn user_challenge_data_for_poll(&self, poll_id: u64) -> Result<Vec<UserChallengeData>> {
        Ok(self
            .tables
            .read()
            .user_challenge_data
            .range((poll_id, Address::zero())..)
            .take_while(|((id, _), _)| *id == poll_id)
            .map(|(_, data)| data.clone())
            .collect())
    }
}

#[async_trait]
impl ParameterProposalStore for InMemoryStore {
    async fn get_parameter_proposal(&self, prop_id: &ProposalId) -> Result<Option<ParameterProposal>> {
        Ok(self.tables.read().parameter_proposals.get(prop_id).cloned())
    }

    async fn create_parameter_proposal(&self, proposal: &ParameterProposal) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.parameter_proposals.contains_key(&proposal.prop_id) {
            return Err(duplicate("parameter proposal", &proposal.prop_id));
        }
        tables
            .parameter_proposals
            .insert(proposal.prop_id.clone(), proposal.clone());
        Ok(())
    }

    async fn update_parameter_proposal(&self, proposal: &ParameterProposal) -> Result<()> {
        self.tables
            .write()
            .parameter_proposals
            .insert(proposal.prop_id.clone(), proposal.clone());
        Ok(())
    }
}

#[async_trait]
impl ParameterStore for InMemoryStore {
    async fn get_parameter(&self, name: &str) -> Result<Option<Parameter>> {
        Ok(self.tables.read().parameters.get(name).cloned())
    }

    async fn update_parameter(&self, parameter: &Parameter) -> Result<()> {
        self.tables
            .write()
            .parameters
            .insert(parameter.name.clone(), parameter.clone());
        Ok(())
    }

    async fn parameters(&self) -> Result<Vec<Parameter>> {
        Ok(self.tables.read().parameters.values().cloned().collect())
    }
}

#[async_trait]
impl GovernmentParameterProposalStore for InMemoryStore {
    async fn get_government_parameter_proposal(
        &self,
        prop_id: &ProposalId,
    ) -> Result<Option<GovernmentParameterProposal>> {
        Ok(self.tables.read().government_proposals.get(prop_id).cloned())
    }

    async fn create_government_parameter_proposal(
        &self,
        proposal: &GovernmentParameterProposal,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.government_proposals.contains_key(&proposal.prop_id) {
            return Err(duplicate("government parameter proposal", &proposal.prop_id));
        }
        tables
            .government_proposals
            .insert(proposal.prop_id.clone(), proposal.clone());
        Ok(())
    }

    async fn update_government_parameter_proposal(
        &self,
        proposal: &GovernmentParameterProposal,
    ) -> Result<()> {
        self.tables
            .write()
            .government_proposals
            .insert(proposal.prop_id.clone(), proposal.clone());
        Ok(())
    }
}

#[async_trait]
impl GovernmentParameterStore for InMemoryStore {
    async fn get_government_parameter(&self, name: &str) -> Result<Option<GovernmentParameter>> {
        Ok(self.tables.read().government_parameters.get(name).cloned())
    }

    async fn update_government_parameter(&self, parameter: &GovernmentParameter) -> Result<()> {
        self.tables
            .write()
            .government_parameters
            .insert(parameter.name.clone(), parameter.clone());
        Ok(())
    }
}

#[async_trait]
impl TokenTransferStore for InMemoryStore {
    async fn create_token_transfer(&self, transfer: &TokenTransfer) -> Result<bool> {
        let mut tables = self.tables.write();
        let key = (transfer.tx_hash.clone(), transfer.log_index);
        if tables.token_transfers.contains_key(&key) {
            return Ok(false);
        }
        tables.token_transfers.insert(key, transfer.clone());
        Ok(true)
    }

    async fn token_transfers_for(&self, address: &Address) -> Result<Vec<TokenTransfer>> {
        let tables = self.tables.read();
        let mut transfers: Vec<TokenTransfer> = tables
            .token_transfers
            .values()
            .filter(|t| &t.from == address || &t.to == address)
            .cloned()
            .collect();
        transfers.sort_by_key(|t| (t.block_number, t.log_index));
        Ok(transfers)
    }
}

#[async_trait]
impl MultiSigStore for InMemoryStore {
    async fn get_multisig(&self, address: &Address) -> Result<Option<MultiSig>> {
        Ok(self.tables.read().multisigs.get(address).cloned())
    }

    async fn create_multisig(&self, multisig: &MultiSig) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.multisigs.contains_key(&multisig.contract_address) {
            return Err(duplicate("multisig", &multisig.contract_address));
        }
        tables
            .multisigs
            .insert(multisig.contract_address.clone(), multisig.clone());
        Ok(())
    }

    async fn update_multisig(&self, multisig: &MultiSig) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.multisigs.get_mut(&multisig.contract_address) {
            Some(existing) => {
                *existing = multisig.clone();
                Ok(())
            }
            None => Err(ProcessorError::not_found("multisig", multisig.contract_address.as_str())),
        }
    }
}

#[async_trait]
impl EventSource for InMemoryStore {
    async fn retrieve_events(
        &self,
        from_timestamp: i64,
        exclude_hashes: &HashSet<String>,
        contract_address: Option<&Address>,
    ) -> Result<Vec<Event>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.timestamp >= from_timestamp)
            .filter(|e| contract_address.map_or(true, |a| &e.contract_address == a))
            .filter(|e| !exclude_hashes.contains(&e.hash()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl WatermarkStore for InMemoryStore {
    async fn last_timestamp(&self) -> Result<i64> {
        Ok(self.cursor.read().last_timestamp)
    }

    async fn hashes_at_last_timestamp(&self) -> Result<HashSet<String>> {
        Ok(self.cursor.read().hashes.clone())
    }

    async fn advance_to(&self, timestamp: i64, hashes: &HashSet<String>) -> Result<()> {
        let mut cursor = self.cursor.write();
        cursor.last_timestamp = timestamp;
        cursor.hashes = hashes.clone();
        Ok(())
    }
}
