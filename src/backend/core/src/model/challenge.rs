//! Challenge, Poll, Appeal and per-voter records.

use serde::{Deserialize, Serialize};

use super::address::{Address, Amount};

/// What a challenge disputes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    /// A listing application or whitelisted listing
    Listing,
    /// A parameterizer proposal
    Parameterizer,
    /// A granted appeal
    Appeal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub challenge_id: u64,
    pub kind: ChallengeKind,
    /// Listing (or parameterizer contract) the challenge targets
    pub listing_address: Address,
    pub statement: String,
    pub reward_pool: Amount,
    pub challenger: Address,
    pub resolved: bool,
    pub stake: Amount,
    pub total_tokens: Amount,
    pub request_appeal_expiry: i64,
    pub poll_id: u64,
    /// Original challenge id when this challenge disputes a granted appeal
    pub appeal_of: Option<u64>,
    pub appeal_id: Option<u64>,
    pub created_at: i64,
    pub last_updated: i64,
}

impl Challenge {
    pub fn resolve(&mut self, reward_pool: Amount, total_tokens: Amount, timestamp: i64) {
        self.resolved = true;
        self.reward_pool = reward_pool;
        self.total_tokens = total_tokens;
        self.last_updated = self.last_updated.max(timestamp);
    }
}

/// A commit/reveal vote. In this registry `poll_id == challenge_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub poll_id: u64,
    pub commit_end_date: i64,
    pub reveal_end_date: i64,
    pub vote_quorum: u64,
    pub votes_for: Amount,
    pub votes_against: Amount,
    /// Unset until the challenge resolves
    pub is_passed: Option<bool>,
    pub last_updated: i64,
}

impl Poll {
    pub fn new(poll_id: u64, commit_end_date: i64, reveal_end_date: i64, timestamp: i64) -> Self {
        Self {
            poll_id,
            commit_end_date,
            reveal_end_date,
            vote_quorum: 0,
            votes_for: 0,
            votes_against: 0,
            is_passed: None,
            last_updated: timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appeal {
    /// Challenge the appeal disputes
    pub original_challenge_id: u64,
    pub requester: Address,
    pub appeal_fee_paid: Amount,
    pub appeal_phase_expiry: i64,
    pub appeal_granted: bool,
    pub appeal_granted_statement_uri: String,
    pub appeal_open_to_challenge_expiry: i64,
    pub statement: String,
    pub appeal_challenge_id: Option<u64>,
    /// Whether the appeal overturned the original challenge outcome
    pub overturned: bool,
    pub last_updated: i64,
}

/// One voter's participation in one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChallengeData {
    pub poll_id: u64,
    pub user_address: Address,
    pub num_tokens: Amount,
    pub user_did_commit: bool,
    pub user_did_reveal: bool,
    pub choice: Option<u8>,
    pub salt: Option<String>,
    pub poll_is_passed: Option<bool>,
    pub is_voter_winner: Option<bool>,
    pub did_user_collect: bool,
    pub did_collect_amount: Amount,
    pub did_user_rescue: bool,
    pub last_updated: i64,
}

impl UserChallengeData {
    pub fn committed(poll_id: u64, user_address: Address, num_tokens: Amount, timestamp: i64) -> Self {
        Self {
            poll_id,
            user_address,
            num_tokens,
            user_did_commit: true,
            user_did_reveal: false,
            choice: None,
            salt: None,
            poll_is_passed: None,
            is_voter_winner: None,
            did_user_collect: false,
            did_collect_amount: 0,
            did_user_rescue: false,
            last_updated: timestamp,
        }
    }

    /// Stamp the poll outcome. Choice 1 is a vote for the poll passing.
    pub fn resolve(&mut self, passed: bool, timestamp: i64) {
        self.poll_is_passed = Some(passed);
        self.is_voter_winner = self.choice.map(|choice| (choice == 1) == passed);
        self.last_updated = self.last_updated.max(timestamp);
    }
}
