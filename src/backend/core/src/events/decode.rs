//! Typed decoding of raw event payloads.
//!
//! Each `(contract_name, event_type)` pair this processor understands maps to
//! one payload struct. Decoding happens once, at the dispatcher boundary;
//! handlers only ever see [`GovernanceEvent`].

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::event::Event;
use crate::error::{ProcessorError, Result};
use crate::model::{Address, Amount, ProposalId};

pub const CIVIL_TCR: &str = "CivilTCRContract";
pub const NEWSROOM: &str = "NewsroomContract";
pub const PARAMETERIZER: &str = "ParameterizerContract";
pub const GOVERNMENT: &str = "GovernmentContract";
pub const PLCR_VOTING: &str = "PLCRVotingContract";
pub const CVL_TOKEN: &str = "CVLTokenContract";
pub const MULTI_SIG_FACTORY: &str = "MultiSigWalletFactoryContract";
pub const MULTI_SIG_WALLET: &str = "MultiSigWalletContract";

// =============================================================================
// Decoded events
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum GovernanceEvent {
    Tcr(TcrEvent),
    Newsroom(NewsroomEvent),
    Parameterizer(ParameterizerEvent),
    Government(GovernmentEvent),
    Voting(VotingEvent),
    Token(TokenEvent),
    MultiSig(MultiSigEvent),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TcrEvent {
    Application(Application),
    Challenge(ListingChallenge),
    Deposit(DepositChange),
    Withdrawal(WithdrawalChange),
    ApplicationWhitelisted(ListingRef),
    ApplicationRemoved(ListingRef),
    ListingRemoved(ListingRef),
    ListingWithdrawn(ListingRef),
    TouchAndRemoved(ListingRef),
    ChallengeFailed(ChallengeResolution),
    ChallengeSucceeded(ChallengeResolution),
    RewardClaimed(RewardClaimed),
    AppealRequested(AppealRequested),
    AppealGranted(AppealGranted),
    FailedChallengeOverturned(ChallengeResolution),
    SuccessfulChallengeOverturned(ChallengeResolution),
    GrantedAppealChallenged(GrantedAppealChallenged),
    GrantedAppealOverturned(AppealChallengeResolution),
    GrantedAppealConfirmed(AppealChallengeResolution),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NewsroomEvent {
    NameChanged(NameChanged),
    OwnershipTransferred(OwnershipTransferred),
    RevisionUpdated(RevisionUpdated),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterizerEvent {
    ReparameterizationProposal(ReparameterizationProposal),
    NewChallenge(ProposalChallenge),
    ProposalAccepted(ProposalAccepted),
    ProposalExpired(ProposalRef),
    ChallengeFailed(ProposalChallengeResolution),
    ChallengeSucceeded(ProposalChallengeResolution),
    RewardClaimed(RewardClaimed),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GovernmentEvent {
    GovtReparameterizationProposal(GovtReparameterizationProposal),
    ProposalPassed(GovtProposalRef),
    ProposalFailed(GovtProposalRef),
    ParameterSet(ParameterSet),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VotingEvent {
    PollCreated(PollCreated),
    VoteCommitted(VoteCommitted),
    VoteRevealed(VoteRevealed),
    TokensRescued(TokensRescued),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    Transfer(Transfer),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MultiSigEvent {
    ContractInstantiation(ContractInstantiation),
    OwnerAddition(OwnerChange),
    OwnerRemoval(OwnerChange),
}

// =============================================================================
// Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Application {
    pub listing_address: Address,
    #[serde(deserialize_with = "num::amount")]
    pub deposit: Amount,
    #[serde(deserialize_with = "num::timestamp")]
    pub app_end_date: i64,
    #[serde(default)]
    pub data: String,
    pub applicant: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListingChallenge {
    pub listing_address: Address,
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(default)]
    pub data: String,
    #[serde(deserialize_with = "num::timestamp")]
    pub commit_end_date: i64,
    #[serde(deserialize_with = "num::timestamp")]
    pub reveal_end_date: i64,
    pub challenger: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DepositChange {
    pub listing_address: Address,
    #[serde(deserialize_with = "num::amount")]
    pub added: Amount,
    #[serde(deserialize_with = "num::amount")]
    pub new_total: Amount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WithdrawalChange {
    pub listing_address: Address,
    #[serde(deserialize_with = "num::amount")]
    pub withdrew: Amount,
    #[serde(deserialize_with = "num::amount")]
    pub new_total: Amount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListingRef {
    pub listing_address: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChallengeResolution {
    pub listing_address: Address,
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(default, deserialize_with = "num::amount")]
    pub reward_pool: Amount,
    #[serde(default, deserialize_with = "num::amount")]
    pub total_tokens: Amount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RewardClaimed {
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(deserialize_with = "num::amount")]
    pub reward: Amount,
    pub voter: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppealRequested {
    pub listing_address: Address,
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(deserialize_with = "num::amount")]
    pub appeal_fee_paid: Amount,
    pub requester: Address,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppealGranted {
    pub listing_address: Address,
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GrantedAppealChallenged {
    pub listing_address: Address,
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(rename = "AppealChallengeID", deserialize_with = "num::id")]
    pub appeal_challenge_id: u64,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppealChallengeResolution {
    pub listing_address: Address,
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(rename = "AppealChallengeID", deserialize_with = "num::id")]
    pub appeal_challenge_id: u64,
    #[serde(default, deserialize_with = "num::amount")]
    pub reward_pool: Amount,
    #[serde(default, deserialize_with = "num::amount")]
    pub total_tokens: Amount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameChanged {
    pub new_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnershipTransferred {
    pub previous_owner: Address,
    pub new_owner: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RevisionUpdated {
    pub editor: Address,
    #[serde(deserialize_with = "num::id")]
    pub content_id: u64,
    #[serde(deserialize_with = "num::id")]
    pub revision_id: u64,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReparameterizationProposal {
    pub name: String,
    #[serde(deserialize_with = "num::amount")]
    pub value: Amount,
    #[serde(rename = "PropID")]
    pub prop_id: ProposalId,
    #[serde(deserialize_with = "num::amount")]
    pub deposit: Amount,
    #[serde(deserialize_with = "num::timestamp")]
    pub app_end_date: i64,
    pub proposer: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProposalChallenge {
    #[serde(rename = "PropID")]
    pub prop_id: ProposalId,
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(deserialize_with = "num::timestamp")]
    pub commit_end_date: i64,
    #[serde(deserialize_with = "num::timestamp")]
    pub reveal_end_date: i64,
    pub challenger: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProposalAccepted {
    #[serde(rename = "PropID")]
    pub prop_id: ProposalId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "num::opt_amount")]
    pub value: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProposalRef {
    #[serde(rename = "PropID")]
    pub prop_id: ProposalId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProposalChallengeResolution {
    #[serde(rename = "PropID")]
    pub prop_id: ProposalId,
    #[serde(rename = "ChallengeID", deserialize_with = "num::id")]
    pub challenge_id: u64,
    #[serde(default, deserialize_with = "num::amount")]
    pub reward_pool: Amount,
    #[serde(default, deserialize_with = "num::amount")]
    pub total_tokens: Amount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GovtReparameterizationProposal {
    pub name: String,
    #[serde(deserialize_with = "num::amount")]
    pub value: Amount,
    #[serde(rename = "PropID")]
    pub prop_id: ProposalId,
    #[serde(rename = "PollID", deserialize_with = "num::id")]
    pub poll_id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GovtProposalRef {
    #[serde(rename = "PropID")]
    pub prop_id: ProposalId,
    #[serde(rename = "PollID", default, deserialize_with = "num::id")]
    pub poll_id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterSet {
    pub name: String,
    #[serde(deserialize_with = "num::amount")]
    pub value: Amount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PollCreated {
    #[serde(deserialize_with = "num::id")]
    pub vote_quorum: u64,
    #[serde(deserialize_with = "num::timestamp")]
    pub commit_end_date: i64,
    #[serde(deserialize_with = "num::timestamp")]
    pub reveal_end_date: i64,
    #[serde(rename = "PollID", deserialize_with = "num::id")]
    pub poll_id: u64,
    pub creator: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoteCommitted {
    #[serde(rename = "PollID", deserialize_with = "num::id")]
    pub poll_id: u64,
    #[serde(deserialize_with = "num::amount")]
    pub num_tokens: Amount,
    pub voter: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VoteRevealed {
    #[serde(rename = "PollID", deserialize_with = "num::id")]
    pub poll_id: u64,
    #[serde(deserialize_with = "num::amount")]
    pub num_tokens: Amount,
    /// Running totals after this reveal
    #[serde(default, deserialize_with = "num::opt_amount")]
    pub votes_for: Option<Amount>,
    #[serde(default, deserialize_with = "num::opt_amount")]
    pub votes_against: Option<Amount>,
    #[serde(deserialize_with = "num::choice")]
    pub choice: u8,
    pub voter: Address,
    #[serde(default, deserialize_with = "num::opt_string")]
    pub salt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokensRescued {
    #[serde(rename = "PollID", deserialize_with = "num::id")]
    pub poll_id: u64,
    pub voter: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    #[serde(deserialize_with = "num::amount")]
    pub value: Amount,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContractInstantiation {
    pub sender: Address,
    pub instantiation: Address,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OwnerChange {
    pub owner: Address,
}

// =============================================================================
// Decoding
// =============================================================================

fn payload<T: DeserializeOwned>(event: &Event) -> Result<T> {
    T::deserialize(&event.payload).map_err(|e| {
        ProcessorError::malformed_payload(&event.contract_name, &event.event_type, e.to_string())
            .with_context("tx_hash", &event.tx_hash)
            .with_context("log_index", event.log_index)
    })
}

impl GovernanceEvent {
    /// Decode `event`. Returns `Ok(None)` when no handler owns the
    /// `(contract_name, event_type)` pair.
    pub fn decode(event: &Event) -> Result<Option<Self>> {
        use GovernanceEvent as G;

        let decoded = match (event.contract_name.as_str(), event.event_type.as_str()) {
            (CIVIL_TCR, "Application") => G::Tcr(TcrEvent::Application(payload(event)?)),
            (CIVIL_TCR, "Challenge") => G::Tcr(TcrEvent::Challenge(payload(event)?)),
            (CIVIL_TCR, "Deposit") => G::Tcr(TcrEvent::Deposit(payload(event)?)),
            (CIVIL_TCR, "Withdrawal") => G::Tcr(TcrEvent::Withdrawal(payload(event)?)),
            (CIVIL_TCR, "ApplicationWhitelisted") => {
                G::Tcr(TcrEvent::ApplicationWhitelisted(payload(event)?))
            }
            (CIVIL_TCR, "ApplicationRemoved") => G::Tcr(TcrEvent::ApplicationRemoved(payload(event)?)),
            (CIVIL_TCR, "ListingRemoved") => G::Tcr(TcrEvent::ListingRemoved(payload(event)?)),
            (CIVIL_TCR, "ListingWithdrawn") => G::Tcr(TcrEvent::ListingWithdrawn(payload(event)?)),
            (CIVIL_TCR, "TouchAndRemoved") => G::Tcr(TcrEvent::TouchAndRemoved(payload(event)?)),
            (CIVIL_TCR, "ChallengeFailed") => G::Tcr(TcrEvent::ChallengeFailed(payload(event)?)),
            (CIVIL_TCR, "ChallengeSucceeded") => G::Tcr(TcrEvent::ChallengeSucceeded(payload(event)?)),
            (CIVIL_TCR, "RewardClaimed") => G::Tcr(TcrEvent::RewardClaimed(payload(event)?)),
            (CIVIL_TCR, "AppealRequested") => G::Tcr(TcrEvent::AppealRequested(payload(event)?)),
            (CIVIL_TCR, "AppealGranted") => G::Tcr(TcrEvent::AppealGranted(payload(event)?)),
            (CIVIL_TCR, "FailedChallengeOverturned") => {
                G::Tcr(TcrEvent::FailedChallengeOverturned(payload(event)?))
            }
            (CIVIL_TCR, "SuccessfulChallengeOverturned") => {
                G::Tcr(TcrEvent::SuccessfulChallengeOverturned(payload(event)?))
            }
            (CIVIL_TCR, "GrantedAppealChallenged") => {
                G::Tcr(TcrEvent::GrantedAppealChallenged(payload(event)?))
            }
            (CIVIL_TCR, "GrantedAppealOverturned") => {
                G::Tcr(TcrEvent::GrantedAppealOverturned(payload(event)?))
            }
            (CIVIL_TCR, "GrantedAppealConfirmed") => {
                G::Tcr(TcrEvent::GrantedAppealConfirmed(payload(event)?))
            }

            (NEWSROOM, "NameChanged") => G::Newsroom(NewsroomEvent::NameChanged(payload(event)?)),
            (NEWSROOM, "OwnershipTransferred") => {
                G::Newsroom(NewsroomEvent::OwnershipTransferred(payload(event)?))
            }
            (NEWSROOM, "RevisionUpdated") => {
                G::Newsroom(NewsroomEvent::RevisionUpdated(payload(event)?))
            }

            (PARAMETERIZER, "ReparameterizationProposal") => {
                G::Parameterizer(ParameterizerEvent::ReparameterizationProposal(payload(event)?))
            }
            (PARAMETERIZER, "NewChallenge") => {
                G::Parameterizer(ParameterizerEvent::NewChallenge(payload(event)?))
            }
            (PARAMETERIZER, "ProposalAccepted") => {
                G::Parameterizer(ParameterizerEvent::ProposalAccepted(payload(event)?))
            }
            (PARAMETERIZER, "ProposalExpired") => {
                G::Parameterizer(ParameterizerEvent::ProposalExpired(payload(event)?))
            }
            (PARAMETERIZER, "ChallengeFailed") => {
                G::Parameterizer(ParameterizerEvent::ChallengeFailed(payload(event)?))
            }
            (PARAMETERIZER, "ChallengeSucceeded") => {
                G::Parameterizer(ParameterizerEvent::ChallengeSucceeded(payload(event)?))
            }
            (PARAMETERIZER, "RewardClaimed") => {
                G::Parameterizer(ParameterizerEvent::RewardClaimed(payload(event)?))
            }

            (GOVERNMENT, "GovtReparameterizationProposal") => {
                G::Government(GovernmentEvent::GovtReparameterizationProposal(payload(event)?))
            }
            (GOVERNMENT, "ProposalPassed") => {
                G::Government(GovernmentEvent::ProposalPassed(payload(event)?))
            }
            (GOVERNMENT, "ProposalFailed") => {
                G::Government(GovernmentEvent::ProposalFailed(payload(event)?))
            }
            (GOVERNMENT, "ParameterSet") => G::Government(GovernmentEvent::ParameterSet(payload(event)?)),

            (PLCR_VOTING, "PollCreated") => G::Voting(VotingEvent::PollCreated(payload(event)?)),
            (PLCR_VOTING, "VoteCommitted") => G::Voting(VotingEvent::VoteCommitted(payload(event)?)),
            (PLCR_VOTING, "VoteRevealed") => G::Voting(VotingEvent::VoteRevealed(payload(event)?)),
            (PLCR_VOTING, "TokensRescued") => G::Voting(VotingEvent::TokensRescued(payload(event)?)),

            (CVL_TOKEN, "Transfer") => G::Token(TokenEvent::Transfer(payload(event)?)),

            (MULTI_SIG_FACTORY, "ContractInstantiation") => {
                G::MultiSig(MultiSigEvent::ContractInstantiation(payload(event)?))
            }
            (MULTI_SIG_WALLET, "OwnerAddition") => {
                G::MultiSig(MultiSigEvent::OwnerAddition(payload(event)?))
            }
            (MULTI_SIG_WALLET, "OwnerRemoval") => G::MultiSig(MultiSigEvent::OwnerRemoval(payload(event)?)),

            _ => return Ok(None),
        };

        Ok(Some(decoded))
    }
}

// =============================================================================
// Numeric fields
// =============================================================================

/// Event arguments arrive as JSON numbers or as decimal (or `0x` hex) strings.
mod num {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Deserialize;
    use std::fmt;

    /// 2^53, the largest range in which every integer is an exact f64.
    const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

    struct U128Visitor;

    impl<'de> Visitor<'de> for U128Visitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a non-negative integer or an integer string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(v as u128)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
            u128::try_from(v).map_err(|_| E::custom(format!("negative value: {}", v)))
        }

        /// Only floats that hold an exact integer; larger amounts must be
        /// sent as strings.
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u128, E> {
            if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v <= MAX_EXACT_FLOAT {
                Ok(v as u128)
            } else {
                Err(E::custom(format!("not an exact integer: {}", v)))
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            let v = v.trim();
            let parsed = match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
                Some(digits) => u128::from_str_radix(digits, 16),
                None => v.parse::<u128>(),
            };
            parsed.map_err(|e| E::custom(format!("invalid integer {:?}: {}", v, e)))
        }
    }

    pub fn amount<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        d.deserialize_any(U128Visitor)
    }

    struct OptU128Visitor;

    impl<'de> Visitor<'de> for OptU128Visitor {
        type Value = Option<u128>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("null, a non-negative integer or an integer string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Option<u128>, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Option<u128>, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Option<u128>, D::Error> {
            amount(d).map(Some)
        }
    }

    /// Absent and `null` both decode to `None`.
    pub fn opt_amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u128>, D::Error> {
        d.deserialize_option(OptU128Visitor)
    }

    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let v = amount(d)?;
        u64::try_from(v).map_err(|_| de::Error::custom(format!("id out of range: {}", v)))
    }

    pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let v = amount(d)?;
        i64::try_from(v).map_err(|_| de::Error::custom(format!("timestamp out of range: {}", v)))
    }

    pub fn choice<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
        let v = amount(d)?;
        u8::try_from(v).map_err(|_| de::Error::custom(format!("vote choice out of range: {}", v)))
    }

    /// Salts are uint256 on chain; keep them as their decimal text.
    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let v = serde_json::Value::deserialize(d)?;
        Ok(match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }
}
