//! Governance aggregates folded from registry contract events.

pub mod address;
pub mod challenge;
pub mod listing;
pub mod multisig;
pub mod parameter;
pub mod token;

pub use address::{Address, Amount, ProposalId};
pub use challenge::{Appeal, Challenge, ChallengeKind, Poll, UserChallengeData};
pub use listing::{Charter, GovernanceState, Listing};
pub use multisig::MultiSig;
pub use parameter::{GovernmentParameter, GovernmentParameterProposal, Parameter, ParameterProposal};
pub use token::TokenTransfer;
