//! Parameterizer and government parameter aggregates.

use serde::{Deserialize, Serialize};

use super::address::{Address, Amount, ProposalId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterProposal {
    pub prop_id: ProposalId,
    pub contract_address: Address,
    pub name: String,
    pub value: Amount,
    pub deposit: Amount,
    pub app_expiry: i64,
    /// 0 when unchallenged
    pub challenge_id: u64,
    pub proposer: Address,
    pub accepted: bool,
    pub expired: bool,
    pub last_updated: i64,
}

impl ParameterProposal {
    /// Whether a resolution at `timestamp` still falls inside the processing window.
    pub fn within_window(&self, timestamp: i64, grace_period_secs: i64) -> bool {
        timestamp <= self.app_expiry.saturating_add(grace_period_secs)
    }
}

/// Live value of a named parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Amount,
    pub last_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernmentParameterProposal {
    pub prop_id: ProposalId,
    pub name: String,
    pub value: Amount,
    pub poll_id: u64,
    pub process_by: i64,
    pub accepted: bool,
    pub expired: bool,
    pub last_updated: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernmentParameter {
    pub name: String,
    pub value: Amount,
    pub last_updated: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_window_is_inclusive() {
        let proposal = ParameterProposal {
            prop_id: ProposalId::parse("0x01").unwrap(),
            contract_address: Address::zero(),
            name: "commitStageLen".into(),
            value: 1800,
            deposit: 0,
            app_expiry: 1_000,
            challenge_id: 0,
            proposer: Address::zero(),
            accepted: false,
            expired: false,
            last_updated: 0,
        };
        assert!(proposal.within_window(1_100, 100));
        assert!(!proposal.within_window(1_101, 100));
    }
}
