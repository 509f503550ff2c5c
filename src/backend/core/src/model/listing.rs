//! Listing aggregate and its governance state.

use serde::{Deserialize, Serialize};

use super::address::{Address, Amount};

/// Governance state of a listing in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceState {
    Applied,
    Challenged,
    AppWhitelisted,
    AppRemoved,
    Removed,
    Withdrawn,
}

impl GovernanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Challenged => "challenged",
            Self::AppWhitelisted => "app_whitelisted",
            Self::AppRemoved => "app_removed",
            Self::Removed => "removed",
            Self::Withdrawn => "withdrawn",
        }
    }
}

/// Charter document published by the newsroom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charter {
    pub uri: String,
    pub content_id: u64,
    pub revision_id: u64,
    pub author: Address,
    pub timestamp: i64,
}

/// A newsroom registered (or applying) in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub contract_address: Address,
    pub name: String,
    pub whitelisted: bool,
    pub state: GovernanceState,
    pub url: String,
    pub charter: Option<Charter>,
    pub owner: Option<Address>,
    pub owner_addresses: Vec<Address>,
    pub contributor_addresses: Vec<Address>,
    pub application_date: Option<i64>,
    pub app_expiry: Option<i64>,
    pub approval_date: Option<i64>,
    pub unstaked_deposit: Amount,
    pub challenge_id: Option<u64>,
    pub creation_date: i64,
    /// Timestamp of the last governance event applied to this listing
    pub last_governance_update: i64,
    pub last_updated: i64,
}

impl Listing {
    /// A freshly applied listing.
    pub fn applied(
        contract_address: Address,
        applicant: Address,
        deposit: Amount,
        app_expiry: i64,
        url: String,
        timestamp: i64,
    ) -> Self {
        Self {
            contract_address,
            name: String::new(),
            whitelisted: false,
            state: GovernanceState::Applied,
            url,
            charter: None,
            owner: Some(applicant.clone()),
            owner_addresses: vec![applicant],
            contributor_addresses: Vec::new(),
            application_date: Some(timestamp),
            app_expiry: Some(app_expiry),
            approval_date: None,
            unstaked_deposit: deposit,
            challenge_id: None,
            creation_date: timestamp,
            last_governance_update: timestamp,
            last_updated: timestamp,
        }
    }

    /// Whether a governance event at `timestamp` predates the last one applied.
    pub fn is_stale(&self, timestamp: i64) -> bool {
        timestamp < self.last_governance_update
    }

    /// Move to `state`. `whitelisted` always follows the state.
    pub fn transition(&mut self, state: GovernanceState, timestamp: i64) {
        self.state = state;
        self.whitelisted = state == GovernanceState::AppWhitelisted;
        if self.whitelisted && self.approval_date.is_none() {
            self.approval_date = Some(timestamp);
        }
        self.last_governance_update = self.last_governance_update.max(timestamp);
        self.touch(timestamp);
    }

    /// Re-apply a listing that already exists (e.g. after removal).
    pub fn reapply(&mut self, deposit: Amount, app_expiry: i64, url: String, timestamp: i64) {
        self.transition(GovernanceState::Applied, timestamp);
        self.unstaked_deposit = deposit;
        self.app_expiry = Some(app_expiry);
        self.application_date = Some(timestamp);
        self.approval_date = None;
        self.challenge_id = None;
        if !url.is_empty() {
            self.url = url;
        }
    }

    pub fn add_owner(&mut self, owner: Address) {
        if !self.owner_addresses.contains(&owner) {
            self.owner_addresses.push(owner);
        }
    }

    pub fn remove_owner(&mut self, owner: &Address) {
        self.owner_addresses.retain(|o| o != owner);
    }

    pub fn add_contributor(&mut self, contributor: Address) {
        if !self.contributor_addresses.contains(&contributor) {
            self.contributor_addresses.push(contributor);
        }
    }

    pub fn touch(&mut self, timestamp: i64) {
        self.last_updated = self.last_updated.max(timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::parse(&format!("0x{:040x}", n)).unwrap()
    }

    #[test]
    fn test_whitelisted_follows_state() {
        let mut listing = Listing::applied(addr(1), addr(2), 100, 2_000, String::new(), 1_000);
        assert!(!listing.whitelisted);

        listing.transition(GovernanceState::AppWhitelisted, 1_500);
        assert!(listing.whitelisted);
        assert_eq!(listing.approval_date, Some(1_500));

        listing.transition(GovernanceState::Challenged, 1_600);
        assert!(!listing.whitelisted);
        // Approval date is kept across a challenge.
        assert_eq!(listing.approval_date, Some(1_500));
    }

    #[test]
    fn test_owner_set_has_no_duplicates() {
        let mut listing = Listing::applied(addr(1), addr(2), 100, 2_000, String::new(), 1_000);
        listing.add_owner(addr(2));
        listing.add_owner(addr(3));
        listing.add_owner(addr(3));
        assert_eq!(listing.owner_addresses, vec![addr(2), addr(3)]);

        listing.remove_owner(&addr(2));
        assert_eq!(listing.owner_addresses, vec![addr(3)]);
    }

    #[test]
    fn test_stale_is_strictly_older() {
        let mut listing = Listing::applied(addr(1), addr(2), 100, 2_000, String::new(), 1_000);
        listing.transition(GovernanceState::AppWhitelisted, 1_500);
        assert!(listing.is_stale(1_499));
        assert!(!listing.is_stale(1_500));
        assert!(!listing.is_stale(1_501));
    }

    #[test]
    fn test_reapply_resets_governance_fields() {
        let mut listing = Listing::applied(addr(1), addr(2), 100, 2_000, "a".into(), 1_000);
        listing.transition(GovernanceState::AppWhitelisted, 1_500);
        listing.challenge_id = Some(4);
        listing.transition(GovernanceState::Removed, 1_600);

        listing.reapply(300, 5_000, String::new(), 1_700);
        assert_eq!(listing.state, GovernanceState::Applied);
        assert_eq!(listing.unstaked_deposit, 300);
        assert_eq!(listing.challenge_id, None);
        assert_eq!(listing.approval_date, None);
        assert_eq!(listing.url, "a");
    }
}
