use serde::{Deserialize, Serialize};

use super::address::Address;

/// A multisig wallet created through the wallet factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiSig {
    pub contract_address: Address,
    pub creator: Address,
    pub owners: Vec<Address>,
    pub created_at: i64,
    pub last_updated: i64,
}

impl MultiSig {
    pub fn add_owner(&mut self, owner: Address, timestamp: i64) {
        if !self.owners.contains(&owner) {
            self.owners.push(owner);
        }
        self.last_updated = self.last_updated.max(timestamp);
    }

    pub fn remove_owner(&mut self, owner: &Address, timestamp: i64) {
        self.owners.retain(|o| o != owner);
        self.last_updated = self.last_updated.max(timestamp);
    }
}
