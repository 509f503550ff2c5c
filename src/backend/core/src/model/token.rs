use serde::{Deserialize, Serialize};

use super::address::{Address, Amount};

/// A CVL token transfer, unique per `(tx_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u32,
    pub timestamp: i64,
}
