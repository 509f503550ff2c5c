//! Raw contract events as delivered by the crawler, and push notifications.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::Address;

// =============================================================================
// Event
// =============================================================================

/// A contract event retrieved from the event log. Immutable once retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Contract type, e.g. `CivilTCRContract`
    pub contract_name: String,

    /// Event name without the leading underscore, e.g. `Application`
    pub event_type: String,

    pub contract_address: Address,

    /// Event arguments as a JSON object
    pub payload: serde_json::Value,

    pub block_number: u64,
    pub tx_hash: String,
    pub tx_index: u32,
    pub block_hash: String,
    pub log_index: u32,

    /// Block timestamp (seconds)
    pub timestamp: i64,
}

impl Event {
    /// Create an event at block 0. Use [`Event::at`] and [`Event::with_tx`]
    /// to place it.
    pub fn new(
        contract_name: impl Into<String>,
        event_type: impl Into<String>,
        contract_address: Address,
        payload: serde_json::Value,
        timestamp: i64,
    ) -> Self {
        Self {
            contract_name: contract_name.into(),
            event_type: event_type.into(),
            contract_address,
            payload,
            block_number: 0,
            tx_hash: String::new(),
            tx_index: 0,
            block_hash: String::new(),
            log_index: 0,
            timestamp,
        }
    }

    /// Set block coordinates.
    pub fn at(mut self, block_number: u64, tx_index: u32, log_index: u32) -> Self {
        self.block_number = block_number;
        self.tx_index = tx_index;
        self.log_index = log_index;
        self
    }

    /// Set transaction and block hashes.
    pub fn with_tx(mut self, tx_hash: impl Into<String>, block_hash: impl Into<String>) -> Self {
        self.tx_hash = tx_hash.into();
        self.block_hash = block_hash.into();
        self
    }

    /// Content hash identifying this event across fetches.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.contract_address.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.event_type.as_bytes());
        hasher.update(b"|");
        hasher.update(self.tx_hash.to_ascii_lowercase().as_bytes());
        hasher.update(b"|");
        hasher.update(self.log_index.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.block_hash.to_ascii_lowercase().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Delivery order: timestamp, then position within the chain.
    pub fn ordering_key(&self) -> (i64, u64, u32, u32) {
        (self.timestamp, self.block_number, self.tx_index, self.log_index)
    }
}

// =============================================================================
// Notification
// =============================================================================

/// Push notification published by the crawler. It only triggers a fetch;
/// the events themselves are re-read from the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub hash: String,
    pub timestamp: i64,
    #[serde(default)]
    pub contract_address: String,
    /// Out-of-band refresh of a single contract, bypassing the watermark
    #[serde(default)]
    pub is_exception: bool,
}

impl Notification {
    pub fn from_json(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listing() -> Address {
        Address::parse("0x00000000000000000000000000000000000000aa").unwrap()
    }

    #[test]
    fn test_hash_is_stable_and_position_sensitive() {
        let a = Event::new("CivilTCRContract", "Application", listing(), json!({}), 10)
            .at(5, 0, 1)
            .with_tx("0xAB", "0xCD");
        let same = a.clone();
        let other_log = a.clone().at(5, 0, 2);

        assert_eq!(a.hash(), same.hash());
        assert_eq!(a.hash().len(), 64);
        assert_ne!(a.hash(), other_log.hash());

        // Hash casing of tx/block hashes does not matter.
        let lower = a.clone().with_tx("0xab", "0xcd");
        assert_eq!(a.hash(), lower.hash());
    }

    #[test]
    fn test_hash_ignores_timestamp_and_payload() {
        let a = Event::new("CivilTCRContract", "Application", listing(), json!({"a": 1}), 10);
        let b = Event::new("CivilTCRContract", "Application", listing(), json!({"a": 2}), 11);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_notification_wire_format() {
        let raw = br#"{"hash":"h1","timestamp":1700000000,"contractAddress":"0xaa","isException":true}"#;
        let n = Notification::from_json(raw).unwrap();
        assert_eq!(n.hash, "h1");
        assert_eq!(n.timestamp, 1_700_000_000);
        assert!(n.is_exception);

        let minimal = Notification::from_json(br#"{"hash":"h2","timestamp":1}"#).unwrap();
        assert!(!minimal.is_exception);
        assert!(minimal.contract_address.is_empty());
    }
}
