//! On-chain identifiers: addresses, proposal ids and token amounts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorCode, ProcessorError, Result};

/// Token amounts in base units (wei).
pub type Amount = u128;

// =============================================================================
// Address
// =============================================================================

/// A 20-byte account or contract address, stored as lowercase `0x` hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalise an address.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != 40 || hex::decode(digits).is_err() {
            return Err(ProcessorError::invalid_address(value));
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// The zero address.
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }

    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw 20 bytes.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated on construction.
        if let Ok(bytes) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }
}

impl TryFrom<String> for Address {
    type Error = ProcessorError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl std::str::FromStr for Address {
    type Err = ProcessorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ProposalId
// =============================================================================

/// A 32-byte proposal identifier, stored as lowercase `0x` hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProposalId(String);

impl ProposalId {
    /// Parse a proposal id. Shorter hex values are left-padded to 32 bytes.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() || digits.len() > 64 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProcessorError::new(
                ErrorCode::MalformedPayload,
                format!("Invalid proposal id: {}", value),
            ));
        }
        Ok(Self(format!("0x{:0>64}", digits.to_ascii_lowercase())))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        if let Ok(bytes) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }
}

impl TryFrom<String> for ProposalId {
    type Error = ProcessorError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ProposalId> for String {
    fn from(value: ProposalId) -> Self {
        value.0
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_lowercased() {
        let addr = Address::parse("0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD").unwrap();
        assert_eq!(addr.as_str(), "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd");
        assert_eq!(addr, Address::parse("abcdefabcdefabcdefabcdefabcdefabcdefabcd").unwrap());
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!(Address::parse("0x1234").is_err());
        assert!(Address::parse("0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz").is_err());
        let err = Address::parse("").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAddress);
    }

    #[test]
    fn test_zero_address() {
        assert!(Address::zero().is_zero());
        assert_eq!(Address::zero().to_bytes(), [0u8; 20]);
    }

    #[test]
    fn test_address_serde() {
        let addr: Address =
            serde_json::from_str("\"0x00000000000000000000000000000000000000AA\"").unwrap();
        assert_eq!(
            serde_json::to_string(&addr).unwrap(),
            "\"0x00000000000000000000000000000000000000aa\""
        );
        assert!(serde_json::from_str::<Address>("\"nope\"").is_err());
    }

    #[test]
    fn test_proposal_id_padding() {
        let id = ProposalId::parse("0x01").unwrap();
        assert_eq!(id.as_str().len(), 66);
        assert!(id.as_str().ends_with("01"));
        assert_eq!(id.to_bytes()[31], 1);
        assert_eq!(ProposalId::from_bytes(id.to_bytes()), id);
    }
}
