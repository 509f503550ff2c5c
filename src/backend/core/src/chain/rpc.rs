//! JSON-RPC `eth_call` chain reader.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use tracing::{debug, instrument};

use super::{ChainReader, GovernmentProposalRecord, ParameterizerProposalRecord, ProposalRecord};
use crate::config::ChainConfig;
use crate::error::{ErrorCode, ProcessorError, Result};
use crate::model::{Address, ProposalId};

const PROPOSALS_SIGNATURE: &str = "proposals(bytes32)";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// First four bytes of the Keccak-256 hash of a function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Reads proposals over Ethereum JSON-RPC.
pub struct RpcChainReader {
    client: reqwest::Client,
    rpc_url: String,
    government_address: Option<Address>,
    next_id: AtomicU64,
}

impl RpcChainReader {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            government_address: config.government_address.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn eth_call(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: json!([
                { "to": to.as_str(), "data": format!("0x{}", hex::encode(data)) },
                "latest"
            ]),
        };

        let response: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(ProcessorError::chain_rpc(format!(
                "eth_call failed ({}): {}",
                err.code, err.message
            )));
        }

        let result = response
            .result
            .ok_or_else(|| ProcessorError::chain_rpc("eth_call returned neither result nor error"))?;
        let digits = result.strip_prefix("0x").unwrap_or(&result);
        hex::decode(digits)
            .map_err(|e| ProcessorError::chain_rpc(format!("eth_call returned invalid hex: {}", e)))
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    #[instrument(skip(self), fields(contract = %contract_address, prop_id = %prop_id))]
    async fn read_on_chain_proposal(
        &self,
        contract_address: &Address,
        prop_id: &ProposalId,
    ) -> Result<Option<ProposalRecord>> {
        let mut data = Vec::with_capacity(36);
        data.extend_from_slice(&function_selector(PROPOSALS_SIGNATURE));
        data.extend_from_slice(&prop_id.to_bytes());

        let output = self.eth_call(contract_address, &data).await?;
        let is_government = self.government_address.as_ref() == Some(contract_address);

        let record = if is_government {
            abi::government_proposal(&output)?.map(ProposalRecord::Government)
        } else {
            abi::parameterizer_proposal(&output)?.map(ProposalRecord::Parameterizer)
        };

        debug!(found = record.is_some(), "Read proposal from chain");
        Ok(record)
    }
}

/// Minimal ABI decoding for the two proposal tuples.
mod abi {
    use super::*;

    const WORD: usize = 32;

    fn malformed(reason: impl Into<String>) -> ProcessorError {
        ProcessorError::with_internal(ErrorCode::ChainRpcError, "Unexpected eth_call output", reason)
    }

    fn word(data: &[u8], index: usize) -> Result<&[u8]> {
        data.get(index * WORD..(index + 1) * WORD)
            .ok_or_else(|| malformed(format!("output too short for word {}", index)))
    }

    fn uint(data: &[u8], index: usize) -> Result<u128> {
        let w = word(data, index)?;
        if w[..16].iter().any(|b| *b != 0) {
            return Err(malformed(format!("word {} overflows u128", index)));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&w[16..]);
        Ok(u128::from_be_bytes(buf))
    }

    fn small<T: TryFrom<u128>>(data: &[u8], index: usize) -> Result<T> {
        let v = uint(data, index)?;
        T::try_from(v).map_err(|_| malformed(format!("word {} out of range", index)))
    }

    fn address(data: &[u8], index: usize) -> Result<Address> {
        let w = word(data, index)?;
        Address::parse(&hex::encode(&w[12..]))
    }

    fn string(data: &[u8], head_index: usize) -> Result<String> {
        let offset: usize = small(data, head_index)?;
        let start = offset
            .checked_add(WORD)
            .ok_or_else(|| malformed("string offset overflows"))?;
        let len_word = data
            .get(offset..start)
            .ok_or_else(|| malformed("string offset out of bounds"))?;
        if len_word[..24].iter().any(|b| *b != 0) {
            return Err(malformed("string length overflows"));
        }
        let mut len_buf = [0u8; 8];
        len_buf.copy_from_slice(&len_word[24..]);
        let len = usize::try_from(u64::from_be_bytes(len_buf))
            .map_err(|_| malformed("string length overflows"))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| malformed("string length overflows"))?;
        let bytes = data
            .get(start..end)
            .ok_or_else(|| malformed("string data out of bounds"))?;
        String::from_utf8(bytes.to_vec()).map_err(|e| malformed(e.to_string()))
    }

    /// `(appExpiry, challengeID, deposit, name, owner, processBy, value)`
    pub fn parameterizer_proposal(data: &[u8]) -> Result<Option<ParameterizerProposalRecord>> {
        if data.is_empty() {
            return Ok(None);
        }
        let record = ParameterizerProposalRecord {
            app_expiry: small(data, 0)?,
            challenge_id: small(data, 1)?,
            deposit: uint(data, 2)?,
            name: string(data, 3)?,
            owner: address(data, 4)?,
            process_by: small(data, 5)?,
            value: uint(data, 6)?,
        };
        let unknown = record.app_expiry == 0
            && record.process_by == 0
            && record.deposit == 0
            && record.name.is_empty()
            && record.owner.is_zero();
        Ok(if unknown { None } else { Some(record) })
    }

    /// `(pollID, name, processBy, value)`
    pub fn government_proposal(data: &[u8]) -> Result<Option<GovernmentProposalRecord>> {
        if data.is_empty() {
            return Ok(None);
        }
        let record = GovernmentProposalRecord {
            poll_id: small(data, 0)?,
            name: string(data, 1)?,
            process_by: small(data, 2)?,
            value: uint(data, 3)?,
        };
        let unknown = record.poll_id == 0 && record.process_by == 0 && record.name.is_empty();
        Ok(if unknown { None } else { Some(record) })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn uint_word(v: u128) -> Vec<u8> {
        let mut w = vec![0u8; 16];
        w.extend_from_slice(&v.to_be_bytes());
        w
    }

    fn address_word(addr: &Address) -> Vec<u8> {
        let mut w = vec![0u8; 12];
        w.extend_from_slice(&addr.to_bytes());
        w
    }

    fn string_tail(s: &str) -> Vec<u8> {
        let mut tail = uint_word(s.len() as u128);
        let mut bytes = s.as_bytes().to_vec();
        let padded = (bytes.len() + 31) / 32 * 32;
        bytes.resize(padded, 0);
        tail.extend(bytes);
        tail
    }

    /// ABI-encode a Parameterizer proposal tuple.
    pub(crate) fn encode_parameterizer(record: &ParameterizerProposalRecord) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(uint_word(record.app_expiry as u128));
        out.extend(uint_word(record.challenge_id as u128));
        out.extend(uint_word(record.deposit));
        out.extend(uint_word(7 * 32));
        out.extend(address_word(&record.owner));
        out.extend(uint_word(record.process_by as u128));
        out.extend(uint_word(record.value));
        out.extend(string_tail(&record.name));
        out
    }

    pub(crate) fn encode_government(record: &GovernmentProposalRecord) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(uint_word(record.poll_id as u128));
        out.extend(uint_word(4 * 32));
        out.extend(uint_word(record.process_by as u128));
        out.extend(uint_word(record.value));
        out.extend(string_tail(&record.name));
        out
    }

    #[test]
    fn test_function_selector() {
        // keccak256("transfer(address,uint256)") = a9059cbb...
        assert_eq!(function_selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_decode_parameterizer_tuple() {
        let record = ParameterizerProposalRecord {
            app_expiry: 1_700_000_000,
            challenge_id: 0,
            deposit: 10_000,
            name: "commitStageLen".into(),
            owner: Address::parse(&format!("0x{:040x}", 7)).unwrap(),
            process_by: 1_700_604_800,
            value: 1800,
        };
        let decoded = abi::parameterizer_proposal(&encode_parameterizer(&record)).unwrap();
        assert_eq!(decoded, Some(record));
    }

    #[test]
    fn test_decode_government_tuple() {
        let record = GovernmentProposalRecord {
            poll_id: 12,
            name: "appealFee".into(),
            process_by: 99,
            value: 5,
        };
        let decoded = abi::government_proposal(&encode_government(&record)).unwrap();
        assert_eq!(decoded, Some(record));
    }

    #[test]
    fn test_all_zero_record_is_unknown() {
        let record = ParameterizerProposalRecord {
            app_expiry: 0,
            challenge_id: 0,
            deposit: 0,
            name: String::new(),
            owner: Address::zero(),
            process_by: 0,
            value: 0,
        };
        assert_eq!(abi::parameterizer_proposal(&encode_parameterizer(&record)).unwrap(), None);
        assert_eq!(abi::parameterizer_proposal(&[]).unwrap(), None);
    }

    #[test]
    fn test_truncated_output_is_an_error() {
        let err = abi::parameterizer_proposal(&[0u8; 40]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChainRpcError);
    }

    #[test]
    fn test_string_bounds_never_overflow() {
        let record = ParameterizerProposalRecord {
            app_expiry: 1,
            challenge_id: 0,
            deposit: 1,
            name: "pMinDeposit".into(),
            owner: Address::parse(&format!("0x{:040x}", 7)).unwrap(),
            process_by: 2,
            value: 3,
        };

        let mut huge_offset = encode_parameterizer(&record);
        huge_offset[3 * 32..4 * 32].copy_from_slice(&uint_word(u64::MAX as u128));
        let err = abi::parameterizer_proposal(&huge_offset).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChainRpcError);

        let mut huge_len = encode_parameterizer(&record);
        huge_len[7 * 32..8 * 32].copy_from_slice(&uint_word(u64::MAX as u128));
        let err = abi::parameterizer_proposal(&huge_len).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChainRpcError);

        let mut short_tail = encode_parameterizer(&record);
        short_tail.truncate(8 * 32 + 4);
        assert!(abi::parameterizer_proposal(&short_tail).is_err());
    }
}
