//! CVL token transfers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::EventHandler;
use crate::error::Result;
use crate::events::decode::TokenEvent;
use crate::events::{Event, GovernanceEvent};
use crate::model::TokenTransfer;
use crate::store::TokenTransferStore;

pub struct TokenTransferHandler {
    transfers: Arc<dyn TokenTransferStore>,
}

impl TokenTransferHandler {
    pub fn new(transfers: Arc<dyn TokenTransferStore>) -> Self {
        Self { transfers }
    }
}

#[async_trait]
impl EventHandler for TokenTransferHandler {
    fn name(&self) -> &'static str {
        "token_transfer"
    }

    async fn handle(&self, event: &Event, decoded: &GovernanceEvent) -> Result<bool> {
        let GovernanceEvent::Token(TokenEvent::Transfer(transfer)) = decoded else {
            return Ok(false);
        };

        let record = TokenTransfer {
            from: transfer.from.clone(),
            to: transfer.to.clone(),
            amount: transfer.value,
            block_number: event.block_number,
            tx_hash: event.tx_hash.clone(),
            log_index: event.log_index,
            timestamp: event.timestamp,
        };
        if !self.transfers.create_token_transfer(&record).await? {
            debug!(tx_hash = %record.tx_hash, log_index = record.log_index, "Transfer already recorded");
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::decode::CVL_TOKEN;
    use crate::processor::test_support::{addr, event};
    use crate::store::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_transfer_recorded_once() {
        let store = Arc::new(InMemoryStore::new());
        let handler = TokenTransferHandler::new(store.clone());
        let transfer = event(
            CVL_TOKEN,
            "Transfer",
            addr(600),
            json!({
                "From": addr(1).as_str(),
                "To": addr(2).as_str(),
                "Value": "340282366920938463463374607431768211455",
            }),
            10,
            3,
        );
        let decoded = GovernanceEvent::decode(&transfer).unwrap().unwrap();

        assert!(handler.handle(&transfer, &decoded).await.unwrap());
        assert!(handler.handle(&transfer, &decoded).await.unwrap());

        let sent = store.token_transfers_for(&addr(1)).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, u128::MAX);
        assert_eq!(sent[0].log_index, 3);
        assert_eq!(store.token_transfers_for(&addr(2)).await.unwrap().len(), 1);
    }
}
