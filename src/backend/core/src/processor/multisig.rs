//! Multisig wallets created through the wallet factory.

use std::sync::Arc;

use async_trait::async_trait;

use super::EventHandler;
use crate::error::{ProcessorError, Result};
use crate::events::decode::MultiSigEvent;
use crate::events::{Event, GovernanceEvent};
use crate::model::MultiSig;
use crate::store::MultiSigStore;

pub struct MultiSigHandler {
    multisigs: Arc<dyn MultiSigStore>,
}

impl MultiSigHandler {
    pub fn new(multisigs: Arc<dyn MultiSigStore>) -> Self {
        Self { multisigs }
    }

    async fn require(&self, event: &Event) -> Result<MultiSig> {
        self.multisigs
            .get_multisig(&event.contract_address)
            .await?
            .ok_or_else(|| ProcessorError::not_found("MultiSig", event.contract_address.as_str()))
    }
}

#[async_trait]
impl EventHandler for MultiSigHandler {
    fn name(&self) -> &'static str {
        "multisig"
    }

    async fn handle(&self, event: &Event, decoded: &GovernanceEvent) -> Result<bool> {
        let GovernanceEvent::MultiSig(multisig) = decoded else {
            return Ok(false);
        };
        let ts = event.timestamp;

        match multisig {
            MultiSigEvent::ContractInstantiation(created) => {
                if self.multisigs.get_multisig(&created.instantiation).await?.is_none() {
                    let wallet = MultiSig {
                        contract_address: created.instantiation.clone(),
                        creator: created.sender.clone(),
                        owners: vec![created.sender.clone()],
                        created_at: ts,
                        last_updated: ts,
                    };
                    self.multisigs.create_multisig(&wallet).await?;
                }
            }
            MultiSigEvent::OwnerAddition(change) => {
                let mut wallet = self.require(event).await?;
                wallet.add_owner(change.owner.clone(), ts);
                self.multisigs.update_multisig(&wallet).await?;
            }
            MultiSigEvent::OwnerRemoval(change) => {
                let mut wallet = self.require(event).await?;
                wallet.remove_owner(&change.owner, ts);
                self.multisigs.update_multisig(&wallet).await?;
            }
        }

        Ok(true)
    }
}
