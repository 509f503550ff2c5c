//! Government parameter proposals.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::reconcile::Reconciler;
use super::EventHandler;
use crate::error::Result;
use crate::events::decode::GovernmentEvent;
use crate::events::{Event, GovernanceEvent};
use crate::model::{GovernmentParameter, GovernmentParameterProposal};
use crate::store::{GovernmentParameterProposalStore, GovernmentParameterStore};

pub struct GovernmentHandler {
    proposals: Arc<dyn GovernmentParameterProposalStore>,
    parameters: Arc<dyn GovernmentParameterStore>,
    reconciler: Reconciler,
}

impl GovernmentHandler {
    pub fn new(
        proposals: Arc<dyn GovernmentParameterProposalStore>,
        parameters: Arc<dyn GovernmentParameterStore>,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            proposals,
            parameters,
            reconciler,
        }
    }

    async fn set(&self, name: &str, value: u128, ts: i64) -> Result<()> {
        self.parameters
            .update_government_parameter(&GovernmentParameter {
                name: name.to_string(),
                value,
                last_updated: ts,
            })
            .await?;
        info!(name, value = %value, "Government parameter updated");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for GovernmentHandler {
    fn name(&self) -> &'static str {
        "government"
    }

    async fn handle(&self, event: &Event, decoded: &GovernanceEvent) -> Result<bool> {
        let GovernanceEvent::Government(govt) = decoded else {
            return Ok(false);
        };
        let ts = event.timestamp;

        match govt {
            GovernmentEvent::GovtReparameterizationProposal(p) => {
                if self
                    .proposals
                    .get_government_parameter_proposal(&p.prop_id)
                    .await?
                    .is_some()
                {
                    debug!(prop_id = %p.prop_id, "Government proposal already recorded");
                    return Ok(true);
                }
                let proposal = GovernmentParameterProposal {
                    prop_id: p.prop_id.clone(),
                    name: p.name.clone(),
                    value: p.value,
                    poll_id: p.poll_id,
                    process_by: 0,
                    accepted: false,
                    expired: false,
                    last_updated: ts,
                };
                self.proposals.create_government_parameter_proposal(&proposal).await?;
            }

            GovernmentEvent::ProposalPassed(r) => {
                let mut proposal = self
                    .reconciler
                    .government_proposal(self.proposals.as_ref(), &event.contract_address, &r.prop_id, ts)
                    .await?;
                self.set(&proposal.name, proposal.value, ts).await?;
                proposal.accepted = true;
                proposal.expired = true;
                proposal.last_updated = proposal.last_updated.max(ts);
                self.proposals.update_government_parameter_proposal(&proposal).await?;
            }

            GovernmentEvent::ProposalFailed(r) => {
                let mut proposal = self
                    .reconciler
                    .government_proposal(self.proposals.as_ref(), &event.contract_address, &r.prop_id, ts)
                    .await?;
                proposal.expired = true;
                proposal.last_updated = proposal.last_updated.max(ts);
                self.proposals.update_government_parameter_proposal(&proposal).await?;
            }

            GovernmentEvent::ParameterSet(p) => self.set(&p.name, p.value, ts).await?,
        }

        Ok(true)
    }
}
