//! Parameterizer proposals and the live parameter values they set.
//!
//! Every resolution event goes through [`Reconciler`]: a proposal missing
//! from the store is rebuilt from chain state instead of failing the batch.
//!
//! The proposal and the parameter are written by two separate calls. A
//! failure between them leaves the proposal unresolved and the batch is
//! retried; both writes are upserts, so the retry converges.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::reconcile::{ProposalHint, Reconciler};
use super::EventHandler;
use crate::error::Result;
use crate::events::decode::ParameterizerEvent;
use crate::events::{Event, GovernanceEvent};
use crate::model::{Parameter, ParameterProposal, ProposalId};
use crate::store::{ParameterProposalStore, ParameterStore};

pub struct ParameterizerHandler {
    proposals: Arc<dyn ParameterProposalStore>,
    parameters: Arc<dyn ParameterStore>,
    reconciler: Reconciler,
    /// Seconds after `app_expiry` a failed challenge may still promote a value
    grace_period_secs: i64,
}

impl ParameterizerHandler {
    pub fn new(
        proposals: Arc<dyn ParameterProposalStore>,
        parameters: Arc<dyn ParameterStore>,
        reconciler: Reconciler,
        grace_period_secs: i64,
    ) -> Self {
        Self {
            proposals,
            parameters,
            reconciler,
            grace_period_secs,
        }
    }

    async fn load(
        &self,
        event: &Event,
        prop_id: &ProposalId,
        hint: Option<ProposalHint<'_>>,
    ) -> Result<ParameterProposal> {
        self.reconciler
            .parameter_proposal(
                self.proposals.as_ref(),
                &event.contract_address,
                prop_id,
                event.timestamp,
                hint,
            )
            .await
    }

    async fn promote(&self, proposal: &mut ParameterProposal, ts: i64) -> Result<()> {
        proposal.accepted = true;
        self.parameters
            .update_parameter(&Parameter {
                name: proposal.name.clone(),
                value: proposal.value,
                last_updated: ts,
            })
            .await?;
        info!(name = %proposal.name, value = %proposal.value, "Parameter updated");
        Ok(())
    }

    async fn save(&self, proposal: &mut ParameterProposal, ts: i64) -> Result<()> {
        proposal.last_updated = proposal.last_updated.max(ts);
        self.proposals.update_parameter_proposal(proposal).await
    }
}

#[async_trait]
impl EventHandler for ParameterizerHandler {
    fn name(&self) -> &'static str {
        "parameterizer"
    }

    async fn handle(&self, event: &Event, decoded: &GovernanceEvent) -> Result<bool> {
        let GovernanceEvent::Parameterizer(param) = decoded else {
            return Ok(false);
        };
        let ts = event.timestamp;

        match param {
            ParameterizerEvent::ReparameterizationProposal(p) => {
                if self.proposals.get_parameter_proposal(&p.prop_id).await?.is_some() {
                    debug!(prop_id = %p.prop_id, "Proposal already recorded");
                    return Ok(true);
                }
                let proposal = ParameterProposal {
                    prop_id: p.prop_id.clone(),
                    contract_address: event.contract_address.clone(),
                    name: p.name.clone(),
                    value: p.value,
                    deposit: p.deposit,
                    app_expiry: p.app_end_date,
                    challenge_id: 0,
                    proposer: p.proposer.clone(),
                    accepted: false,
                    expired: false,
                    last_updated: ts,
                };
                self.proposals.create_parameter_proposal(&proposal).await?;
            }

            ParameterizerEvent::NewChallenge(c) => {
                let mut proposal = self.load(event, &c.prop_id, None).await?;
                proposal.challenge_id = c.challenge_id;
                self.save(&mut proposal, ts).await?;
            }

            ParameterizerEvent::ProposalAccepted(accepted) => {
                let hint = accepted
                    .name
                    .as_deref()
                    .zip(accepted.value)
                    .map(|(name, value)| ProposalHint { name, value });
                let mut proposal = self.load(event, &accepted.prop_id, hint).await?;
                self.promote(&mut proposal, ts).await?;
                proposal.expired = true;
                self.save(&mut proposal, ts).await?;
            }

            ParameterizerEvent::ProposalExpired(expired) => {
                let mut proposal = self.load(event, &expired.prop_id, None).await?;
                proposal.expired = true;
                self.save(&mut proposal, ts).await?;
            }

            ParameterizerEvent::ChallengeFailed(r) => {
                let mut proposal = self.load(event, &r.prop_id, None).await?;
                if proposal.within_window(ts, self.grace_period_secs) {
                    self.promote(&mut proposal, ts).await?;
                } else {
                    debug!(prop_id = %r.prop_id, "Challenge failed after processing window");
                }
                proposal.expired = true;
                self.save(&mut proposal, ts).await?;
            }

            ParameterizerEvent::ChallengeSucceeded(r) => {
                let mut proposal = self.load(event, &r.prop_id, None).await?;
                proposal.expired = true;
                self.save(&mut proposal, ts).await?;
            }

            ParameterizerEvent::RewardClaimed(_) => return Ok(false),
        }

        Ok(true)
    }
}
