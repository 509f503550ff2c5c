//! Listing governance state machine and newsroom metadata.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::EventHandler;
use crate::error::{ProcessorError, Result};
use crate::events::decode::{NewsroomEvent, TcrEvent};
use crate::events::{Event, GovernanceEvent};
use crate::model::{Address, Amount, Charter, GovernanceState, Listing};
use crate::store::{ListingStore, ParameterStore};

/// Parameter holding the deposit a challenger must match.
pub const MIN_DEPOSIT: &str = "minDeposit";

/// Tokens a new challenge locks from `listing`: the current `minDeposit`
/// when known, else everything unstaked.
pub(crate) async fn challenge_stake(parameters: &dyn ParameterStore, listing: &Listing) -> Result<Amount> {
    let stake = match parameters.get_parameter(MIN_DEPOSIT).await? {
        Some(min_deposit) => min_deposit.value.min(listing.unstaked_deposit),
        None => listing.unstaked_deposit,
    };
    Ok(stake)
}

pub struct ListingHandler {
    listings: Arc<dyn ListingStore>,
    parameters: Arc<dyn ParameterStore>,
}

impl ListingHandler {
    pub fn new(listings: Arc<dyn ListingStore>, parameters: Arc<dyn ParameterStore>) -> Self {
        Self { listings, parameters }
    }

    async fn require(&self, address: &Address) -> Result<Listing> {
        self.listings
            .get_listing(address)
            .await?
            .ok_or_else(|| ProcessorError::not_found("Listing", address.as_str()))
    }

    /// Load the listing for a governance event, or `None` when the event is
    /// older than the last one applied.
    async fn governed(&self, address: &Address, timestamp: i64) -> Result<Option<Listing>> {
        let listing = self.require(address).await?;
        if listing.is_stale(timestamp) {
            debug!(
                listing = %address,
                timestamp,
                last_governance_update = listing.last_governance_update,
                "Skipping stale governance event"
            );
            return Ok(None);
        }
        Ok(Some(listing))
    }

    async fn transition(
        &self,
        address: &Address,
        state: GovernanceState,
        clear_challenge: bool,
        timestamp: i64,
    ) -> Result<()> {
        let Some(mut listing) = self.governed(address, timestamp).await? else {
            return Ok(());
        };
        listing.transition(state, timestamp);
        if clear_challenge {
            listing.challenge_id = None;
        }
        self.listings.update_listing(&listing).await
    }

    /// Deposits are skipped when stale too, so a replay that skips an old
    /// challenge deduction does not reapply the deposit totals around it.
    async fn set_deposit(&self, address: &Address, new_total: Amount, timestamp: i64) -> Result<()> {
        let Some(mut listing) = self.governed(address, timestamp).await? else {
            return Ok(());
        };
        listing.unstaked_deposit = new_total;
        listing.touch(timestamp);
        self.listings.update_listing(&listing).await
    }

    async fn tcr(&self, event: &Event, tcr: &TcrEvent) -> Result<bool> {
        let ts = event.timestamp;

        match tcr {
            TcrEvent::Application(app) => {
                match self.listings.get_listing(&app.listing_address).await? {
                    None => {
                        let listing = Listing::applied(
                            app.listing_address.clone(),
                            app.applicant.clone(),
                            app.deposit,
                            app.app_end_date,
                            app.data.clone(),
                            ts,
                        );
                        self.listings.create_listing(&listing).await?;
                    }
                    Some(listing) if listing.is_stale(ts) => {}
                    Some(mut listing) => {
                        let redelivered = listing.state == GovernanceState::Applied
                            && listing.application_date == Some(ts);
                        if !redelivered {
                            listing.reapply(app.deposit, app.app_end_date, app.data.clone(), ts);
                            listing.add_owner(app.applicant.clone());
                            self.listings.update_listing(&listing).await?;
                        }
                    }
                }
            }

            TcrEvent::Challenge(challenge) => {
                let Some(mut listing) = self.governed(&challenge.listing_address, ts).await? else {
                    return Ok(true);
                };
                if listing.challenge_id != Some(challenge.challenge_id) {
                    let stake = challenge_stake(self.parameters.as_ref(), &listing).await?;
                    listing.unstaked_deposit = listing.unstaked_deposit.saturating_sub(stake);
                    listing.challenge_id = Some(challenge.challenge_id);
                }
                listing.transition(GovernanceState::Challenged, ts);
                self.listings.update_listing(&listing).await?;
            }

            TcrEvent::Deposit(change) => {
                self.set_deposit(&change.listing_address, change.new_total, ts).await?
            }
            TcrEvent::Withdrawal(change) => {
                self.set_deposit(&change.listing_address, change.new_total, ts).await?
            }

            TcrEvent::ApplicationWhitelisted(r) => {
                self.transition(&r.listing_address, GovernanceState::AppWhitelisted, false, ts)
                    .await?
            }
            TcrEvent::ApplicationRemoved(r) => {
                self.transition(&r.listing_address, GovernanceState::AppRemoved, true, ts)
                    .await?
            }
            TcrEvent::ListingRemoved(r) | TcrEvent::TouchAndRemoved(r) => {
                self.transition(&r.listing_address, GovernanceState::Removed, true, ts)
                    .await?
            }
            TcrEvent::ListingWithdrawn(r) => {
                self.transition(&r.listing_address, GovernanceState::Withdrawn, true, ts)
                    .await?
            }

            TcrEvent::ChallengeFailed(resolution) => {
                self.transition(
                    &resolution.listing_address,
                    GovernanceState::AppWhitelisted,
                    true,
                    ts,
                )
                .await?
            }
            TcrEvent::ChallengeSucceeded(resolution) => {
                self.transition(&resolution.listing_address, GovernanceState::AppRemoved, true, ts)
                    .await?
            }

            _ => return Ok(false),
        }

        Ok(true)
    }

    async fn newsroom(&self, event: &Event, newsroom: &NewsroomEvent) -> Result<bool> {
        let ts = event.timestamp;
        let mut listing = self.require(&event.contract_address).await?;

        match newsroom {
            NewsroomEvent::NameChanged(change) => {
                listing.name = change.new_name.clone();
            }
            NewsroomEvent::OwnershipTransferred(transfer) => {
                listing.remove_owner(&transfer.previous_owner);
                listing.add_owner(transfer.new_owner.clone());
                listing.owner = Some(transfer.new_owner.clone());
            }
            NewsroomEvent::RevisionUpdated(revision) => {
                listing.add_contributor(revision.editor.clone());
                // Content 0 is the charter.
                if revision.content_id == 0 {
                    listing.charter = Some(Charter {
                        uri: revision.uri.clone(),
                        content_id: revision.content_id,
                        revision_id: revision.revision_id,
                        author: revision.editor.clone(),
                        timestamp: ts,
                    });
                }
            }
        }

        listing.touch(ts);
        self.listings.update_listing(&listing).await?;
        Ok(true)
    }
}

#[async_trait]
impl EventHandler for ListingHandler {
    fn name(&self) -> &'static str {
        "listing"
    }

    async fn handle(&self, event: &Event, decoded: &GovernanceEvent) -> Result<bool> {
        match decoded {
            GovernanceEvent::Tcr(tcr) => self.tcr(event, tcr).await,
            GovernanceEvent::Newsroom(newsroom) => self.newsroom(event, newsroom).await,
            _ => Ok(false),
        }
    }
}
