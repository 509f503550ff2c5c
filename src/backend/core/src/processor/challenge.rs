//! Challenges, their polls, and per-voter participation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::listing::challenge_stake;
use super::{expiry_after, EventHandler};
use crate::error::{ProcessorError, Result};
use crate::events::decode::{ParameterizerEvent, ProposalChallengeResolution, TcrEvent, VotingEvent};
use crate::events::{Event, GovernanceEvent};
use crate::model::{Address, Amount, Challenge, ChallengeKind, Poll, UserChallengeData};
use crate::store::{
    ChallengeStore, GovernmentParameterStore, ListingStore, ParameterProposalStore,
    ParameterStore, PollStore, UserChallengeDataStore,
};

/// Government parameter: seconds after resolution during which an appeal
/// may be requested.
pub const REQUEST_APPEAL_LEN: &str = "requestAppealLen";

pub struct ChallengeHandler {
    challenges: Arc<dyn ChallengeStore>,
    polls: Arc<dyn PollStore>,
    votes: Arc<dyn UserChallengeDataStore>,
    listings: Arc<dyn ListingStore>,
    parameters: Arc<dyn ParameterStore>,
    proposals: Arc<dyn ParameterProposalStore>,
    government_parameters: Arc<dyn GovernmentParameterStore>,
}

impl ChallengeHandler {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: ChallengeStore
            + PollStore
            + UserChallengeDataStore
            + ListingStore
            + ParameterStore
            + ParameterProposalStore
            + GovernmentParameterStore
            + 'static,
    {
        Self {
            challenges: store.clone(),
            polls: store.clone(),
            votes: store.clone(),
            listings: store.clone(),
            parameters: store.clone(),
            proposals: store.clone(),
            government_parameters: store,
        }
    }

    async fn require_challenge(&self, challenge_id: u64) -> Result<Challenge> {
        self.challenges
            .get_challenge(challenge_id)
            .await?
            .ok_or_else(|| ProcessorError::not_found("Challenge", challenge_id.to_string()))
    }

    async fn require_vote(&self, poll_id: u64, voter: &Address) -> Result<UserChallengeData> {
        self.votes
            .get_user_challenge_data(poll_id, voter)
            .await?
            .ok_or_else(|| {
                ProcessorError::not_found("UserChallengeData", format!("{}/{}", poll_id, voter))
            })
    }

    /// Create the poll, or fill in dates on one `PollCreated` already made.
    async fn ensure_poll(&self, poll_id: u64, commit_end: i64, reveal_end: i64, ts: i64) -> Result<()> {
        match self.polls.get_poll(poll_id).await? {
            Some(mut poll) => {
                if commit_end != 0 {
                    poll.commit_end_date = commit_end;
                }
                if reveal_end != 0 {
                    poll.reveal_end_date = reveal_end;
                }
                poll.last_updated = poll.last_updated.max(ts);
                self.polls.update_poll(&poll).await
            }
            None => {
                self.polls
                    .create_poll(&Poll::new(poll_id, commit_end, reveal_end, ts))
                    .await
            }
        }
    }

    /// Create a challenge and its poll. A challenge already present is left alone.
    async fn open(&self, challenge: Challenge, commit_end: i64, reveal_end: i64) -> Result<()> {
        if self.challenges.get_challenge(challenge.challenge_id).await?.is_some() {
            debug!(challenge_id = challenge.challenge_id, "Challenge already recorded");
            return Ok(());
        }
        self.challenges.create_challenge(&challenge).await?;
        self.ensure_poll(challenge.poll_id, commit_end, reveal_end, challenge.created_at)
            .await
    }

    /// Resolve a challenge once. `passed` is the poll outcome: `true` when
    /// the challenge failed.
    async fn resolve(
        &self,
        challenge_id: u64,
        passed: bool,
        reward_pool: Amount,
        total_tokens: Amount,
        ts: i64,
    ) -> Result<()> {
        let mut challenge = self.require_challenge(challenge_id).await?;
        if challenge.resolved {
            debug!(challenge_id, "Challenge already resolved");
            return Ok(());
        }

        challenge.resolve(reward_pool, total_tokens, ts);
        if challenge.kind == ChallengeKind::Listing {
            if let Some(len) = self
                .government_parameters
                .get_government_parameter(REQUEST_APPEAL_LEN)
                .await?
            {
                challenge.request_appeal_expiry = expiry_after(ts, len.value);
            }
        }
        self.challenges.update_challenge(&challenge).await?;

        match self.polls.get_poll(challenge.poll_id).await? {
            Some(mut poll) => {
                poll.is_passed = Some(passed);
                poll.last_updated = poll.last_updated.max(ts);
                self.polls.update_poll(&poll).await?;
            }
            None => {
                let mut poll = Poll::new(challenge.poll_id, 0, 0, ts);
                poll.is_passed = Some(passed);
                self.polls.create_poll(&poll).await?;
            }
        }

        for mut vote in self.votes.user_challenge_data_for_poll(challenge.poll_id).await? {
            if vote.user_did_reveal {
                vote.resolve(passed, ts);
                self.votes.update_user_challenge_data(&vote).await?;
            }
        }

        debug!(challenge_id, passed, "Resolved challenge");
        Ok(())
    }

    /// Record a proposal challenge whose `NewChallenge` was never applied,
    /// using what its resolution carries. The proposal itself is reconciled
    /// by the parameterizer handler.
    async fn recover_proposal_challenge(
        &self,
        event: &Event,
        resolution: &ProposalChallengeResolution,
    ) -> Result<()> {
        if self.challenges.get_challenge(resolution.challenge_id).await?.is_some() {
            return Ok(());
        }
        let stake = self
            .proposals
            .get_parameter_proposal(&resolution.prop_id)
            .await?
            .map_or(0, |p| p.deposit);
        debug!(
            challenge_id = resolution.challenge_id,
            prop_id = %resolution.prop_id,
            "Recording proposal challenge from its resolution"
        );
        let challenge = new_challenge(
            resolution.challenge_id,
            ChallengeKind::Parameterizer,
            event.contract_address.clone(),
            String::new(),
            Address::zero(),
            stake,
            event.timestamp,
        );
        self.open(challenge, 0, 0).await
    }

    async fn reward_claimed(&self, challenge_id: u64, voter: &Address, reward: Amount, ts: i64) -> Result<()> {
        let mut vote = self.require_vote(challenge_id, voter).await?;
        vote.did_user_collect = true;
        vote.did_collect_amount = reward;
        vote.last_updated = vote.last_updated.max(ts);
        self.votes.update_user_challenge_data(&vote).await
    }

    async fn tcr(&self, event: &Event, tcr: &TcrEvent) -> Result<bool> {
        let ts = event.timestamp;

        match tcr {
            TcrEvent::Challenge(c) => {
                let listing = self
                    .listings
                    .get_listing(&c.listing_address)
                    .await?
                    .ok_or_else(|| ProcessorError::not_found("Listing", c.listing_address.as_str()))?;
                let stake = challenge_stake(self.parameters.as_ref(), &listing).await?;
                let challenge = new_challenge(
                    c.challenge_id,
                    ChallengeKind::Listing,
                    c.listing_address.clone(),
                    c.data.clone(),
                    c.challenger.clone(),
                    stake,
                    ts,
                );
                self.open(challenge, c.commit_end_date, c.reveal_end_date).await?;
            }
            TcrEvent::ChallengeFailed(r) => {
                self.resolve(r.challenge_id, true, r.reward_pool, r.total_tokens, ts)
                    .await?
            }
            TcrEvent::ChallengeSucceeded(r) => {
                self.resolve(r.challenge_id, false, r.reward_pool, r.total_tokens, ts)
                    .await?
            }
            TcrEvent::RewardClaimed(claim) => {
                self.reward_claimed(claim.challenge_id, &claim.voter, claim.reward, ts)
                    .await?
            }
            TcrEvent::AppealRequested(request) => {
                let mut challenge = self.require_challenge(request.challenge_id).await?;
                if challenge.appeal_id.is_none() {
                    challenge.appeal_id = Some(request.challenge_id);
                    challenge.last_updated = challenge.last_updated.max(ts);
                    self.challenges.update_challenge(&challenge).await?;
                }
            }
            TcrEvent::GrantedAppealChallenged(g) => {
                let mut challenge = new_challenge(
                    g.appeal_challenge_id,
                    ChallengeKind::Appeal,
                    g.listing_address.clone(),
                    g.data.clone(),
                    Address::zero(),
                    0,
                    ts,
                );
                challenge.appeal_of = Some(g.challenge_id);
                self.open(challenge, 0, 0).await?;
            }
            TcrEvent::GrantedAppealOverturned(r) => {
                self.resolve(r.appeal_challenge_id, false, r.reward_pool, r.total_tokens, ts)
                    .await?
            }
            TcrEvent::GrantedAppealConfirmed(r) => {
                self.resolve(r.appeal_challenge_id, true, r.reward_pool, r.total_tokens, ts)
                    .await?
            }
            _ => return Ok(false),
        }

        Ok(true)
    }

    async fn parameterizer(&self, event: &Event, param: &ParameterizerEvent) -> Result<bool> {
        let ts = event.timestamp;

        match param {
            ParameterizerEvent::NewChallenge(c) => {
                let stake = self
                    .proposals
                    .get_parameter_proposal(&c.prop_id)
                    .await?
                    .map_or(0, |p| p.deposit);
                let challenge = new_challenge(
                    c.challenge_id,
                    ChallengeKind::Parameterizer,
                    event.contract_address.clone(),
                    String::new(),
                    c.challenger.clone(),
                    stake,
                    ts,
                );
                self.open(challenge, c.commit_end_date, c.reveal_end_date).await?;
            }
            ParameterizerEvent::ChallengeFailed(r) => {
                self.recover_proposal_challenge(event, r).await?;
                self.resolve(r.challenge_id, true, r.reward_pool, r.total_tokens, ts)
                    .await?
            }
            ParameterizerEvent::ChallengeSucceeded(r) => {
                self.recover_proposal_challenge(event, r).await?;
                self.resolve(r.challenge_id, false, r.reward_pool, r.total_tokens, ts)
                    .await?
            }
            ParameterizerEvent::RewardClaimed(claim) => {
                self.reward_claimed(claim.challenge_id, &claim.voter, claim.reward, ts)
                    .await?
            }
            _ => return Ok(false),
        }

        Ok(true)
    }

    async fn voting(&self, event: &Event, voting: &VotingEvent) -> Result<bool> {
        let ts = event.timestamp;

        match voting {
            VotingEvent::PollCreated(created) => match self.polls.get_poll(created.poll_id).await? {
                Some(mut poll) => {
                    poll.vote_quorum = created.vote_quorum;
                    poll.commit_end_date = created.commit_end_date;
                    poll.reveal_end_date = created.reveal_end_date;
                    poll.last_updated = poll.last_updated.max(ts);
                    self.polls.update_poll(&poll).await?;
                }
                None => {
                    let mut poll = Poll::new(
                        created.poll_id,
                        created.commit_end_date,
                        created.reveal_end_date,
                        ts,
                    );
                    poll.vote_quorum = created.vote_quorum;
                    self.polls.create_poll(&poll).await?;
                }
            },

            VotingEvent::VoteCommitted(commit) => {
                match self.votes.get_user_challenge_data(commit.poll_id, &commit.voter).await? {
                    Some(mut vote) => {
                        vote.num_tokens = commit.num_tokens;
                        vote.user_did_commit = true;
                        vote.last_updated = vote.last_updated.max(ts);
                        self.votes.update_user_challenge_data(&vote).await?;
                    }
                    None => {
                        let vote = UserChallengeData::committed(
                            commit.poll_id,
                            commit.voter.clone(),
                            commit.num_tokens,
                            ts,
                        );
                        self.votes.create_user_challenge_data(&vote).await?;
                    }
                }
            }

            VotingEvent::VoteRevealed(reveal) => {
                let mut poll = self
                    .polls
                    .get_poll(reveal.poll_id)
                    .await?
                    .ok_or_else(|| ProcessorError::not_found("Poll", reveal.poll_id.to_string()))?;

                let existing = self
                    .votes
                    .get_user_challenge_data(reveal.poll_id, &reveal.voter)
                    .await?;
                let is_new = existing.is_none();
                let mut vote = existing.unwrap_or_else(|| {
                    UserChallengeData::committed(reveal.poll_id, reveal.voter.clone(), reveal.num_tokens, ts)
                });
                let already_revealed = vote.user_did_reveal;

                vote.user_did_reveal = true;
                vote.num_tokens = reveal.num_tokens;
                vote.choice = Some(reveal.choice);
                vote.salt = reveal.salt.clone();
                vote.last_updated = vote.last_updated.max(ts);
                if let Some(passed) = poll.is_passed {
                    vote.resolve(passed, ts);
                }

                match (reveal.votes_for, reveal.votes_against) {
                    (Some(votes_for), Some(votes_against)) => {
                        poll.votes_for = votes_for;
                        poll.votes_against = votes_against;
                    }
                    _ if !already_revealed => {
                        if reveal.choice == 1 {
                            poll.votes_for = poll.votes_for.saturating_add(reveal.num_tokens);
                        } else {
                            poll.votes_against = poll.votes_against.saturating_add(reveal.num_tokens);
                        }
                    }
                    _ => {}
                }
                poll.last_updated = poll.last_updated.max(ts);

                if is_new {
                    self.votes.create_user_challenge_data(&vote).await?;
                } else {
                    self.votes.update_user_challenge_data(&vote).await?;
                }
                self.polls.update_poll(&poll).await?;
            }

            VotingEvent::TokensRescued(rescue) => {
                let mut vote = self.require_vote(rescue.poll_id, &rescue.voter).await?;
                vote.did_user_rescue = true;
                vote.last_updated = vote.last_updated.max(ts);
                self.votes.update_user_challenge_data(&vote).await?;
            }
        }

        Ok(true)
    }
}

fn new_challenge(
    challenge_id: u64,
    kind: ChallengeKind,
    listing_address: Address,
    statement: String,
    challenger: Address,
    stake: Amount,
    ts: i64,
) -> Challenge {
    Challenge {
        challenge_id,
        kind,
        listing_address,
        statement,
        reward_pool: 0,
        challenger,
        resolved: false,
        stake,
        total_tokens: 0,
        request_appeal_expiry: 0,
        poll_id: challenge_id,
        appeal_of: None,
        appeal_id: None,
        created_at: ts,
        last_updated: ts,
    }
}

#[async_trait]
impl EventHandler for ChallengeHandler {
    fn name(&self) -> &'static str {
        "challenge"
    }

    async fn handle(&self, event: &Event, decoded: &GovernanceEvent) -> Result<bool> {
        match decoded {
            GovernanceEvent::Tcr(tcr) => self.tcr(event, tcr).await,
            GovernanceEvent::Parameterizer(param) => self.parameterizer(event, param).await,
            GovernanceEvent::Voting(voting) => self.voting(event, voting).await,
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::decode::{CIVIL_TCR, PARAMETERIZER, PLCR_VOTING};
    use crate::model::{GovernmentParameter, Listing};
    use crate::processor::test_support::{addr, event};
    use crate::store::InMemoryStore;
    use serde_json::json;

    async fn apply(handler: &ChallengeHandler, event: Event) -> Result<bool> {
        let decoded = GovernanceEvent::decode(&event)?.expect("known event");
        handler.handle(&event, &decoded).await
    }

    async fn seeded() -> (Arc<InMemoryStore>, ChallengeHandler) {
        let store = Arc::new(InMemoryStore::new());
        let listing = Listing::applied(addr(1), addr(2), 1000, 500, String::new(), 100);
        store.create_listing(&listing).await.unwrap();
        let handler = ChallengeHandler::new(store.clone());
        (store, handler)
    }

    fn challenge(id: u64, ts: i64) -> Event {
        event(
            CIVIL_TCR,
            "Challenge",
            addr(900),
            json!({
                "ListingAddress": addr(1).as_str(),
                "ChallengeID": id,
                "Data": "ipfs://statement",
                "CommitEndDate": ts + 100,
                "RevealEndDate": ts + 200,
                "Challenger": addr(3).as_str(),
            }),
            ts,
            0,
        )
    }

    fn resolution(event_type: &str, id: u64, ts: i64) -> Event {
        event(
            CIVIL_TCR,
            event_type,
            addr(900),
            json!({
                "ListingAddress": addr(1).as_str(),
                "ChallengeID": id,
                "RewardPool": "250",
                "TotalTokens": "900",
            }),
            ts,
            0,
        )
    }

    fn voting(event_type: &str, payload: serde_json::Value, ts: i64) -> Event {
        event(PLCR_VOTING, event_type, addr(901), payload, ts, 0)
    }

    #[tokio::test]
    async fn test_challenge_creates_challenge_and_poll() {
        let (store, handler) = seeded().await;
        apply(&handler, challenge(120, 200)).await.unwrap();

        let c = store.get_challenge(120).await.unwrap().unwrap();
        assert_eq!(c.kind, ChallengeKind::Listing);
        assert_eq!(c.stake, 1000);
        assert_eq!(c.statement, "ipfs://statement");
        assert!(!c.resolved);

        let poll = store.get_poll(120).await.unwrap().unwrap();
        assert_eq!((poll.commit_end_date, poll.reveal_end_date), (300, 400));
        assert_eq!(poll.is_passed, None);
    }

    #[tokio::test]
    async fn test_failed_challenge_passes_poll_and_stamps_voters() {
        let (store, handler) = seeded().await;
        store
            .update_government_parameter(&GovernmentParameter {
                name: REQUEST_APPEAL_LEN.into(),
                value: 50,
                last_updated: 0,
            })
            .await
            .unwrap();
        apply(&handler, challenge(120, 200)).await.unwrap();

        for (voter, choice) in [(10, 1), (11, 0)] {
            apply(
                &handler,
                voting(
                    "VoteCommitted",
                    json!({ "PollID": 120, "NumTokens": 100, "Voter": addr(voter).as_str() }),
                    250,
                ),
            )
            .await
            .unwrap();
            apply(
                &handler,
                voting(
                    "VoteRevealed",
                    json!({
                        "PollID": 120,
                        "NumTokens": 100,
                        "Choice": choice,
                        "Voter": addr(voter).as_str(),
                        "Salt": "42",
                    }),
                    350,
                ),
            )
            .await
            .unwrap();
        }

        apply(&handler, resolution("ChallengeFailed", 120, 500)).await.unwrap();

        let c = store.get_challenge(120).await.unwrap().unwrap();
        assert!(c.resolved);
        assert_eq!(c.reward_pool, 250);
        assert_eq!(c.request_appeal_expiry, 550);

        let poll = store.get_poll(120).await.unwrap().unwrap();
        assert_eq!(poll.is_passed, Some(true));
        assert_eq!((poll.votes_for, poll.votes_against), (100, 100));

        let winner = store.get_user_challenge_data(120, &addr(10)).await.unwrap().unwrap();
        let loser = store.get_user_challenge_data(120, &addr(11)).await.unwrap().unwrap();
        assert_eq!(winner.is_voter_winner, Some(true));
        assert_eq!(loser.is_voter_winner, Some(false));
        assert_eq!(winner.salt.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_resolution_is_single_shot() {
        let (store, handler) = seeded().await;
        apply(&handler, challenge(120, 200)).await.unwrap();
        apply(&handler, resolution("ChallengeSucceeded", 120, 500)).await.unwrap();
        apply(&handler, resolution("ChallengeFailed", 120, 600)).await.unwrap();

        let poll = store.get_poll(120).await.unwrap().unwrap();
        assert_eq!(poll.is_passed, Some(false));
        assert_eq!(store.get_challenge(120).await.unwrap().unwrap().last_updated, 500);
    }

    #[tokio::test]
    async fn test_unknown_challenge_resolution_is_not_found() {
        let (_store, handler) = seeded().await;
        let err = apply(&handler, resolution("ChallengeFailed", 7, 500)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RecordNotFound);
    }

    #[tokio::test]
    async fn test_poll_created_before_challenge_keeps_quorum() {
        let (store, handler) = seeded().await;
        apply(
            &handler,
            voting(
                "PollCreated",
                json!({
                    "VoteQuorum": 50,
                    "CommitEndDate": 300,
                    "RevealEndDate": 400,
                    "PollID": 120,
                    "Creator": addr(900).as_str(),
                }),
                200,
            ),
        )
        .await
        .unwrap();
        apply(&handler, challenge(120, 200)).await.unwrap();

        let poll = store.get_poll(120).await.unwrap().unwrap();
        assert_eq!(poll.vote_quorum, 50);
        assert_eq!(poll.reveal_end_date, 400);
    }

    #[tokio::test]
    async fn test_reveal_is_counted_once() {
        let (store, handler) = seeded().await;
        apply(&handler, challenge(120, 200)).await.unwrap();
        let reveal = voting(
            "VoteRevealed",
            json!({ "PollID": 120, "NumTokens": 30, "Choice": 0, "Voter": addr(12).as_str() }),
            350,
        );
        apply(&handler, reveal.clone()).await.unwrap();
        apply(&handler, reveal).await.unwrap();

        let poll = store.get_poll(120).await.unwrap().unwrap();
        assert_eq!(poll.votes_against, 30);
        assert_eq!(poll.votes_for, 0);
    }

    #[tokio::test]
    async fn test_reward_and_rescue_need_participation() {
        let (store, handler) = seeded().await;
        apply(&handler, challenge(120, 200)).await.unwrap();

        let rescue = voting("TokensRescued", json!({ "PollID": 120, "Voter": addr(10).as_str() }), 600);
        let err = apply(&handler, rescue.clone()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RecordNotFound);

        apply(
            &handler,
            voting(
                "VoteCommitted",
                json!({ "PollID": 120, "NumTokens": 5, "Voter": addr(10).as_str() }),
                250,
            ),
        )
        .await
        .unwrap();
        apply(&handler, rescue).await.unwrap();
        let claim = event(
            CIVIL_TCR,
            "RewardClaimed",
            addr(900),
            json!({ "ChallengeID": 120, "Reward": 77, "Voter": addr(10).as_str() }),
            700,
            0,
        );
        apply(&handler, claim).await.unwrap();

        let vote = store.get_user_challenge_data(120, &addr(10)).await.unwrap().unwrap();
        assert!(vote.did_user_rescue);
        assert!(vote.did_user_collect);
        assert_eq!(vote.did_collect_amount, 77);
    }

    #[tokio::test]
    async fn test_proposal_challenge_resolution_without_new_challenge() {
        let (store, handler) = seeded().await;
        let resolved = event(
            PARAMETERIZER,
            "ChallengeSucceeded",
            addr(800),
            json!({
                "PropID": format!("0x{:064x}", 7),
                "ChallengeID": 77,
                "RewardPool": "10",
                "TotalTokens": "40",
            }),
            1_500,
            0,
        );

        assert!(apply(&handler, resolved.clone()).await.unwrap());
        let challenge = store.get_challenge(77).await.unwrap().unwrap();
        assert!(challenge.resolved);
        assert_eq!(challenge.kind, ChallengeKind::Parameterizer);
        assert_eq!(challenge.total_tokens, 40);
        assert_eq!(store.get_poll(77).await.unwrap().unwrap().is_passed, Some(false));

        // Redelivery finds the recovered challenge already resolved.
        assert!(apply(&handler, resolved).await.unwrap());
        assert_eq!(store.get_challenge(77).await.unwrap().unwrap(), challenge);
    }
}
