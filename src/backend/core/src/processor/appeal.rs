//! Appeals against resolved challenges.
//!
//! Appeal challenges themselves (their Challenge and Poll records) belong to
//! [`super::ChallengeHandler`]; this handler tracks the Appeal record.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{expiry_after, EventHandler};
use crate::error::{ProcessorError, Result};
use crate::events::decode::TcrEvent;
use crate::events::{Event, GovernanceEvent};
use crate::model::Appeal;
use crate::store::{AppealStore, GovernmentParameterStore};

/// Government parameter: seconds the judge has to grant an appeal.
pub const JUDGE_APPEAL_LEN: &str = "judgeAppealLen";
/// Government parameter: seconds a granted appeal is open to challenge.
pub const CHALLENGE_APPEAL_LEN: &str = "challengeAppealLen";

pub struct AppealHandler {
    appeals: Arc<dyn AppealStore>,
    government_parameters: Arc<dyn GovernmentParameterStore>,
}

impl AppealHandler {
    pub fn new(
        appeals: Arc<dyn AppealStore>,
        government_parameters: Arc<dyn GovernmentParameterStore>,
    ) -> Self {
        Self {
            appeals,
            government_parameters,
        }
    }

    async fn require(&self, challenge_id: u64) -> Result<Appeal> {
        self.appeals
            .get_appeal(challenge_id)
            .await?
            .ok_or_else(|| ProcessorError::not_found("Appeal", challenge_id.to_string()))
    }

    async fn expiry(&self, name: &str, ts: i64) -> Result<i64> {
        Ok(self
            .government_parameters
            .get_government_parameter(name)
            .await?
            .map_or(0, |p| expiry_after(ts, p.value)))
    }
}

#[async_trait]
impl EventHandler for AppealHandler {
    fn name(&self) -> &'static str {
        "appeal"
    }

    async fn handle(&self, event: &Event, decoded: &GovernanceEvent) -> Result<bool> {
        let GovernanceEvent::Tcr(tcr) = decoded else {
            return Ok(false);
        };
        let ts = event.timestamp;

        match tcr {
            TcrEvent::AppealRequested(request) => {
                if self.appeals.get_appeal(request.challenge_id).await?.is_some() {
                    debug!(challenge_id = request.challenge_id, "Appeal already recorded");
                    return Ok(true);
                }
                let appeal = Appeal {
                    original_challenge_id: request.challenge_id,
                    requester: request.requester.clone(),
                    appeal_fee_paid: request.appeal_fee_paid,
                    appeal_phase_expiry: self.expiry(JUDGE_APPEAL_LEN, ts).await?,
                    appeal_granted: false,
                    appeal_granted_statement_uri: String::new(),
                    appeal_open_to_challenge_expiry: 0,
                    statement: request.data.clone(),
                    appeal_challenge_id: None,
                    overturned: false,
                    last_updated: ts,
                };
                self.appeals.create_appeal(&appeal).await?;
            }

            TcrEvent::AppealGranted(granted) => {
                let mut appeal = self.require(granted.challenge_id).await?;
                if !appeal.appeal_granted {
                    appeal.appeal_granted = true;
                    appeal.appeal_granted_statement_uri = granted.data.clone();
                    appeal.appeal_open_to_challenge_expiry =
                        self.expiry(CHALLENGE_APPEAL_LEN, ts).await?;
                    appeal.last_updated = appeal.last_updated.max(ts);
                    self.appeals.update_appeal(&appeal).await?;
                }
            }

            TcrEvent::GrantedAppealChallenged(challenged) => {
                let mut appeal = self.require(challenged.challenge_id).await?;
                appeal.appeal_challenge_id = Some(challenged.appeal_challenge_id);
                appeal.last_updated = appeal.last_updated.max(ts);
                self.appeals.update_appeal(&appeal).await?;
            }

            TcrEvent::FailedChallengeOverturned(r) | TcrEvent::SuccessfulChallengeOverturned(r) => {
                let mut appeal = self.require(r.challenge_id).await?;
                appeal.overturned = true;
                appeal.last_updated = appeal.last_updated.max(ts);
                self.appeals.update_appeal(&appeal).await?;
            }

            _ => return Ok(false),
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::decode::CIVIL_TCR;
    use crate::model::GovernmentParameter;
    use crate::processor::test_support::{addr, event};
    use crate::store::InMemoryStore;
    use serde_json::json;

    async fn apply(handler: &AppealHandler, event: Event) -> Result<bool> {
        let decoded = GovernanceEvent::decode(&event)?.expect("known event");
        handler.handle(&event, &decoded).await
    }

    fn tcr(event_type: &str, payload: serde_json::Value, ts: i64) -> Event {
        event(CIVIL_TCR, event_type, addr(900), payload, ts, 0)
    }

    fn request(ts: i64) -> Event {
        tcr(
            "AppealRequested",
            json!({
                "ListingAddress": addr(1).as_str(),
                "ChallengeID": 120,
                "AppealFeePaid": "5000",
                "Requester": addr(4).as_str(),
                "Data": "please",
            }),
            ts,
        )
    }

    #[tokio::test]
    async fn test_appeal_lifecycle() {
        let store = Arc::new(InMemoryStore::new());
        for (name, value) in [(JUDGE_APPEAL_LEN, 100), (CHALLENGE_APPEAL_LEN, 200)] {
            store
                .update_government_parameter(&GovernmentParameter {
                    name: name.into(),
                    value,
                    last_updated: 0,
                })
                .await
                .unwrap();
        }
        let handler = AppealHandler::new(store.clone(), store.clone());

        apply(&handler, request(1_000)).await.unwrap();
        apply(&handler, request(1_000)).await.unwrap();
        apply(
            &handler,
            tcr(
                "AppealGranted",
                json!({ "ListingAddress": addr(1).as_str(), "ChallengeID": 120, "Data": "ipfs://ruling" }),
                1_050,
            ),
        )
        .await
        .unwrap();
        apply(
            &handler,
            tcr(
                "GrantedAppealChallenged",
                json!({
                    "ListingAddress": addr(1).as_str(),
                    "ChallengeID": 120,
                    "AppealChallengeID": 130,
                    "Data": "",
                }),
                1_100,
            ),
        )
        .await
        .unwrap();
        apply(
            &handler,
            tcr(
                "SuccessfulChallengeOverturned",
                json!({ "ListingAddress": addr(1).as_str(), "ChallengeID": 120 }),
                1_500,
            ),
        )
        .await
        .unwrap();

        let appeal = store.get_appeal(120).await.unwrap().unwrap();
        assert_eq!(appeal.appeal_fee_paid, 5000);
        assert_eq!(appeal.appeal_phase_expiry, 1_100);
        assert!(appeal.appeal_granted);
        assert_eq!(appeal.appeal_granted_statement_uri, "ipfs://ruling");
        assert_eq!(appeal.appeal_open_to_challenge_expiry, 1_250);
        assert_eq!(appeal.appeal_challenge_id, Some(130));
        assert!(appeal.overturned);
        assert_eq!(appeal.last_updated, 1_500);
    }

    #[tokio::test]
    async fn test_grant_without_request_is_not_found() {
        let store = Arc::new(InMemoryStore::new());
        let handler = AppealHandler::new(store.clone(), store.clone());
        let err = apply(
            &handler,
            tcr(
                "AppealGranted",
                json!({ "ListingAddress": addr(1).as_str(), "ChallengeID": 9 }),
                1_050,
            ),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RecordNotFound);
    }
}
