//! PostgreSQL implementation of the storage ports.
//!
//! Aggregates live in one table each as a JSONB `doc` column next to their
//! identity columns. Documents are read back through `doc::text` so that
//! 256-bit token amounts survive without a float round trip.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use tracing::{debug, instrument, warn};

use super::{
    AppealStore, ChallengeStore, EventSource, GovernmentParameterProposalStore,
    GovernmentParameterStore, ListingStore, MultiSigStore, ParameterProposalStore, ParameterStore,
    PollStore, TokenTransferStore, UserChallengeDataStore, WatermarkStore,
};
use crate::config::DatabaseConfig;
use crate::error::{ProcessorError, Result};
use crate::events::Event;
use crate::model::{
    Address, Appeal, Challenge, GovernmentParameter, GovernmentParameterProposal, Listing,
    MultiSig, Parameter, ParameterProposal, Poll, ProposalId, TokenTransfer, UserChallengeData,
};
use crate::telemetry::DispatchMetrics;

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn encode<T: Serialize>(doc: &T) -> Result<String> {
    Ok(serde_json::to_string(doc)?)
}

fn decode<T: DeserializeOwned>(text: Option<String>) -> Result<Option<T>> {
    text.map(|t| serde_json::from_str(&t).map_err(ProcessorError::from))
        .transpose()
}

fn decode_all<T: DeserializeOwned>(rows: Vec<String>) -> Result<Vec<T>> {
    rows.iter()
        .map(|t| serde_json::from_str(t).map_err(ProcessorError::from))
        .collect()
}

fn expect_one(rows_affected: u64, entity: &str, id: impl Into<String>) -> Result<()> {
    if rows_affected == 0 {
        return Err(ProcessorError::not_found(entity, id));
    }
    Ok(())
}

impl PgStore {
    /// Open a bounded connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Listings, challenges, polls, appeals
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ListingStore for PgStore {
    async fn get_listing(&self, address: &Address) -> Result<Option<Listing>> {
        let doc = sqlx::query_scalar::<_, String>("SELECT doc::text FROM listings WHERE address = $1")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;
        decode(doc)
    }

    async fn create_listing(&self, listing: &Listing) -> Result<()> {
        sqlx::query("INSERT INTO listings (address, whitelisted, doc) VALUES ($1, $2, $3::jsonb)")
            .bind(listing.contract_address.as_str())
            .bind(listing.whitelisted)
            .bind(encode(listing)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_listing(&self, listing: &Listing) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE listings
            SET whitelisted = $2, doc = $3::jsonb, updated_at = NOW()
            WHERE address = $1
            "#,
        )
        .bind(listing.contract_address.as_str())
        .bind(listing.whitelisted)
        .bind(encode(listing)?)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "listing", listing.contract_address.as_str())
    }

    async fn listings(&self, whitelisted_only: bool) -> Result<Vec<Listing>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT doc::text FROM listings WHERE ($1 = FALSE OR whitelisted) ORDER BY address",
        )
        .bind(whitelisted_only)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }
}

#[async_trait]
impl ChallengeStore for PgStore {
    async fn get_challenge(&self, challenge_id: u64) -> Result<Option<Challenge>> {
        let doc = sqlx::query_scalar::<_, String>("SELECT doc::text FROM challenges WHERE challenge_id = $1")
            .bind(challenge_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        decode(doc)
    }

    async fn create_challenge(&self, challenge: &Challenge) -> Result<()> {
        sqlx::query("INSERT INTO challenges (challenge_id, listing_address, doc) VALUES ($1, $2, $3::jsonb)")
            .bind(challenge.challenge_id as i64)
            .bind(challenge.listing_address.as_str())
            .bind(encode(challenge)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_challenge(&self, challenge: &Challenge) -> Result<()> {
        let result = sqlx::query(
            "UPDATE challenges SET doc = $2::jsonb, updated_at = NOW() WHERE challenge_id = $1",
        )
        .bind(challenge.challenge_id as i64)
        .bind(encode(challenge)?)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "challenge", challenge.challenge_id.to_string())
    }

    async fn challenges_for_listing(&self, address: &Address) -> Result<Vec<Challenge>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT doc::text FROM challenges WHERE listing_address = $1 ORDER BY challenge_id",
        )
        .bind(address.as_str())
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }
}

#[async_trait]
impl PollStore for PgStore {
    async fn get_poll(&self, poll_id: u64) -> Result<Option<Poll>> {
        let doc = sqlx::query_scalar::<_, String>("SELECT doc::text FROM polls WHERE poll_id = $1")
            .bind(poll_id as i64)
            .fetch_optional(&self.pool)
            .await?;
        decode(doc)
    }

    async fn create_poll(&self, poll: &Poll) -> Result<()> {
        sqlx::query("INSERT INTO polls (poll_id, doc) VALUES ($1, $2::jsonb)")
            .bind(poll.poll_id as i64)
            .bind(encode(poll)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_poll(&self, poll: &Poll) -> Result<()> {
        let result = sqlx::query("UPDATE polls SET doc = $2::jsonb, updated_at = NOW() WHERE poll_id = $1")
            .bind(poll.poll_id as i64)
            .bind(encode(poll)?)
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), "poll", poll.poll_id.to_string())
    }
}

#[async_trait]
impl AppealStore for PgStore {
    async fn get_appeal(&self, original_challenge_id: u64) -> Result<Option<Appeal>> {
        let doc = sqlx::query_scalar::<_, String>(
            "SELECT doc::text FROM appeals WHERE original_challenge_id = $1",
        )
        .bind(original_challenge_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        decode(doc)
    }

    async fn create_appeal(&self, appeal: &Appeal) -> Result<()> {
        sqlx::query("INSERT INTO appeals (original_challenge_id, doc) VALUES ($1, $2::jsonb)")
            .bind(appeal.original_challenge_id as i64)
            .bind(encode(appeal)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_appeal(&self, appeal: &Appeal) -> Result<()> {
        let result = sqlx::query(
            "UPDATE appeals SET doc = $2::jsonb, updated_at = NOW() WHERE original_challenge_id = $1",
        )
        .bind(appeal.original_challenge_id as i64)
        .bind(encode(appeal)?)
        .execute(&self.pool)
        .await?;
        expect_one(result.rows_affected(), "appeal", appeal.original_challenge_id.to_string())
    }
}

#[async_trait]
impl UserChallengeDataStore for PgStore {
    async fn get_user_challenge_data(
        &self,
        poll_id: u64,
        user: &Address,
    ) -> Result<Option<UserChallengeData>> {
        let doc = sqlx::query_scalar::<_, String>(
            "SELECT doc::text FROM user_challenge_data WHERE poll_id = $1 AND user_address = $2",
        )
        .bind(poll_id as i64)
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;
        decode(doc)
    }

    async fn create_user_challenge_data(&self, data: &UserChallengeData) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_challenge_data (poll_id, user_address, doc) VALUES ($1, $2, $3::jsonb)",
        )
        .bind(data.poll_id as i64)
        .bind(data.user_address.as_str())
        .bind(encode(data)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_user_challenge_data(&self, data: &UserChallengeData) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE user_challenge_data
            SET doc = $3::jsonb, updated_at = NOW()
            WHERE poll_id = $1 AND user_address = $2
            "#,
        )
        .bind(data.poll_id as i64)
        .bind(data.user_address.as_str())
        .bind(encode(data)?)
        .execute(&self.pool)
        .await?;
        expect_one(
            result.rows_affected(),
            "user challenge data",
            format!("{}/{}", data.poll_id, data.user_address),
        )
    }

    async fn user_challenge_data_for_poll(&self, poll_id: u64) -> Result<Vec<UserChallengeData>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT doc::text FROM user_challenge_data WHERE poll_id = $1 ORDER BY user_address",
        )
        .bind(poll_id as i64)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Proposals and parameters (updates are upserts)
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl ParameterProposalStore for PgStore {
    async fn get_parameter_proposal(&self, prop_id: &ProposalId) -> Result<Option<ParameterProposal>> {
        let doc = sqlx::query_scalar::<_, String>(
            "SELECT doc::text FROM parameter_proposals WHERE prop_id = $1",
        )
        .bind(prop_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        decode(doc)
    }

    async fn create_parameter_proposal(&self, proposal: &ParameterProposal) -> Result<()> {
        sqlx::query("INSERT INTO parameter_proposals (prop_id, doc) VALUES ($1, $2::jsonb)")
            .bind(proposal.prop_id.as_str())
            .bind(encode(proposal)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_parameter_proposal(&self, proposal: &ParameterProposal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO parameter_proposals (prop_id, doc) VALUES ($1, $2::jsonb)
            ON CONFLICT (prop_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(proposal.prop_id.as_str())
        .bind(encode(proposal)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ParameterStore for PgStore {
    async fn get_parameter(&self, name: &str) -> Result<Option<Parameter>> {
        let doc = sqlx::query_scalar::<_, String>("SELECT doc::text FROM parameters WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        decode(doc)
    }

    async fn update_parameter(&self, parameter: &Parameter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO parameters (name, doc) VALUES ($1, $2::jsonb)
            ON CONFLICT (name) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(&parameter.name)
        .bind(encode(parameter)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn parameters(&self) -> Result<Vec<Parameter>> {
        let rows = sqlx::query_scalar::<_, String>("SELECT doc::text FROM parameters ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        decode_all(rows)
    }
}

#[async_trait]
impl GovernmentParameterProposalStore for PgStore {
    async fn get_government_parameter_proposal(
        &self,
        prop_id: &ProposalId,
    ) -> Result<Option<GovernmentParameterProposal>> {
        let doc = sqlx::query_scalar::<_, String>(
            "SELECT doc::text FROM government_parameter_proposals WHERE prop_id = $1",
        )
        .bind(prop_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        decode(doc)
    }

    async fn create_government_parameter_proposal(
        &self,
        proposal: &GovernmentParameterProposal,
    ) -> Result<()> {
        sqlx::query("INSERT INTO government_parameter_proposals (prop_id, doc) VALUES ($1, $2::jsonb)")
            .bind(proposal.prop_id.as_str())
            .bind(encode(proposal)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_government_parameter_proposal(
        &self,
        proposal: &GovernmentParameterProposal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO government_parameter_proposals (prop_id, doc) VALUES ($1, $2::jsonb)
            ON CONFLICT (prop_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(proposal.prop_id.as_str())
        .bind(encode(proposal)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GovernmentParameterStore for PgStore {
    async fn get_government_parameter(&self, name: &str) -> Result<Option<GovernmentParameter>> {
        let doc = sqlx::query_scalar::<_, String>(
            "SELECT doc::text FROM government_parameters WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        decode(doc)
    }

    async fn update_government_parameter(&self, parameter: &GovernmentParameter) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO government_parameters (name, doc) VALUES ($1, $2::jsonb)
            ON CONFLICT (name) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()
            "#,
        )
        .bind(&parameter.name)
        .bind(encode(parameter)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Token transfers and multisigs
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
impl TokenTransferStore for PgStore {
    async fn create_token_transfer(&self, transfer: &TokenTransfer) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO token_transfers (tx_hash, log_index, from_address, to_address, doc)
            VALUES ($1, $2, $3, $4, $5::jsonb)
            ON CONFLICT (tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(&transfer.tx_hash)
        .bind(transfer.log_index as i32)
        .bind(transfer.from.as_str())
        .bind(transfer.to.as_str())
        .bind(encode(transfer)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn token_transfers_for(&self, address: &Address) -> Result<Vec<TokenTransfer>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT doc::text FROM token_transfers
            WHERE from_address = $1 OR to_address = $1
            ORDER BY (doc->>'block_number')::bigint, log_index
            "#,
        )
        .bind(address.as_str())
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }
}

#[async_trait]
impl MultiSigStore for PgStore {
    async fn get_multisig(&self, address: &Address) -> Result<Option<MultiSig>> {
        let doc = sqlx::query_scalar::<_, String>("SELECT doc::text FROM multisigs WHERE address = $1")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;
        decode(doc)
    }

    async fn create_multisig(&self, multisig: &MultiSig) -> Result<()> {
        sqlx::query("INSERT INTO multisigs (address, doc) VALUES ($1, $2::jsonb)")
            .bind(multisig.contract_address.as_str())
            .bind(encode(multisig)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_multisig(&self, multisig: &MultiSig) -> Result<()> {
        let result = sqlx::query("UPDATE multisigs SET doc = $2::jsonb, updated_at = NOW() WHERE address = $1")
            .bind(multisig.contract_address.as_str())
            .bind(encode(multisig)?)
            .execute(&self.pool)
            .await?;
        expect_one(result.rows_affected(), "multisig", multisig.contract_address.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Event log and watermark
// ═══════════════════════════════════════════════════════════════════════════

/// The crawler writes addresses in any case; the filter compares
/// `lower(contract_address)`, which `idx_events_contract_lower` covers.
const RETRIEVE_EVENTS_SQL: &str = r#"
    SELECT contract_name, event_type, contract_address, payload::text AS payload,
           block_number, tx_hash, tx_index, block_hash, log_index, timestamp
    FROM events
    WHERE timestamp >= $1
      AND ($2::text IS NULL OR lower(contract_address) = $2)
    ORDER BY timestamp, block_number, tx_index, log_index
"#;

/// Row from the crawler's `events` table.
#[derive(Debug, FromRow)]
struct EventRow {
    contract_name: String,
    event_type: String,
    contract_address: String,
    payload: String,
    block_number: i64,
    tx_hash: String,
    tx_index: i32,
    block_hash: String,
    log_index: i32,
    timestamp: i64,
}

impl TryFrom<EventRow> for Event {
    type Error = ProcessorError;

    fn try_from(row: EventRow) -> Result<Self> {
        let malformed = |field: &str| {
            ProcessorError::malformed_payload(
                &row.contract_name,
                &row.event_type,
                format!("{} out of range in event row", field),
            )
        };
        Ok(Event {
            contract_address: Address::parse(&row.contract_address)?,
            payload: serde_json::from_str(&row.payload)?,
            block_number: u64::try_from(row.block_number).map_err(|_| malformed("block_number"))?,
            tx_index: u32::try_from(row.tx_index).map_err(|_| malformed("tx_index"))?,
            log_index: u32::try_from(row.log_index).map_err(|_| malformed("log_index"))?,
            contract_name: row.contract_name,
            event_type: row.event_type,
            tx_hash: row.tx_hash,
            block_hash: row.block_hash,
            timestamp: row.timestamp,
        })
    }
}

/// Convert fetched rows, dropping excluded hashes. A row that does not
/// convert is logged and skipped so the rest of the log keeps moving.
fn events_from_rows(rows: Vec<EventRow>, exclude_hashes: &HashSet<String>) -> Vec<Event> {
    let mut events = Vec::with_capacity(rows.len());
    for row in rows {
        let (tx_hash, log_index) = (row.tx_hash.clone(), row.log_index);
        match Event::try_from(row) {
            Ok(event) if exclude_hashes.contains(&event.hash()) => {}
            Ok(event) => events.push(event),
            Err(err) => {
                warn!(%tx_hash, log_index, error = %err, "Skipping unreadable event row");
                DispatchMetrics::dead_lettered();
            }
        }
    }
    events
}

#[async_trait]
impl EventSource for PgStore {
    #[instrument(skip(self, exclude_hashes), fields(excluded = exclude_hashes.len()))]
    async fn retrieve_events(
        &self,
        from_timestamp: i64,
        exclude_hashes: &HashSet<String>,
        contract_address: Option<&Address>,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, EventRow>(RETRIEVE_EVENTS_SQL)
        .bind(from_timestamp)
        .bind(contract_address.map(|a| a.as_str().to_string()))
        .fetch_all(&self.pool)
        .await?;

        let events = events_from_rows(rows, exclude_hashes);
        debug!(count = events.len(), "Retrieved events");
        Ok(events)
    }
}

#[async_trait]
impl WatermarkStore for PgStore {
    async fn last_timestamp(&self) -> Result<i64> {
        let ts = sqlx::query_scalar::<_, i64>("SELECT last_timestamp FROM processor_watermark WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(ts.unwrap_or(0))
    }

    async fn hashes_at_last_timestamp(&self) -> Result<HashSet<String>> {
        let hashes = sqlx::query_scalar::<_, Vec<String>>(
            "SELECT hashes FROM processor_watermark WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(hashes.unwrap_or_default().into_iter().collect())
    }

    async fn advance_to(&self, timestamp: i64, hashes: &HashSet<String>) -> Result<()> {
        let mut hashes: Vec<String> = hashes.iter().cloned().collect();
        hashes.sort();
        sqlx::query(
            r#"
            INSERT INTO processor_watermark (id, last_timestamp, hashes, updated_at)
            VALUES (1, $1, $2, NOW())
            ON CONFLICT (id) DO UPDATE
            SET last_timestamp = EXCLUDED.last_timestamp,
                hashes = EXCLUDED.hashes,
                updated_at = NOW()
            "#,
        )
        .bind(timestamp)
        .bind(&hashes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
