//! Processing cursor.
//!
//! Block timestamps are coarse: several events routinely share one. The
//! cursor is therefore a pair, the highest timestamp applied plus the hashes
//! of the events applied *at* that timestamp. The next fetch asks for
//! `timestamp >= last_timestamp` minus those hashes, which makes the pull
//! idempotent without sequence numbers.
//!
//! The hash set is only meaningful next to its timestamp. [`Watermark`]
//! keeps the two together; nothing outside this module reads one without
//! the other.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::Result;
use crate::events::Event;
use crate::store::WatermarkStore;
use crate::telemetry::BatchMetrics;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watermark {
    pub last_timestamp: i64,
    pub hashes_at_last_timestamp: HashSet<String>,
}

impl Watermark {
    pub fn new(last_timestamp: i64, hashes_at_last_timestamp: HashSet<String>) -> Self {
        Self {
            last_timestamp,
            hashes_at_last_timestamp,
        }
    }

    /// Read the persisted cursor.
    pub async fn load(store: &dyn WatermarkStore) -> Result<Self> {
        let last_timestamp = store.last_timestamp().await?;
        let hashes_at_last_timestamp = store.hashes_at_last_timestamp().await?;
        Ok(Self::new(last_timestamp, hashes_at_last_timestamp))
    }

    /// The cursor after `batch` has been applied, or `None` when the batch
    /// moves nothing.
    ///
    /// A newer timestamp replaces the hash set with the batch's events at
    /// that timestamp. Events at the current timestamp that were not yet
    /// recorded are added to the existing set, otherwise they would be
    /// fetched again on every cycle until a newer block arrived.
    pub fn advanced_by(&self, batch: &[Event]) -> Option<Self> {
        let newest = batch
            .iter()
            .map(|e| e.timestamp)
            .max()
            .filter(|ts| *ts > self.last_timestamp);

        if let Some(timestamp) = newest {
            let hashes = batch
                .iter()
                .filter(|e| e.timestamp == timestamp)
                .map(Event::hash)
                .collect();
            return Some(Self::new(timestamp, hashes));
        }

        let mut hashes = self.hashes_at_last_timestamp.clone();
        let before = hashes.len();
        hashes.extend(
            batch
                .iter()
                .filter(|e| e.timestamp == self.last_timestamp)
                .map(Event::hash),
        );
        (hashes.len() > before).then(|| Self::new(self.last_timestamp, hashes))
    }

    /// Advance past `batch` and persist. Returns the cursor now in effect.
    pub async fn advance(&self, store: &dyn WatermarkStore, batch: &[Event]) -> Result<Self> {
        let Some(next) = self.advanced_by(batch) else {
            debug!(last_timestamp = self.last_timestamp, "Watermark unchanged");
            return Ok(self.clone());
        };

        store
            .advance_to(next.last_timestamp, &next.hashes_at_last_timestamp)
            .await?;
        BatchMetrics::watermark(next.last_timestamp);

        info!(
            from = self.last_timestamp,
            to = next.last_timestamp,
            hashes = next.hashes_at_last_timestamp.len(),
            "Advanced watermark"
        );
        Ok(next)
    }
}
