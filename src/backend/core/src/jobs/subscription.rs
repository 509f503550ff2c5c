//! Notification transport over a Redis stream consumer group.
//!
//! The crawler appends one entry per stored event to a stream, with the
//! JSON [`Notification`] under the `data` field. Entries stay pending in the
//! consumer group until acknowledged, so anything not acked before a crash
//! is read again on restart: the reader first drains its own pending entries
//! (id `0`) and only then switches to new ones (id `>`).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadReply};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SubscriptionConfig;
use crate::error::{ProcessorError, Result};
use crate::events::Notification;

/// Stream entry field holding the notification JSON.
pub const DATA_FIELD: &str = "data";

const READ_BATCH: usize = 32;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Acknowledges one delivered notification to its transport.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// A notification together with the means to acknowledge it.
pub struct InboundMessage {
    pub notification: Notification,
    acker: Box<dyn Acker>,
}

impl InboundMessage {
    pub fn new(notification: Notification, acker: impl Acker + 'static) -> Self {
        Self {
            notification,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }
}

impl std::fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundMessage")
            .field("notification", &self.notification)
            .finish_non_exhaustive()
    }
}

/// `XACK` for a single stream entry.
pub struct RedisAcker {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    entry_id: String,
}

#[async_trait]
impl Acker for RedisAcker {
    async fn ack(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let acked: i64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&self.entry_id)
            .query_async(&mut conn)
            .await?;
        debug!(entry_id = %self.entry_id, acked, "Acknowledged notification");
        Ok(())
    }
}

/// Decode the notification carried by a stream entry.
pub fn parse_entry(entry: &StreamId) -> Result<Notification> {
    let raw = entry.map.get(DATA_FIELD).ok_or_else(|| {
        ProcessorError::malformed_payload("stream", "notification", "missing data field")
            .with_context("entry_id", &entry.id)
    })?;
    let bytes: Vec<u8> = redis::from_redis_value(raw)?;
    Notification::from_json(&bytes)
}

pub struct RedisStreamSubscriber {
    config: SubscriptionConfig,
    reader: ConnectionManager,
    acker: ConnectionManager,
}

impl RedisStreamSubscriber {
    /// Connect and make sure the consumer group exists.
    ///
    /// Reads block on the server, so acks go over a second connection.
    pub async fn connect(config: &SubscriptionConfig) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let reader = client.get_connection_manager().await?;
        let acker = client.get_connection_manager().await?;

        let subscriber = Self {
            config: config.clone(),
            reader,
            acker,
        };
        subscriber.ensure_group().await?;
        Ok(subscriber)
    }

    async fn ensure_group(&self) -> Result<()> {
        let mut conn = self.reader.clone();
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_key)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(()) => {
                info!(
                    stream = %self.config.stream_key,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn read(&mut self, cursor: &str) -> Result<Vec<StreamId>> {
        let block_ms = self.config.block_timeout.as_millis() as u64;
        let reply: Option<StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(READ_BATCH)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_key)
            .arg(cursor)
            .query_async(&mut self.reader)
            .await?;

        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    fn acker_for(&self, entry_id: &str) -> RedisAcker {
        RedisAcker {
            conn: self.acker.clone(),
            stream_key: self.config.stream_key.clone(),
            group: self.config.consumer_group.clone(),
            entry_id: entry_id.to_string(),
        }
    }

    /// Start forwarding notifications until `shutdown` turns true.
    ///
    /// Returns the inbound channel, the transport error channel and the
    /// reader task. Both channels close when the task exits.
    pub fn spawn(
        mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> (
        mpsc::Receiver<InboundMessage>,
        mpsc::Receiver<ProcessorError>,
        JoinHandle<()>,
    ) {
        let capacity = self.config.channel_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);

        let task = tokio::spawn(async move {
            info!(
                stream = %self.config.stream_key,
                group = %self.config.consumer_group,
                consumer = %self.config.consumer_name,
                "Subscription started"
            );
            let mut cursor = String::from("0");

            'outer: loop {
                if *shutdown.borrow() {
                    break;
                }
                let read = tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    read = self.read(&cursor) => read,
                };

                let entries = match read {
                    Ok(entries) => entries,
                    Err(err) => {
                        warn!(error = %err, "Stream read failed");
                        if error_tx.try_send(err).is_err() {
                            debug!("Error channel full, dropping transport error");
                        }
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                            _ = tokio::time::sleep(RETRY_DELAY) => {}
                        }
                        continue;
                    }
                };

                if cursor != ">" {
                    match entries.last() {
                        Some(last) => cursor = last.id.clone(),
                        None => {
                            debug!("Pending entries drained");
                            cursor = String::from(">");
                        }
                    }
                }

                for entry in entries {
                    let acker = self.acker_for(&entry.id);
                    let notification = match parse_entry(&entry) {
                        Ok(notification) => notification,
                        Err(err) => {
                            warn!(entry_id = %entry.id, error = %err, "Discarding unreadable notification");
                            if let Err(ack_err) = acker.ack().await {
                                warn!(entry_id = %entry.id, error = %ack_err, "Failed to ack unreadable notification");
                            }
                            let _ = error_tx.try_send(err);
                            continue;
                        }
                    };

                    if inbound_tx
                        .send(InboundMessage::new(notification, acker))
                        .await
                        .is_err()
                    {
                        debug!("Inbound channel closed");
                        break 'outer;
                    }
                }
            }

            info!("Subscription stopped");
        });

        (inbound_rx, error_rx, task)
    }
}
