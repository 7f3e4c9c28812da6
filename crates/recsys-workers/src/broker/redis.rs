//! Redis Streams broker
//!
//! Each queue is a stream. Every worker kind reads through its own consumer
//! group, so a message is delivered to one worker of that kind. Ack and nack
//! both remove the entry from the group's pending list and, unless disabled,
//! delete it from the stream.
//!
//! Consumer names are stable across restarts. The first receive on a queue
//! replays this consumer's own pending entries (read from id `0`) before it
//! switches to new entries (`>`), so a message that was delivered but never
//! settled, for example because the process died mid-message, is delivered
//! again.

use super::{bounded, Delivery, MessageBroker};
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, RedisResult};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

const PAYLOAD_FIELD: &str = "payload";

/// Read position for entries never delivered to any consumer of the group
const NEW_ENTRIES: &str = ">";
/// Read position for this consumer's own delivered but unsettled entries
const OWN_PENDING: &str = "0";

fn stream_key(prefix: &str, queue: &str) -> String {
    if prefix.is_empty() {
        queue.to_string()
    } else {
        format!("{}:{}", prefix, queue)
    }
}

fn consumer_name(group: &str, name: &str) -> String {
    format!("{}-{}", group, name)
}

/// Broker bound to one consumer group over its own connection
///
/// Blocking reads hold the connection for up to the poll wait, so every
/// consumer gets a broker from its own [`RedisStreamBroker::connect`] call.
pub struct RedisStreamBroker {
    connection: ConnectionManager,
    stream_prefix: String,
    group: String,
    consumer: String,
    timeout: Duration,
    max_stream_length: Option<usize>,
    delete_on_settle: bool,
    /// Queues whose pending history has been replayed
    replayed: Mutex<HashSet<String>>,
}

impl RedisStreamBroker {
    /// Open a managed connection; the manager reconnects on its own afterwards
    pub async fn connect(
        redis_url: &str,
        stream_prefix: impl Into<String>,
        group: impl Into<String>,
        consumer: &str,
        timeout: Duration,
    ) -> BrokerResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| BrokerError::ConnectionFailed(format!("Invalid Redis URL: {}", e)))?;

        let connection = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| BrokerError::Timeout(timeout))?
            .map_err(|e| BrokerError::ConnectionFailed(format!("Connection failed: {}", e)))?;

        let group = group.into();
        let consumer = consumer_name(&group, consumer);
        info!(group = %group, consumer = %consumer, "Connected to Redis");

        Ok(Self {
            connection,
            stream_prefix: stream_prefix.into(),
            group,
            consumer,
            timeout,
            max_stream_length: None,
            delete_on_settle: true,
            replayed: Mutex::new(HashSet::new()),
        })
    }

    /// Approximate cap applied to streams on every publish
    pub fn with_max_stream_length(mut self, max_stream_length: Option<usize>) -> Self {
        self.max_stream_length = max_stream_length;
        self
    }

    /// Whether settled entries are deleted from their stream
    pub fn with_delete_on_settle(mut self, delete_on_settle: bool) -> Self {
        self.delete_on_settle = delete_on_settle;
        self
    }

    fn stream_key(&self, queue: &str) -> String {
        stream_key(&self.stream_prefix, queue)
    }

    fn is_replayed(&self, queue: &str) -> bool {
        self.replayed
            .lock()
            .map(|replayed| replayed.contains(queue))
            .unwrap_or(false)
    }

    fn mark_replayed(&self, queue: &str) {
        if let Ok(mut replayed) = self.replayed.lock() {
            replayed.insert(queue.to_string());
        }
    }

    async fn read_group(
        &self,
        queue: &str,
        cursor: &str,
        wait: Duration,
    ) -> BrokerResult<Option<Delivery>> {
        let stream_key = self.stream_key(queue);
        let mut conn = self.connection.clone();

        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if cursor == NEW_ENTRIES {
            // BLOCK 0 means forever
            opts = opts.block((wait.as_millis() as usize).max(1));
        }

        let reply: StreamReadReply = bounded(self.timeout + wait, async {
            conn.xread_options(&[&stream_key], &[cursor], &opts)
                .await
                .map_err(|e| BrokerError::ReceiveFailed {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                })
        })
        .await?;

        let Some(entry) = reply.keys.first().and_then(|key| key.ids.first()) else {
            return Ok(None);
        };

        let body = match entry.map.get(PAYLOAD_FIELD) {
            Some(value) => redis::from_redis_value::<Vec<u8>>(value).unwrap_or_else(|e| {
                warn!(id = %entry.id, error = %e, "Unreadable payload field");
                Vec::new()
            }),
            None => {
                warn!(id = %entry.id, stream = %stream_key, "Message without payload field");
                Vec::new()
            }
        };

        Ok(Some(Delivery {
            queue: queue.to_string(),
            id: entry.id.clone(),
            body,
        }))
    }

    async fn settle(&self, delivery: &Delivery) -> BrokerResult<()> {
        let stream_key = self.stream_key(&delivery.queue);
        let mut conn = self.connection.clone();
        let settle_failed = |e: redis::RedisError| BrokerError::SettleFailed {
            id: delivery.id.clone(),
            reason: e.to_string(),
        };

        bounded(self.timeout, async {
            let _: i64 = conn
                .xack(&stream_key, &self.group, &[&delivery.id])
                .await
                .map_err(settle_failed)?;
            if self.delete_on_settle {
                let _: i64 = conn
                    .xdel(&stream_key, &[&delivery.id])
                    .await
                    .map_err(settle_failed)?;
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MessageBroker for RedisStreamBroker {
    async fn declare(&self, queue: &str) -> BrokerResult<()> {
        let stream_key = self.stream_key(queue);
        let mut conn = self.connection.clone();

        let result: RedisResult<String> = bounded(self.timeout, async {
            Ok(redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream_key)
                .arg(&self.group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await)
        })
        .await?;

        match result {
            Ok(_) => info!(stream = %stream_key, group = %self.group, "Created consumer group"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %stream_key, group = %self.group, "Consumer group already exists");
            }
            Err(e) => {
                return Err(BrokerError::DeclareFailed {
                    queue: queue.to_string(),
                    reason: e.to_string(),
                })
            }
        }
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> BrokerResult<Option<Delivery>> {
        if !self.is_replayed(queue) {
            match self.read_group(queue, OWN_PENDING, wait).await? {
                Some(delivery) => {
                    warn!(
                        queue = %queue,
                        id = %delivery.id,
                        consumer = %self.consumer,
                        "Redelivering unsettled message"
                    );
                    return Ok(Some(delivery));
                }
                None => self.mark_replayed(queue),
            }
        }

        self.read_group(queue, NEW_ENTRIES, wait).await
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        self.settle(delivery).await
    }

    async fn nack(&self, delivery: &Delivery) -> BrokerResult<()> {
        self.settle(delivery).await?;
        warn!(
            queue = %delivery.queue,
            id = %delivery.id,
            "Dropped message without requeue"
        );
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<String> {
        let stream_key = self.stream_key(queue);
        let mut conn = self.connection.clone();
        let items = [(PAYLOAD_FIELD, payload)];

        bounded(self.timeout, async {
            let id: RedisResult<String> = match self.max_stream_length {
                Some(max) => {
                    conn.xadd_maxlen(&stream_key, StreamMaxlen::Approx(max), "*", &items)
                        .await
                }
                None => conn.xadd(&stream_key, "*", &items).await,
            };
            id.map_err(|e| BrokerError::PublishFailed {
                queue: queue.to_string(),
                reason: e.to_string(),
            })
        })
        .await
    }
}
