//! Pull loop shared by the training and inference consumers
//!
//! Handlers never touch the broker's settlement API. They return a
//! [`MessageOutcome`] and the dispatcher decides:
//!
//! | Outcome     | Settlement | Loop      |
//! |-------------|------------|-----------|
//! | `Completed` | ack        | continue  |
//! | `Malformed` | nack       | continue  |
//! | `Transient` | nack       | continue  |
//! | `Fatal`     | nack       | stop, error |

use crate::broker::{Delivery, MessageBroker};
use crate::error::{MessageError, StoreError, WorkerError};
use crate::shutdown::ShutdownHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default receive wait per poll
pub const DEFAULT_POLL_WAIT: Duration = Duration::from_millis(1000);

/// Result of handling one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Completed,
    /// Payload cannot be processed, ever
    Malformed(String),
    /// Dependency failed for this message
    Transient(String),
    /// Worker state is no longer trustworthy
    Fatal(String),
}

impl From<MessageError> for MessageOutcome {
    fn from(error: MessageError) -> Self {
        MessageOutcome::Malformed(error.to_string())
    }
}

impl From<StoreError> for MessageOutcome {
    fn from(error: StoreError) -> Self {
        MessageOutcome::Transient(error.to_string())
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Worker name used in logs and health output
    fn name(&self) -> &'static str;

    /// Queue this handler consumes
    fn queue(&self) -> &'static str;

    async fn handle(&self, delivery: &Delivery) -> MessageOutcome;
}

/// Per-worker counters
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    completed: AtomicU64,
    malformed: AtomicU64,
    transient: AtomicU64,
    fatal: AtomicU64,
    last_message_ms: AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub completed: u64,
    pub malformed: u64,
    pub transient: u64,
    pub fatal: u64,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConsumerStats {
    fn record(&self, outcome: &MessageOutcome) {
        let counter = match outcome {
            MessageOutcome::Completed => &self.completed,
            MessageOutcome::Malformed(_) => &self.malformed,
            MessageOutcome::Transient(_) => &self.transient,
            MessageOutcome::Fatal(_) => &self.fatal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_message_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        let last_ms = self.last_message_ms.load(Ordering::Relaxed);
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            transient: self.transient.load(Ordering::Relaxed),
            fatal: self.fatal.load(Ordering::Relaxed),
            last_message_at: (last_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_ms))
                .flatten(),
        }
    }
}

/// Serial consumer: one message is settled before the next is received
pub struct Consumer<H: MessageHandler> {
    broker: Arc<dyn MessageBroker>,
    handler: Arc<H>,
    stats: Arc<ConsumerStats>,
    poll_wait: Duration,
}

impl<H: MessageHandler> Consumer<H> {
    pub fn new(broker: Arc<dyn MessageBroker>, handler: Arc<H>) -> Self {
        Self {
            broker,
            handler,
            stats: Arc::new(ConsumerStats::default()),
            poll_wait: DEFAULT_POLL_WAIT,
        }
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Consume until shutdown, a fatal outcome, or a broker receive failure
    pub async fn run(&self, shutdown: ShutdownHandle) -> Result<(), WorkerError> {
        info!(
            worker = self.handler.name(),
            queue = self.handler.queue(),
            "Consumer started"
        );

        let result = self.consume(&shutdown).await;
        match &result {
            Ok(()) => info!(worker = self.handler.name(), "Consumer stopped"),
            Err(e) => error!(worker = self.handler.name(), error = %e, "Consumer terminated"),
        }

        shutdown.notify_complete();
        result
    }

    async fn consume(&self, shutdown: &ShutdownHandle) -> Result<(), WorkerError> {
        let queue = self.handler.queue();

        while !shutdown.is_shutdown() {
            let Some(delivery) = self.broker.receive(queue, self.poll_wait).await? else {
                continue;
            };
            self.stats.received.fetch_add(1, Ordering::Relaxed);

            let started = Instant::now();
            let outcome = self.handler.handle(&delivery).await;
            self.stats.record(&outcome);

            debug!(
                worker = self.handler.name(),
                id = %delivery.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                outcome = ?outcome,
                "Message handled"
            );

            self.settle(&delivery, &outcome).await;

            if let MessageOutcome::Fatal(reason) = outcome {
                return Err(WorkerError::Fatal {
                    message_id: delivery.id,
                    reason,
                });
            }
        }

        Ok(())
    }

    async fn settle(&self, delivery: &Delivery, outcome: &MessageOutcome) {
        let result = match outcome {
            MessageOutcome::Completed => self.broker.ack(delivery).await,
            MessageOutcome::Malformed(reason) => {
                warn!(
                    worker = self.handler.name(),
                    id = %delivery.id,
                    reason = %reason,
                    "Malformed message, dropping"
                );
                self.broker.nack(delivery).await
            }
            MessageOutcome::Transient(reason) => {
                warn!(
                    worker = self.handler.name(),
                    id = %delivery.id,
                    reason = %reason,
                    "Message failed, dropping"
                );
                self.broker.nack(delivery).await
            }
            MessageOutcome::Fatal(reason) => {
                error!(
                    worker = self.handler.name(),
                    id = %delivery.id,
                    reason = %reason,
                    "Fatal failure, stopping worker"
                );
                self.broker.nack(delivery).await
            }
        };

        // Unsettled messages stay pending in the broker
        if let Err(e) = result {
            error!(
                worker = self.handler.name(),
                id = %delivery.id,
                error = %e,
                "Failed to settle message"
            );
        }
    }
}
