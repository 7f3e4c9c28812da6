//! Durable message queues with manual acknowledgment
//!
//! Consumers pull one [`Delivery`] at a time and settle it explicitly. Nack
//! never requeues: a message that fails once is dropped.

pub mod memory;
pub mod redis;

pub use memory::InMemoryBroker;
pub use self::redis::RedisStreamBroker;

use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// A received, not yet settled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub queue: String,
    /// Broker-assigned message id
    pub id: String,
    pub body: Vec<u8>,
}

/// Queue operations needed by the consumers
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Create the queue if it does not exist; idempotent
    async fn declare(&self, queue: &str) -> BrokerResult<()>;

    /// Next message, or `None` if nothing arrived within `wait`
    async fn receive(&self, queue: &str, wait: Duration) -> BrokerResult<Option<Delivery>>;

    /// Settle a message as processed
    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Settle a message as failed, without requeue
    async fn nack(&self, delivery: &Delivery) -> BrokerResult<()>;

    /// Append a message, returning its id
    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<String>;
}

/// Declare every queue in `queues`
pub async fn declare_all(broker: &dyn MessageBroker, queues: &[&str]) -> BrokerResult<()> {
    for queue in queues {
        broker.declare(queue).await?;
    }
    Ok(())
}

pub(crate) async fn bounded<T, F>(timeout: Duration, fut: F) -> BrokerResult<T>
where
    F: Future<Output = BrokerResult<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| BrokerError::Timeout(timeout))?
}
