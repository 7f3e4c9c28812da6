//! In-process broker for tests
//!
//! Queues are FIFO. Settled messages are recorded so tests can assert on
//! ack/nack decisions and on what was published.

use super::{Delivery, MessageBroker};
use crate::error::{BrokerError, BrokerResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<Delivery>>,
    acked: Vec<Delivery>,
    nacked: Vec<Delivery>,
}

#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    next_id: AtomicU64,
    arrivals: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_pop(&self, queue: &str) -> BrokerResult<Option<Delivery>> {
        let mut state = self.lock();
        match state.queues.get_mut(queue) {
            Some(messages) => Ok(messages.pop_front()),
            None => Err(BrokerError::ReceiveFailed {
                queue: queue.to_string(),
                reason: "queue not declared".to_string(),
            }),
        }
    }

    /// Bodies waiting in `queue`, oldest first
    pub fn pending(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|messages| messages.iter().map(|d| d.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn acked(&self) -> Vec<Delivery> {
        self.lock().acked.clone()
    }

    pub fn nacked(&self) -> Vec<Delivery> {
        self.lock().nacked.clone()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare(&self, queue: &str) -> BrokerResult<()> {
        self.lock().queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> BrokerResult<Option<Delivery>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let notified = self.arrivals.notified();
            if let Some(delivery) = self.try_pop(queue)? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop(queue);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> BrokerResult<()> {
        self.lock().acked.push(delivery.clone());
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> BrokerResult<()> {
        self.lock().nacked.push(delivery.clone());
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> BrokerResult<String> {
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Delivery {
                queue: queue.to_string(),
                id: id.clone(),
                body: payload.to_vec(),
            });
        self.arrivals.notify_waiters();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = InMemoryBroker::new();
        broker.declare("q").await.unwrap();
        broker.publish("q", b"first").await.unwrap();
        broker.publish("q", b"second").await.unwrap();

        let a = broker.receive("q", Duration::ZERO).await.unwrap().unwrap();
        let b = broker.receive("q", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(a.body, b"first");
        assert_eq!(b.body, b"second");
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_receive_times_out_when_empty() {
        let broker = InMemoryBroker::new();
        broker.declare("q").await.unwrap();

        let result = broker.receive("q", Duration::from_millis(10)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_receive_undeclared_queue_fails() {
        let broker = InMemoryBroker::new();
        let result = broker.receive("missing", Duration::ZERO).await;
        assert!(matches!(result, Err(BrokerError::ReceiveFailed { .. })));
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare("q").await.unwrap();

        let receiver = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.receive("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("q", b"late").await.unwrap();

        let delivery = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.body, b"late");
    }

    #[tokio::test]
    async fn test_settlements_are_recorded() {
        let broker = InMemoryBroker::new();
        broker.declare("q").await.unwrap();
        broker.publish("q", b"x").await.unwrap();
        broker.publish("q", b"y").await.unwrap();

        let x = broker.receive("q", Duration::ZERO).await.unwrap().unwrap();
        let y = broker.receive("q", Duration::ZERO).await.unwrap().unwrap();
        broker.ack(&x).await.unwrap();
        broker.nack(&y).await.unwrap();

        assert_eq!(broker.acked(), vec![x]);
        assert_eq!(broker.nacked(), vec![y]);
        assert!(broker.pending("q").is_empty());
    }
}
