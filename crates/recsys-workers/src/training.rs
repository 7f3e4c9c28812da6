//! Training consumer
//!
//! Each rating event rebuilds the interaction matrix from the store's current
//! counts, writes the rating, factorizes the whole matrix and upserts the
//! embeddings of the event's user and movie. Nothing else is written back.

use crate::broker::Delivery;
use crate::consumer::{MessageHandler, MessageOutcome};
use crate::error::{ComputationError, MessageError};
use crate::factorization::{FactorizationEngine, Factors};
use crate::matrix::{InteractionMatrix, InteractionStore};
use crate::store::EmbeddingStore;
use crate::types::{embedding_key, RatingEvent, TRAINING_QUEUE};
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

/// Default per-axis ceiling on matrix growth
///
/// The factorization keeps a handful of dense `f64` panels of
/// `axis_len x (rank + oversamples)`. At 100,000 rows with the default 74
/// columns each panel is about 59 MB, which keeps one training cycle well
/// under half a gigabyte.
pub const DEFAULT_MAX_DIMENSION: u64 = 100_000;

pub struct TrainingConsumer {
    interactions: InteractionStore,
    engine: FactorizationEngine,
    store: EmbeddingStore,
    max_dimension: u64,
}

impl TrainingConsumer {
    pub fn new(store: EmbeddingStore, engine: FactorizationEngine) -> Self {
        Self {
            interactions: InteractionStore::new(store.clone()),
            engine,
            store,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    pub fn with_max_dimension(mut self, max_dimension: u64) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Reject ids that would grow the matrix past the ceiling
    pub fn validate(&self, event: &RatingEvent) -> Result<(), MessageError> {
        for (field, id) in [("userId", event.user_id), ("movieId", event.movie_id)] {
            if id >= self.max_dimension {
                return Err(MessageError::InvalidField {
                    field,
                    reason: format!("{} is not below the limit of {}", id, self.max_dimension),
                });
            }
        }
        Ok(())
    }

    /// Factorize on the blocking pool
    async fn factorize(&self, matrix: InteractionMatrix) -> Result<Factors, ComputationError> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.factorize(&matrix))
            .await
            .map_err(|e| ComputationError::Aborted(e.to_string()))?
    }

    /// Absorb one validated rating event
    pub async fn process(&self, event: RatingEvent) -> MessageOutcome {
        let started = Instant::now();
        let user_idx = event.user_id as usize;
        let movie_idx = event.movie_id as usize;

        let matrix = self.interactions.load().await;
        let matrix = self
            .interactions
            .set(matrix, user_idx, movie_idx, event.rating);
        let (num_users, num_movies) = matrix.shape();

        let factors = match self.factorize(matrix).await {
            Ok(factors) => factors,
            Err(e) => return MessageOutcome::Fatal(e.to_string()),
        };

        let (Some(user_vector), Some(movie_vector)) = (
            factors.user_embedding(user_idx),
            factors.movie_embedding(movie_idx),
        ) else {
            return MessageOutcome::Fatal("Factorization output is missing the event's rows".into());
        };

        if let Err(e) = self
            .store
            .users()
            .upsert(&embedding_key(event.user_id), user_vector)
            .await
        {
            return e.into();
        }
        if let Err(e) = self
            .store
            .movies()
            .upsert(&embedding_key(event.movie_id), movie_vector)
            .await
        {
            return e.into();
        }

        info!(
            user_id = event.user_id,
            movie_id = event.movie_id,
            rating = event.rating,
            num_users,
            num_movies,
            effective_rank = factors.effective_rank(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Updated embeddings"
        );
        MessageOutcome::Completed
    }
}

#[async_trait]
impl MessageHandler for TrainingConsumer {
    fn name(&self) -> &'static str {
        "training"
    }

    fn queue(&self) -> &'static str {
        TRAINING_QUEUE
    }

    async fn handle(&self, delivery: &Delivery) -> MessageOutcome {
        let event = match RatingEvent::from_slice(&delivery.body) {
            Ok(event) => event,
            Err(e) => return e.into(),
        };
        if let Err(e) = self.validate(&event) {
            return e.into();
        }

        self.process(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use crate::factorization::FactorizationConfig;
    use crate::store::{EmbeddingIndex, IndexStats, ScoredMatch};
    use crate::types::EMBEDDING_DIM;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn delivery(body: &[u8]) -> Delivery {
        Delivery {
            queue: TRAINING_QUEUE.to_string(),
            id: "1-0".to_string(),
            body: body.to_vec(),
        }
    }

    /// Index whose writes always fail
    struct ReadOnlyIndex;

    #[async_trait]
    impl EmbeddingIndex for ReadOnlyIndex {
        fn name(&self) -> &str {
            "read-only"
        }

        async fn fetch(&self, _ids: &[String]) -> StoreResult<HashMap<String, Vec<f32>>> {
            Ok(HashMap::new())
        }

        async fn query(&self, _vector: &[f32], _top_k: usize) -> StoreResult<Vec<ScoredMatch>> {
            Ok(Vec::new())
        }

        async fn upsert(&self, _id: &str, _vector: Vec<f32>) -> StoreResult<()> {
            Err(crate::error::StoreError::RequestFailed("read only".into()))
        }

        async fn stats(&self) -> StoreResult<IndexStats> {
            Ok(IndexStats::default())
        }
    }

    #[tokio::test]
    async fn test_event_upserts_user_and_movie() {
        let store = EmbeddingStore::in_memory();
        let consumer = TrainingConsumer::new(store.clone(), FactorizationEngine::default());

        let outcome = consumer
            .handle(&delivery(br#"{"userId": 5, "movieId": 12, "rating": 4.5}"#))
            .await;
        assert_eq!(outcome, MessageOutcome::Completed);

        let user = store.users().fetch_one("5").await.unwrap().unwrap();
        let movie = store.movies().fetch_one("12").await.unwrap().unwrap();
        assert_eq!(user.len(), EMBEDDING_DIM);
        assert_eq!(movie.len(), EMBEDDING_DIM);
        assert_eq!(store.users().stats().await.unwrap().count, 1);
        assert_eq!(store.movies().stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let store = EmbeddingStore::in_memory();
        let consumer = TrainingConsumer::new(store.clone(), FactorizationEngine::default());

        let outcome = consumer.handle(&delivery(b"{not json")).await;
        assert!(matches!(outcome, MessageOutcome::Malformed(_)));
        assert_eq!(store.users().stats().await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_id_beyond_ceiling_is_malformed() {
        let consumer =
            TrainingConsumer::new(EmbeddingStore::in_memory(), FactorizationEngine::default())
                .with_max_dimension(100);

        let outcome = consumer
            .handle(&delivery(br#"{"userId": 1, "movieId": 100, "rating": 3.0}"#))
            .await;
        assert!(matches!(outcome, MessageOutcome::Malformed(ref reason) if reason.contains("movieId")));
    }

    #[test]
    fn test_default_ceiling_bounds_both_axes() {
        let consumer =
            TrainingConsumer::new(EmbeddingStore::in_memory(), FactorizationEngine::default());
        let event = |user_id, movie_id| RatingEvent {
            user_id,
            movie_id,
            rating: 1.0,
        };

        assert!(consumer.validate(&event(99_999, 99_999)).is_ok());
        assert!(consumer.validate(&event(100_000, 0)).is_err());
        assert!(consumer.validate(&event(0, 999_999)).is_err());
    }

    #[tokio::test]
    async fn test_store_failure_is_transient() {
        let store = EmbeddingStore::new(Arc::new(ReadOnlyIndex), Arc::new(ReadOnlyIndex));
        let consumer = TrainingConsumer::new(store, FactorizationEngine::default());

        let outcome = consumer
            .handle(&delivery(br#"{"userId": 0, "movieId": 0, "rating": 1.0}"#))
            .await;
        assert!(matches!(outcome, MessageOutcome::Transient(_)));
    }

    #[tokio::test]
    async fn test_computation_failure_is_fatal() {
        let engine = FactorizationEngine::new(FactorizationConfig {
            rank: 0,
            ..Default::default()
        });
        let consumer = TrainingConsumer::new(EmbeddingStore::in_memory(), engine);

        let outcome = consumer
            .handle(&delivery(br#"{"userId": 0, "movieId": 0, "rating": 1.0}"#))
            .await;
        assert!(matches!(outcome, MessageOutcome::Fatal(_)));
    }
}
