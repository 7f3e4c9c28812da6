//! Inference consumer
//!
//! Answers `recommendation_requests` by computing a recommendation for the
//! user and publishing the user's and the recommended movies' embeddings to
//! the `embeddings` queue.

use crate::broker::{Delivery, MessageBroker};
use crate::consumer::{MessageHandler, MessageOutcome};
use crate::error::{StoreError, StoreResult};
use crate::recommendation::{Recommendation, RecommendationEngine};
use crate::store::EmbeddingStore;
use crate::types::{
    embedding_key, RecommendationBundle, RecommendationRequest, EMBEDDINGS_QUEUE, REQUEST_QUEUE,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct InferenceConsumer {
    engine: RecommendationEngine,
    store: EmbeddingStore,
    broker: Arc<dyn MessageBroker>,
}

impl InferenceConsumer {
    pub fn new(
        engine: RecommendationEngine,
        store: EmbeddingStore,
        broker: Arc<dyn MessageBroker>,
    ) -> Self {
        Self {
            engine,
            store,
            broker,
        }
    }

    /// Re-read the user's vector and every recommended movie's vector
    ///
    /// Movies without a stored vector are left out of the bundle. A user vector
    /// that is gone is an error, since the bundle would be meaningless.
    pub async fn assemble_bundle(
        &self,
        request: &RecommendationRequest,
        recommendation: &Recommendation,
    ) -> StoreResult<RecommendationBundle> {
        let user_key = embedding_key(request.user_id);
        let user_embedding = self
            .store
            .users()
            .fetch_one(&user_key)
            .await?
            .ok_or(StoreError::MissingEmbedding(user_key))?;

        let movie_keys: Vec<String> = recommendation
            .movie_ids
            .iter()
            .map(|id| embedding_key(*id))
            .collect();
        let mut found = self.store.movies().fetch(&movie_keys).await?;

        let mut movie_embeddings = BTreeMap::new();
        for (id, key) in recommendation.movie_ids.iter().zip(&movie_keys) {
            match found.remove(key) {
                Some(vector) => {
                    movie_embeddings.insert(*id, vector);
                }
                None => debug!(movie_id = id, "No embedding for recommended movie, omitting"),
            }
        }

        Ok(RecommendationBundle {
            req_id: request.req_id.clone(),
            user_id: request.user_id,
            user_embedding,
            movie_embeddings,
        })
    }
}

#[async_trait]
impl MessageHandler for InferenceConsumer {
    fn name(&self) -> &'static str {
        "inference"
    }

    fn queue(&self) -> &'static str {
        REQUEST_QUEUE
    }

    async fn handle(&self, delivery: &Delivery) -> MessageOutcome {
        let request = match RecommendationRequest::from_slice(&delivery.body) {
            Ok(request) => request,
            Err(e) => return e.into(),
        };

        info!(
            req_id = %request.req_id,
            user_id = request.user_id,
            "Processing recommendation request"
        );

        let recommendation = match self.engine.recommend(request.user_id).await {
            Ok(Some(recommendation)) => recommendation,
            Ok(None) => {
                info!(
                    req_id = %request.req_id,
                    user_id = request.user_id,
                    "Unknown user, nothing published"
                );
                return MessageOutcome::Completed;
            }
            Err(e) => return e.into(),
        };

        let bundle = match self.assemble_bundle(&request, &recommendation).await {
            Ok(bundle) => bundle,
            Err(e) => return e.into(),
        };

        let payload = match serde_json::to_vec(&bundle) {
            Ok(payload) => payload,
            Err(e) => return MessageOutcome::Transient(format!("Failed to encode bundle: {}", e)),
        };

        if let Err(e) = self.broker.publish(EMBEDDINGS_QUEUE, &payload).await {
            return MessageOutcome::Transient(e.to_string());
        }

        info!(
            req_id = %request.req_id,
            titles = ?recommendation.titles,
            movies = bundle.movie_embeddings.len(),
            "Published recommendation"
        );
        MessageOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::catalog::MovieCatalog;
    use crate::types::EMBEDDING_DIM;
    use std::collections::HashMap;

    fn vector(seed: f32) -> Vec<f32> {
        (0..EMBEDDING_DIM).map(|i| seed + i as f32 * 0.01).collect()
    }

    fn delivery(body: &[u8]) -> Delivery {
        Delivery {
            queue: REQUEST_QUEUE.to_string(),
            id: "1-0".to_string(),
            body: body.to_vec(),
        }
    }

    async fn consumer(popular: Vec<u64>) -> (InferenceConsumer, EmbeddingStore, Arc<InMemoryBroker>) {
        let store = EmbeddingStore::in_memory();
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare(EMBEDDINGS_QUEUE).await.unwrap();

        let catalog = Arc::new(MovieCatalog::new(HashMap::new(), popular));
        let engine = RecommendationEngine::new(store.clone(), catalog);
        let consumer = InferenceConsumer::new(engine, store.clone(), broker.clone());
        (consumer, store, broker)
    }

    #[tokio::test]
    async fn test_malformed_request() {
        let (consumer, _, broker) = consumer(vec![]).await;
        let outcome = consumer.handle(&delivery(b"{\"reqId\": 1}")).await;

        assert!(matches!(outcome, MessageOutcome::Malformed(_)));
        assert!(broker.pending(EMBEDDINGS_QUEUE).is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_completes_without_publishing() {
        let (consumer, _, broker) = consumer(vec![1, 2]).await;
        let outcome = consumer
            .handle(&delivery(br#"{"reqId": "r1", "userId": 9}"#))
            .await;

        assert_eq!(outcome, MessageOutcome::Completed);
        assert!(broker.pending(EMBEDDINGS_QUEUE).is_empty());
    }

    #[tokio::test]
    async fn test_known_user_without_candidates_still_publishes() {
        let (consumer, store, broker) = consumer(vec![]).await;
        store.users().upsert("7", vector(2.0)).await.unwrap();

        let outcome = consumer
            .handle(&delivery(br#"{"reqId": "r4", "userId": 7}"#))
            .await;
        assert_eq!(outcome, MessageOutcome::Completed);

        let published = broker.pending(EMBEDDINGS_QUEUE);
        assert_eq!(published.len(), 1);
        let bundle: RecommendationBundle = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(bundle.user_id, 7);
        assert_eq!(bundle.user_embedding, vector(2.0));
        assert!(bundle.movie_embeddings.is_empty());
    }

    #[tokio::test]
    async fn test_bundle_omits_movies_without_embeddings() {
        let (consumer, store, broker) = consumer(vec![50]).await;
        store.users().upsert("3", vector(1.0)).await.unwrap();
        store.movies().upsert("8", vector(0.5)).await.unwrap();

        let outcome = consumer
            .handle(&delivery(br#"{"reqId": "r2", "userId": 3}"#))
            .await;
        assert_eq!(outcome, MessageOutcome::Completed);

        let published = broker.pending(EMBEDDINGS_QUEUE);
        assert_eq!(published.len(), 1);
        let bundle: RecommendationBundle = serde_json::from_slice(&published[0]).unwrap();
        assert_eq!(bundle.req_id, "r2");
        assert_eq!(bundle.user_id, 3);
        assert_eq!(bundle.user_embedding, vector(1.0));
        // Movie 50 is popular but has no embedding
        assert_eq!(bundle.movie_embeddings.keys().copied().collect::<Vec<_>>(), vec![8]);
    }

    #[tokio::test]
    async fn test_missing_user_at_assembly_is_an_error() {
        let (consumer, _, _) = consumer(vec![]).await;
        let request = RecommendationRequest {
            req_id: "r3".to_string(),
            user_id: 4,
        };
        let recommendation = Recommendation {
            movie_ids: vec![1],
            titles: vec!["Unknown".to_string()],
        };

        let result = consumer.assemble_bundle(&request, &recommendation).await;
        assert!(matches!(result, Err(StoreError::MissingEmbedding(ref key)) if key == "4"));
    }
}
