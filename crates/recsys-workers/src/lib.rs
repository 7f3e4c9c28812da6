//! Recommendation embedding workers
//!
//! Two message-driven consumers sharing one embedding store:
//!
//! - the training consumer absorbs rating events from `training_data`,
//!   refactorizes the interaction matrix and upserts the touched user and
//!   movie embeddings;
//! - the inference consumer answers `recommendation_requests` by mixing
//!   embedding similarity with a popularity list and publishes the resulting
//!   embeddings to `embeddings`.

pub mod broker;
pub mod catalog;
pub mod config;
pub mod consumer;
pub mod error;
pub mod factorization;
pub mod health;
pub mod inference;
pub mod matrix;
pub mod recommendation;
pub mod retry;
pub mod shutdown;
pub mod store;
pub mod training;
pub mod types;

// Re-export key types
pub use broker::{Delivery, InMemoryBroker, MessageBroker, RedisStreamBroker};
pub use catalog::MovieCatalog;
pub use config::AppConfig;
pub use consumer::{Consumer, ConsumerStats, MessageHandler, MessageOutcome};
pub use error::{
    BrokerError, CatalogError, ComputationError, ConfigError, MessageError, StoreError,
    WorkerError,
};
pub use factorization::{FactorizationConfig, FactorizationEngine, Factors};
pub use inference::InferenceConsumer;
pub use matrix::{InteractionMatrix, InteractionStore};
pub use recommendation::{merge_candidates, MergePolicy, Recommendation, RecommendationEngine};
pub use shutdown::{ShutdownCoordinator, ShutdownHandle};
pub use store::{EmbeddingIndex, EmbeddingStore, InMemoryEmbeddingIndex, QdrantEmbeddingIndex};
pub use training::TrainingConsumer;
pub use types::*;

#[cfg(test)]
mod tests;
