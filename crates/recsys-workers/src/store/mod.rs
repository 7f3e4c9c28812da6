//! Embedding store abstraction
//!
//! Users and movies live in two separate indexes. Consumers only see
//! [`EmbeddingStore`], which bounds every call with an operation timeout.

pub mod memory;
pub mod qdrant;

pub use memory::InMemoryEmbeddingIndex;
pub use qdrant::QdrantEmbeddingIndex;

use crate::error::{StoreError, StoreResult};
use crate::types::EMBEDDING_DIM;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on a single store call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// One similarity hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
}

/// Index statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    pub count: u64,
}

/// Keyed vector index
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Index name used in logs
    fn name(&self) -> &str;

    /// Fetch vectors by key; absent keys are missing from the result
    async fn fetch(&self, ids: &[String]) -> StoreResult<HashMap<String, Vec<f32>>>;

    /// Most similar vectors, best first
    async fn query(&self, vector: &[f32], top_k: usize) -> StoreResult<Vec<ScoredMatch>>;

    /// Insert or overwrite the vector stored under `id`
    async fn upsert(&self, id: &str, vector: Vec<f32>) -> StoreResult<()>;

    /// Number of stored vectors
    async fn stats(&self) -> StoreResult<IndexStats>;
}

/// Reject vectors that are not exactly [`EMBEDDING_DIM`] long
pub fn check_dimension(vector: &[f32]) -> StoreResult<()> {
    if vector.len() != EMBEDDING_DIM {
        return Err(StoreError::DimensionMismatch {
            expected: EMBEDDING_DIM,
            actual: vector.len(),
        });
    }
    Ok(())
}

async fn bounded<T, F>(operation: &'static str, timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { operation, timeout }),
    }
}

/// An index together with the timeout applied to its calls
#[derive(Clone)]
pub struct IndexHandle {
    inner: Arc<dyn EmbeddingIndex>,
    timeout: Duration,
}

impl IndexHandle {
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn fetch(&self, ids: &[String]) -> StoreResult<HashMap<String, Vec<f32>>> {
        bounded("fetch", self.timeout, self.inner.fetch(ids)).await
    }

    /// Fetch a single vector, `None` when absent
    pub async fn fetch_one(&self, id: &str) -> StoreResult<Option<Vec<f32>>> {
        let mut found = self.fetch(&[id.to_string()]).await?;
        Ok(found.remove(id))
    }

    pub async fn query(&self, vector: &[f32], top_k: usize) -> StoreResult<Vec<ScoredMatch>> {
        bounded("query", self.timeout, self.inner.query(vector, top_k)).await
    }

    pub async fn upsert(&self, id: &str, vector: Vec<f32>) -> StoreResult<()> {
        check_dimension(&vector)?;
        bounded("upsert", self.timeout, self.inner.upsert(id, vector)).await
    }

    pub async fn stats(&self) -> StoreResult<IndexStats> {
        bounded("stats", self.timeout, self.inner.stats()).await
    }
}

/// The user and movie indexes shared by both consumers
#[derive(Clone)]
pub struct EmbeddingStore {
    users: IndexHandle,
    movies: IndexHandle,
}

impl EmbeddingStore {
    pub fn new(users: Arc<dyn EmbeddingIndex>, movies: Arc<dyn EmbeddingIndex>) -> Self {
        Self {
            users: IndexHandle {
                inner: users,
                timeout: DEFAULT_OPERATION_TIMEOUT,
            },
            movies: IndexHandle {
                inner: movies,
                timeout: DEFAULT_OPERATION_TIMEOUT,
            },
        }
    }

    /// Store backed by two empty in-memory indexes
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryEmbeddingIndex::new("user-embeddings")),
            Arc::new(InMemoryEmbeddingIndex::new("movie-embeddings")),
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.users.timeout = timeout;
        self.movies.timeout = timeout;
        self
    }

    pub fn users(&self) -> &IndexHandle {
        &self.users
    }

    pub fn movies(&self) -> &IndexHandle {
        &self.movies
    }
}
