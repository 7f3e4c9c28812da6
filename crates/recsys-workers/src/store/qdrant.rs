//! Qdrant-backed embedding index
//!
//! One collection per index. Collections use dot-product distance: Qdrant
//! normalises vectors stored under cosine distance, which would break
//! upsert/fetch round trips. Embedding keys are the decimal user or movie ids
//! and map onto numeric Qdrant point ids; the key is also kept in the payload.

use super::{check_dimension, EmbeddingIndex, IndexStats, ScoredMatch};
use crate::error::{StoreError, StoreResult};
use crate::types::EMBEDDING_DIM;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, vectors::VectorsOptions, CreateCollectionBuilder, Distance,
    GetPointsBuilder, PointId, PointStruct, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct QdrantEmbeddingIndex {
    client: Arc<Qdrant>,
    collection_name: String,
}

/// Connect to a Qdrant server
pub fn connect(url: &str, api_key: Option<&str>) -> StoreResult<Arc<Qdrant>> {
    let mut builder = Qdrant::from_url(url);
    if let Some(key) = api_key {
        builder = builder.api_key(key.to_string());
    }

    let client = builder
        .build()
        .map_err(|e| StoreError::Unavailable(format!("Failed to create Qdrant client: {}", e)))?;

    info!(url = %url, "Created Qdrant client");
    Ok(Arc::new(client))
}

/// Verify the server answers, used while retrying at startup
pub async fn health_check(client: &Qdrant) -> StoreResult<()> {
    client
        .health_check()
        .await
        .map(|_| ())
        .map_err(|e| StoreError::Unavailable(format!("Qdrant health check failed: {}", e)))
}

fn point_id(key: &str) -> StoreResult<PointId> {
    key.parse::<u64>()
        .map(PointId::from)
        .map_err(|_| StoreError::InvalidKey(key.to_string()))
}

fn point_key(id: Option<PointId>) -> Option<String> {
    match id?.point_id_options? {
        PointIdOptions::Num(num) => Some(num.to_string()),
        PointIdOptions::Uuid(uuid) => Some(uuid),
    }
}

impl QdrantEmbeddingIndex {
    pub fn new(client: Arc<Qdrant>, collection_name: impl Into<String>) -> Self {
        Self {
            client,
            collection_name: collection_name.into(),
        }
    }

    /// Create the collection with [`EMBEDDING_DIM`]-sized dot-product vectors if missing
    pub async fn ensure_collection(&self) -> StoreResult<()> {
        let exists = self
            .client
            .collection_exists(&self.collection_name)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to list collections: {}", e)))?;

        if exists {
            debug!(collection = %self.collection_name, "Collection already exists");
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name).vectors_config(
                    VectorParamsBuilder::new(EMBEDDING_DIM as u64, Distance::Dot),
                ),
            )
            .await
            .map_err(|e| {
                StoreError::RequestFailed(format!("Failed to create collection: {}", e))
            })?;

        info!(
            collection = %self.collection_name,
            dimension = EMBEDDING_DIM,
            "Created embedding collection"
        );
        Ok(())
    }
}

#[async_trait]
impl EmbeddingIndex for QdrantEmbeddingIndex {
    fn name(&self) -> &str {
        &self.collection_name
    }

    async fn fetch(&self, ids: &[String]) -> StoreResult<HashMap<String, Vec<f32>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let point_ids = ids
            .iter()
            .map(|id| point_id(id))
            .collect::<StoreResult<Vec<_>>>()?;

        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(&self.collection_name, point_ids)
                    .with_vectors(true)
                    .with_payload(false),
            )
            .await
            .map_err(|e| StoreError::RequestFailed(format!("Failed to fetch points: {}", e)))?;

        let mut found = HashMap::with_capacity(response.result.len());
        for point in response.result {
            let Some(key) = point_key(point.id) else {
                continue;
            };
            match point.vectors.and_then(|v| v.vectors_options) {
                Some(VectorsOptions::Vector(vector)) => {
                    found.insert(key, vector.data);
                }
                _ => {
                    warn!(
                        collection = %self.collection_name,
                        key = %key,
                        "Point has no dense vector, treating as absent"
                    );
                }
            }
        }

        Ok(found)
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> StoreResult<Vec<ScoredMatch>> {
        let response = self
            .client
            .search_points(SearchPointsBuilder::new(
                &self.collection_name,
                vector.to_vec(),
                top_k as u64,
            ))
            .await
            .map_err(|e| StoreError::RequestFailed(format!("Failed to search points: {}", e)))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let score = point.score;
                point_key(point.id).map(|id| ScoredMatch { id, score })
            })
            .collect())
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> StoreResult<()> {
        check_dimension(&vector)?;

        let mut payload = Payload::new();
        payload.insert("key", id.to_string());
        let point = PointStruct::new(point_id(id)?, vector, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, vec![point]).wait(true))
            .await
            .map_err(|e| StoreError::RequestFailed(format!("Failed to upsert point: {}", e)))?;

        debug!(collection = %self.collection_name, key = %id, "Upserted embedding");
        Ok(())
    }

    async fn stats(&self) -> StoreResult<IndexStats> {
        let info = self
            .client
            .collection_info(&self.collection_name)
            .await
            .map_err(|e| {
                StoreError::RequestFailed(format!("Failed to read collection info: {}", e))
            })?;

        let count = info
            .result
            .and_then(|collection| collection.points_count)
            .unwrap_or(0);

        Ok(IndexStats { count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_from_numeric_key() {
        let id = point_id("42").unwrap();
        assert_eq!(point_key(Some(id)), Some("42".to_string()));
    }

    #[test]
    fn test_point_id_rejects_non_numeric_key() {
        assert!(matches!(point_id("abc"), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn test_point_key_missing() {
        assert_eq!(point_key(None), None);
    }

    #[tokio::test]
    #[ignore] // Requires a running Qdrant instance
    async fn test_qdrant_round_trip() {
        let url = std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".into());
        let client = connect(&url, None).unwrap();
        let index = QdrantEmbeddingIndex::new(client, "test-user-embeddings");
        index.ensure_collection().await.unwrap();

        let vector: Vec<f32> = (0..EMBEDDING_DIM).map(|i| i as f32 / 64.0).collect();
        index.upsert("7", vector.clone()).await.unwrap();

        let found = index.fetch(&["7".to_string()]).await.unwrap();
        assert_eq!(found.get("7").map(Vec::len), Some(EMBEDDING_DIM));
    }
}
