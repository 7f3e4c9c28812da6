//! In-process embedding index
//!
//! Exact dot-product search over a concurrent map, matching the scoring of
//! the Qdrant collections. Used by tests.

use super::{check_dimension, EmbeddingIndex, IndexStats, ScoredMatch};
use crate::error::StoreResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

pub struct InMemoryEmbeddingIndex {
    name: String,
    vectors: DashMap<String, Vec<f32>>,
}

impl InMemoryEmbeddingIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vectors: DashMap::new(),
        }
    }
}

/// Dot product, 0.0 for mismatched lengths
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl EmbeddingIndex for InMemoryEmbeddingIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, ids: &[String]) -> StoreResult<HashMap<String, Vec<f32>>> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.vectors
                    .get(id)
                    .map(|entry| (id.clone(), entry.value().clone()))
            })
            .collect())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> StoreResult<Vec<ScoredMatch>> {
        let mut matches: Vec<ScoredMatch> = self
            .vectors
            .iter()
            .map(|entry| ScoredMatch {
                id: entry.key().clone(),
                score: dot_product(vector, entry.value()),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> StoreResult<()> {
        check_dimension(&vector)?;
        self.vectors.insert(id.to_string(), vector);
        Ok(())
    }

    async fn stats(&self) -> StoreResult<IndexStats> {
        Ok(IndexStats {
            count: self.vectors.len() as u64,
        })
    }
}
