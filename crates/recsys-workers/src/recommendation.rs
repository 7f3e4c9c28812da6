//! Model + popularity recommendation
//!
//! Candidates come from two sources: the movies whose embeddings score highest
//! against the user's embedding, and the head of the static popularity list.
//! The two lists are merged according to a [`MergePolicy`] and cut to `top_k`.

use crate::catalog::MovieCatalog;
use crate::error::StoreResult;
use crate::store::EmbeddingStore;
use crate::types::embedding_key;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of recommended movies
pub const DEFAULT_TOP_K: usize = 10;

/// How model and popularity candidates are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Deduplicated union in ascending id order; neither source is preferred
    #[default]
    SetUnion,
    /// Model matches in score order, then unseen popular ids
    ModelFirst,
}

/// Combine both candidate lists into at most `top_k` distinct ids
pub fn merge_candidates(
    model_ids: &[u64],
    popular_ids: &[u64],
    top_k: usize,
    policy: MergePolicy,
) -> Vec<u64> {
    match policy {
        MergePolicy::SetUnion => model_ids
            .iter()
            .chain(popular_ids)
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(top_k)
            .collect(),
        MergePolicy::ModelFirst => {
            let mut seen = HashSet::new();
            model_ids
                .iter()
                .chain(popular_ids)
                .copied()
                .filter(|id| seen.insert(*id))
                .take(top_k)
                .collect()
        }
    }
}

/// Recommended movies with their display titles, index-aligned
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Recommendation {
    pub movie_ids: Vec<u64>,
    pub titles: Vec<String>,
}

impl Recommendation {
    pub fn is_empty(&self) -> bool {
        self.movie_ids.is_empty()
    }
}

pub struct RecommendationEngine {
    store: EmbeddingStore,
    catalog: Arc<MovieCatalog>,
    top_k: usize,
    policy: MergePolicy,
}

impl RecommendationEngine {
    pub fn new(store: EmbeddingStore, catalog: Arc<MovieCatalog>) -> Self {
        Self {
            store,
            catalog,
            top_k: DEFAULT_TOP_K,
            policy: MergePolicy::default(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Recommend movies for a user
    ///
    /// `None` when the user has no embedding. A known user always gets
    /// `Some`, even if both candidate sources came up empty.
    pub async fn recommend(&self, user_id: u64) -> StoreResult<Option<Recommendation>> {
        let Some(user_embedding) = self.store.users().fetch_one(&embedding_key(user_id)).await?
        else {
            warn!(user_id, "No embedding found for user");
            return Ok(None);
        };

        let matches = self.store.movies().query(&user_embedding, self.top_k).await?;
        let model_ids: Vec<u64> = matches
            .iter()
            .filter_map(|m| match m.id.parse::<u64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(key = %m.id, "Ignoring movie match with non-numeric key");
                    None
                }
            })
            .collect();

        let popular_ids = self.catalog.top_popular(self.top_k);
        let movie_ids = merge_candidates(&model_ids, popular_ids, self.top_k, self.policy);
        let titles = movie_ids
            .iter()
            .map(|id| self.catalog.title(*id).to_string())
            .collect();

        debug!(
            user_id,
            model_matches = model_ids.len(),
            popular = popular_ids.len(),
            combined = movie_ids.len(),
            "Merged recommendation candidates"
        );

        Ok(Some(Recommendation { movie_ids, titles }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MovieMetadata, EMBEDDING_DIM};
    use std::collections::HashMap;

    fn axis(i: usize, weight: f32) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[i] = weight;
        v
    }

    #[test]
    fn test_set_union_is_sorted_and_deduplicated() {
        let merged = merge_candidates(&[30, 10, 20], &[20, 5, 40], 10, MergePolicy::SetUnion);
        assert_eq!(merged, vec![5, 10, 20, 30, 40]);
    }

    #[test]
    fn test_set_union_truncates_to_top_k() {
        let popular: Vec<u64> = (100..110).collect();
        let merged = merge_candidates(&[1, 2, 3], &popular, 10, MergePolicy::SetUnion);
        assert_eq!(merged.len(), 10);
        assert_eq!(&merged[..3], &[1, 2, 3]);
    }

    #[test]
    fn test_model_first_keeps_model_order() {
        let merged = merge_candidates(&[30, 10], &[10, 5, 40], 4, MergePolicy::ModelFirst);
        assert_eq!(merged, vec![30, 10, 5, 40]);
    }

    #[test]
    fn test_merge_never_exceeds_top_k() {
        for top_k in 0..6 {
            for policy in [MergePolicy::SetUnion, MergePolicy::ModelFirst] {
                let merged = merge_candidates(&[1, 2, 3], &[3, 4, 5, 6], top_k, policy);
                assert!(merged.len() <= top_k);
            }
        }
    }

    #[test]
    fn test_policy_deserializes_from_snake_case() {
        let policy: MergePolicy = serde_json::from_str("\"model_first\"").unwrap();
        assert_eq!(policy, MergePolicy::ModelFirst);
        assert_eq!(MergePolicy::default(), MergePolicy::SetUnion);
    }

    #[tokio::test]
    async fn test_unknown_user_yields_no_recommendation() {
        let engine = RecommendationEngine::new(
            EmbeddingStore::in_memory(),
            Arc::new(MovieCatalog::new(HashMap::new(), vec![1, 2, 3])),
        );

        assert!(engine.recommend(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_known_user_without_candidates_is_some_and_empty() {
        let store = EmbeddingStore::in_memory();
        store.users().upsert("7", axis(0, 1.0)).await.unwrap();
        let engine =
            RecommendationEngine::new(store, Arc::new(MovieCatalog::new(HashMap::new(), vec![])));

        let recommendation = engine.recommend(7).await.unwrap().unwrap();
        assert!(recommendation.is_empty());
        assert!(recommendation.titles.is_empty());
    }

    #[tokio::test]
    async fn test_titles_follow_ids_with_unknown_default() {
        let store = EmbeddingStore::in_memory();
        store.users().upsert("1", axis(0, 1.0)).await.unwrap();
        store.movies().upsert("7", axis(0, 2.0)).await.unwrap();

        let mut metadata = HashMap::new();
        metadata.insert(
            7,
            MovieMetadata {
                title: "Heat".to_string(),
                genres: serde_json::Value::Null,
            },
        );
        let catalog = Arc::new(MovieCatalog::new(metadata, vec![3]));

        let engine = RecommendationEngine::new(store, catalog).with_top_k(5);
        let recommendation = engine.recommend(1).await.unwrap().unwrap();

        assert_eq!(recommendation.movie_ids, vec![3, 7]);
        assert_eq!(recommendation.titles, vec!["Unknown", "Heat"]);
    }
}
