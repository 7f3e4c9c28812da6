//! Wire contracts shared by the training and inference consumers

use crate::error::MessageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Length of every user and movie embedding
pub const EMBEDDING_DIM: usize = 64;

/// Queue carrying rating events from the ETL job
pub const TRAINING_QUEUE: &str = "training_data";
/// Queue carrying recommendation requests from the API backend
pub const REQUEST_QUEUE: &str = "recommendation_requests";
/// Queue receiving recommendation bundles
pub const EMBEDDINGS_QUEUE: &str = "embeddings";
/// Raw user actions; declared here, consumed by the ETL job
pub const USER_ACTIONS_QUEUE: &str = "user_actions";

/// Every queue declared at worker startup
pub const DECLARED_QUEUES: [&str; 4] = [
    TRAINING_QUEUE,
    USER_ACTIONS_QUEUE,
    EMBEDDINGS_QUEUE,
    REQUEST_QUEUE,
];

/// Key under which an id's embedding is stored
pub fn embedding_key(id: u64) -> String {
    id.to_string()
}

/// A single rating observed for a (user, movie) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingEvent {
    pub user_id: u64,
    pub movie_id: u64,
    pub rating: f32,
}

impl RatingEvent {
    /// Parse and validate a `training_data` payload
    pub fn from_slice(body: &[u8]) -> Result<Self, MessageError> {
        let event: RatingEvent = serde_json::from_slice(body)?;
        if !event.rating.is_finite() {
            return Err(MessageError::InvalidField {
                field: "rating",
                reason: format!("{} is not a finite number", event.rating),
            });
        }
        Ok(event)
    }
}

/// Request for recommendations for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub req_id: String,
    pub user_id: u64,
}

impl RecommendationRequest {
    /// Parse a `recommendation_requests` payload
    pub fn from_slice(body: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Embeddings published downstream for a handled request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationBundle {
    pub req_id: String,
    pub user_id: u64,
    pub user_embedding: Vec<f32>,
    /// Keyed by movie id; JSON object keys are strings on the wire
    pub movie_embeddings: BTreeMap<u64, Vec<f32>>,
}

/// Static metadata for one movie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieMetadata {
    pub title: String,
    #[serde(default)]
    pub genres: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_event_parses_camel_case() {
        let event =
            RatingEvent::from_slice(br#"{"userId": 5, "movieId": 12, "rating": 4.5}"#).unwrap();
        assert_eq!(event.user_id, 5);
        assert_eq!(event.movie_id, 12);
        assert_eq!(event.rating, 4.5);
    }

    #[test]
    fn test_rating_event_rejects_missing_field() {
        let result = RatingEvent::from_slice(br#"{"userId": 5, "rating": 4.5}"#);
        assert!(matches!(result, Err(MessageError::InvalidJson(_))));
    }

    #[test]
    fn test_rating_event_rejects_negative_id() {
        let result = RatingEvent::from_slice(br#"{"userId": -1, "movieId": 2, "rating": 1.0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_request_parses() {
        let request =
            RecommendationRequest::from_slice(br#"{"reqId": "abc", "userId": 7}"#).unwrap();
        assert_eq!(request.req_id, "abc");
        assert_eq!(request.user_id, 7);
    }

    #[test]
    fn test_bundle_serializes_movie_ids_as_object_keys() {
        let mut movie_embeddings = BTreeMap::new();
        movie_embeddings.insert(12, vec![0.5; 2]);
        let bundle = RecommendationBundle {
            req_id: "r-1".to_string(),
            user_id: 3,
            user_embedding: vec![1.0, 0.0],
            movie_embeddings,
        };

        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["reqId"], "r-1");
        assert_eq!(json["userId"], 3);
        assert!(json["movieEmbeddings"]["12"].is_array());

        let back: RecommendationBundle = serde_json::from_value(json).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn test_embedding_key() {
        assert_eq!(embedding_key(42), "42");
    }
}
