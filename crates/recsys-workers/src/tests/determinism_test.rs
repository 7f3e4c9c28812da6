//! Reproducibility of the factorization across engine instances and stores

use crate::broker::Delivery;
use crate::consumer::MessageHandler;
use crate::factorization::{FactorizationConfig, FactorizationEngine};
use crate::matrix::InteractionMatrix;
use crate::store::EmbeddingStore;
use crate::training::TrainingConsumer;
use crate::types::TRAINING_QUEUE;

fn sample_matrix() -> InteractionMatrix {
    let mut matrix = InteractionMatrix::with_shape(1, 1);
    for u in 0..40 {
        for m in 0..25 {
            if (u * 13 + m * 7) % 6 == 0 {
                matrix = matrix.set(u, m, ((u * m) % 9) as f32 * 0.5 + 0.5);
            }
        }
    }
    matrix
}

#[test]
fn test_separate_engines_agree_bit_for_bit() {
    let matrix = sample_matrix();
    let a = FactorizationEngine::new(FactorizationConfig::default())
        .factorize(&matrix)
        .unwrap();
    let b = FactorizationEngine::new(FactorizationConfig::default())
        .factorize(&matrix)
        .unwrap();

    assert_eq!(a.user_embeddings, b.user_embeddings);
    assert_eq!(a.movie_embeddings, b.movie_embeddings);
    assert_eq!(a.singular_values, b.singular_values);
}

#[test]
fn test_singular_values_descend() {
    let factors = FactorizationEngine::default()
        .factorize(&sample_matrix())
        .unwrap();

    assert!(factors.effective_rank() > 0);
    assert!(factors.effective_rank() <= 25);
    for pair in factors.singular_values.windows(2) {
        assert!(pair[0] >= pair[1]);
    }
}

#[tokio::test]
async fn test_same_event_same_embeddings_in_fresh_stores() {
    let body = br#"{"userId": 3, "movieId": 8, "rating": 3.5}"#;
    let delivery = Delivery {
        queue: TRAINING_QUEUE.to_string(),
        id: "1-0".to_string(),
        body: body.to_vec(),
    };

    let mut results = Vec::new();
    for _ in 0..2 {
        let store = EmbeddingStore::in_memory();
        let consumer = TrainingConsumer::new(store.clone(), FactorizationEngine::default());
        consumer.handle(&delivery).await;
        results.push((
            store.users().fetch_one("3").await.unwrap().unwrap(),
            store.movies().fetch_one("8").await.unwrap().unwrap(),
        ));
    }

    assert_eq!(results[0], results[1]);
}
