//! Sparse user-movie interaction matrix
//!
//! The matrix is rebuilt at the start of every training cycle from the user and
//! movie counts reported by the embedding store, then grown in place as rating
//! events land outside its current bounds.

use crate::store::EmbeddingStore;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Sparse user x movie rating matrix
///
/// Entries live in an ordered map so that iteration (and therefore floating
/// point accumulation during factorization) is reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionMatrix {
    /// (user_index, movie_index) -> rating
    entries: BTreeMap<(usize, usize), f32>,
    num_users: usize,
    num_movies: usize,
}

impl InteractionMatrix {
    /// Create an empty matrix with the given bounds
    pub fn with_shape(num_users: usize, num_movies: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            num_users,
            num_movies,
        }
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_movies(&self) -> usize {
        self.num_movies
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.num_users, self.num_movies)
    }

    /// Number of explicitly stored cells
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, user_idx: usize, movie_idx: usize) -> bool {
        user_idx < self.num_users && movie_idx < self.num_movies
    }

    /// Rating at a cell, 0.0 when unset or out of bounds
    pub fn get(&self, user_idx: usize, movie_idx: usize) -> f32 {
        *self.entries.get(&(user_idx, movie_idx)).unwrap_or(&0.0)
    }

    /// Stored cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.entries.iter().map(|(&(u, m), &v)| (u, m, v))
    }

    /// Write a rating, expanding the bounds when the cell lies outside them
    ///
    /// An in-bounds write mutates in place. An out-of-bounds write allocates a
    /// matrix with bounds `max(current, id + 1)` per axis and copies every
    /// existing cell to the same coordinates before setting the new one, so the
    /// shape never shrinks and no cell is lost.
    pub fn set(mut self, user_idx: usize, movie_idx: usize, rating: f32) -> Self {
        if self.contains(user_idx, movie_idx) {
            self.entries.insert((user_idx, movie_idx), rating);
            return self;
        }

        let num_users = self.num_users.max(user_idx + 1);
        let num_movies = self.num_movies.max(movie_idx + 1);
        let mut expanded = Self::with_shape(num_users, num_movies);
        expanded.entries.extend(self.entries.iter());
        expanded.entries.insert((user_idx, movie_idx), rating);

        info!(
            from_users = self.num_users,
            from_movies = self.num_movies,
            num_users,
            num_movies,
            "Expanded interaction matrix"
        );

        expanded
    }
}

/// Builds the working matrix for one training cycle
pub struct InteractionStore {
    store: EmbeddingStore,
}

impl InteractionStore {
    pub fn new(store: EmbeddingStore) -> Self {
        Self { store }
    }

    /// Reconstruct an empty matrix sized from the store's embedding counts
    ///
    /// Falls back to 1x1 when the store cannot report counts or reports zero,
    /// which is the expected state of a freshly created store.
    pub async fn load(&self) -> InteractionMatrix {
        let users = self.store.users().stats().await;
        let movies = self.store.movies().stats().await;

        match (users, movies) {
            (Ok(user_stats), Ok(movie_stats)) => {
                let num_users = (user_stats.count as usize).max(1);
                let num_movies = (movie_stats.count as usize).max(1);
                info!(num_users, num_movies, "Initialized interaction matrix");
                InteractionMatrix::with_shape(num_users, num_movies)
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to read index stats, starting from a 1x1 matrix");
                InteractionMatrix::with_shape(1, 1)
            }
        }
    }

    /// Write one rating into the matrix
    pub fn set(
        &self,
        matrix: InteractionMatrix,
        user_id: usize,
        movie_id: usize,
        rating: f32,
    ) -> InteractionMatrix {
        matrix.set(user_id, movie_id, rating)
    }
}
