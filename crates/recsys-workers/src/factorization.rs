//! Truncated SVD of the interaction matrix
//!
//! Randomized range finder with power iterations, followed by a Rayleigh-Ritz
//! step whose small symmetric eigenproblem is solved with cyclic Jacobi
//! rotations. The random test matrix comes from a fixed seed and the sparse
//! products iterate cells in a fixed order, so identical matrices always
//! produce identical embeddings.
//!
//! User embeddings are the row projections `U_r * S_r`, movie embeddings are
//! the component loadings `V_r`. When the matrix has fewer users or movies than
//! the requested rank, the effective rank is `min(rank, users, movies)` and the
//! trailing components are zero.

use crate::error::ComputationError;
use crate::matrix::InteractionMatrix;
use crate::types::EMBEDDING_DIM;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_JACOBI_SWEEPS: usize = 100;
const JACOBI_TOLERANCE: f64 = 1e-12;
const ZERO_NORM: f64 = 1e-12;

/// Factorization parameters
#[derive(Debug, Clone)]
pub struct FactorizationConfig {
    /// Number of latent components (embedding dimension)
    pub rank: usize,
    /// Seed for the random test matrix
    pub seed: u64,
    /// Power iterations of the range finder
    pub power_iterations: usize,
    /// Extra sampled directions beyond `rank`
    pub oversamples: usize,
}

impl Default for FactorizationConfig {
    fn default() -> Self {
        Self {
            rank: EMBEDDING_DIM,
            seed: 42,
            power_iterations: 5,
            oversamples: 10,
        }
    }
}

/// Result of one factorization
#[derive(Debug, Clone, PartialEq)]
pub struct Factors {
    /// [num_users x rank]
    pub user_embeddings: Array2<f32>,
    /// [num_movies x rank]
    pub movie_embeddings: Array2<f32>,
    /// Leading singular values, descending, length = effective rank
    pub singular_values: Vec<f64>,
}

impl Factors {
    pub fn effective_rank(&self) -> usize {
        self.singular_values.len()
    }

    pub fn user_embedding(&self, user_idx: usize) -> Option<Vec<f32>> {
        (user_idx < self.user_embeddings.nrows())
            .then(|| self.user_embeddings.row(user_idx).to_vec())
    }

    pub fn movie_embedding(&self, movie_idx: usize) -> Option<Vec<f32>> {
        (movie_idx < self.movie_embeddings.nrows())
            .then(|| self.movie_embeddings.row(movie_idx).to_vec())
    }
}

/// Deterministic truncated SVD engine
#[derive(Debug, Clone, Default)]
pub struct FactorizationEngine {
    config: FactorizationConfig,
}

impl FactorizationEngine {
    pub fn new(config: FactorizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FactorizationConfig {
        &self.config
    }

    /// Decompose the full matrix into user and movie embeddings
    pub fn factorize(&self, matrix: &InteractionMatrix) -> Result<Factors, ComputationError> {
        let (m, n) = matrix.shape();
        let k = self.config.rank;

        if m == 0 || n == 0 || k == 0 {
            return Err(ComputationError::EmptyMatrix { rows: m, cols: n });
        }
        if let Some((row, col, _)) = matrix.iter().find(|(_, _, v)| !v.is_finite()) {
            return Err(ComputationError::NonFiniteInput { row, col });
        }

        let r = k.min(m).min(n);
        let l = (r + self.config.oversamples).min(m.min(n));

        // Range finder: Q spans an approximation of the column space of A
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let omega = Array2::from_shape_fn((n, l), |_| rng.gen_range(-1.0..1.0));
        let mut q = orthonormalize(multiply(matrix, &omega, m));
        for _ in 0..self.config.power_iterations {
            let z = orthonormalize(multiply_transposed(matrix, &q, n));
            q = orthonormalize(multiply(matrix, &z, m));
        }

        // B^T = A^T Q, and B B^T = (B^T)^T B^T is the small l x l eigenproblem
        let bt = multiply_transposed(matrix, &q, n);
        let gram = bt.t().dot(&bt);
        let (eigenvalues, eigenvectors) = jacobi_eigen(gram)?;

        let mut order: Vec<usize> = (0..l).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]).then(a.cmp(&b)));

        let mut user_embeddings = Array2::<f32>::zeros((m, k));
        let mut movie_embeddings = Array2::<f32>::zeros((n, k));
        let mut singular_values = Vec::with_capacity(r);
        let sigma_floor = ZERO_NORM * eigenvalues[order[0]].max(0.0).sqrt().max(1.0);

        for (component, &idx) in order.iter().take(r).enumerate() {
            let sigma = eigenvalues[idx].max(0.0).sqrt();
            singular_values.push(sigma);
            if sigma <= sigma_floor {
                continue;
            }

            let w = eigenvectors.column(idx);
            let mut u = q.dot(&w);
            let mut v = bt.dot(&w) / sigma;

            // Sign convention: largest-magnitude movie loading is positive
            let pivot = v
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            if v[pivot] < 0.0 {
                u.mapv_inplace(|x| -x);
                v.mapv_inplace(|x| -x);
            }

            for (i, value) in u.iter().enumerate() {
                user_embeddings[[i, component]] = (value * sigma) as f32;
            }
            for (j, value) in v.iter().enumerate() {
                movie_embeddings[[j, component]] = *value as f32;
            }
        }

        if user_embeddings.iter().any(|x| !x.is_finite())
            || movie_embeddings.iter().any(|x| !x.is_finite())
        {
            return Err(ComputationError::NonFiniteOutput);
        }

        let factors = Factors {
            user_embeddings,
            movie_embeddings,
            singular_values,
        };

        tracing::debug!(
            num_users = m,
            num_movies = n,
            effective_rank = r,
            loss = reconstruction_loss(matrix, &factors),
            "Factorized interaction matrix"
        );

        Ok(factors)
    }
}

/// Mean squared error of the rank-r reconstruction over stored cells
pub fn reconstruction_loss(matrix: &InteractionMatrix, factors: &Factors) -> f32 {
    let mut loss = 0.0;
    let mut count = 0;

    for (u, i, rating) in matrix.iter() {
        let prediction = factors
            .user_embeddings
            .row(u)
            .dot(&factors.movie_embeddings.row(i));
        loss += (rating - prediction).powi(2);
        count += 1;
    }

    if count > 0 {
        loss / count as f32
    } else {
        0.0
    }
}

/// A * X for X with one row per movie
fn multiply(matrix: &InteractionMatrix, x: &Array2<f64>, rows: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((rows, x.ncols()));
    for (u, i, value) in matrix.iter() {
        out.row_mut(u).scaled_add(value as f64, &x.row(i));
    }
    out
}

/// A^T * X for X with one row per user
fn multiply_transposed(matrix: &InteractionMatrix, x: &Array2<f64>, cols: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((cols, x.ncols()));
    for (u, i, value) in matrix.iter() {
        out.row_mut(i).scaled_add(value as f64, &x.row(u));
    }
    out
}

/// Modified Gram-Schmidt; columns that vanish become zero columns
fn orthonormalize(mut a: Array2<f64>) -> Array2<f64> {
    let cols = a.ncols();
    for j in 0..cols {
        for i in 0..j {
            let qi = a.column(i).to_owned();
            let projection = qi.dot(&a.column(j));
            a.column_mut(j).scaled_add(-projection, &qi);
        }

        let norm = a.column(j).dot(&a.column(j)).sqrt();
        if norm > ZERO_NORM {
            a.column_mut(j).mapv_inplace(|x| x / norm);
        } else {
            a.column_mut(j).fill(0.0);
        }
    }
    a
}

/// Eigen decomposition of a symmetric matrix by cyclic Jacobi rotations
///
/// Returns eigenvalues and the matrix whose columns are the eigenvectors.
fn jacobi_eigen(mut a: Array2<f64>) -> Result<(Array1<f64>, Array2<f64>), ComputationError> {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);
    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt();

    if !scale.is_finite() {
        return Err(ComputationError::NonFiniteOutput);
    }

    for _ in 0..MAX_JACOBI_SWEEPS {
        let off_diagonal: f64 = (0..n)
            .flat_map(|p| (0..n).filter(move |&q| q != p).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]] * a[[p, q]])
            .sum::<f64>()
            .sqrt();

        if off_diagonal <= JACOBI_TOLERANCE * scale || scale == 0.0 {
            return Ok((a.diag().to_owned(), v));
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }

                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    Err(ComputationError::NoConvergence {
        sweeps: MAX_JACOBI_SWEEPS,
    })
}
