//! Error types for the embedding workers
//!
//! Each boundary (vector store, broker, factorization, payload parsing) has its
//! own error enum. The consumer dispatcher classifies them into a
//! [`MessageOutcome`](crate::consumer::MessageOutcome).

use std::time::Duration;

/// Vector store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    #[error("Vector store operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid embedding key: {0}")]
    InvalidKey(String),

    #[error("Embedding missing for '{0}'")]
    MissingEmbedding(String),

    #[error("Vector store request failed: {0}")]
    RequestFailed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Message broker errors
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Broker connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to declare queue '{queue}': {reason}")]
    DeclareFailed { queue: String, reason: String },

    #[error("Failed to receive from '{queue}': {reason}")]
    ReceiveFailed { queue: String, reason: String },

    #[error("Failed to settle message {id}: {reason}")]
    SettleFailed { id: String, reason: String },

    #[error("Failed to publish to '{queue}': {reason}")]
    PublishFailed { queue: String, reason: String },

    #[error("Broker operation timed out after {0:?}")]
    Timeout(Duration),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Factorization failures. These are fatal to the training worker.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComputationError {
    #[error("Cannot factorize an empty {rows}x{cols} matrix")]
    EmptyMatrix { rows: usize, cols: usize },

    #[error("Matrix contains a non-finite value at ({row}, {col})")]
    NonFiniteInput { row: usize, col: usize },

    #[error("Eigen decomposition did not converge after {sweeps} sweeps")]
    NoConvergence { sweeps: usize },

    #[error("Factorization produced non-finite output")]
    NonFiniteOutput,

    #[error("Factorization task aborted: {0}")]
    Aborted(String),
}

/// Payload errors: the message is dropped, processing continues
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Catalog loading errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration for '{key}': {message}")]
    Invalid { key: &'static str, message: String },
}

/// Reasons a consumer loop terminates abnormally
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Fatal error while processing message {message_id}: {reason}")]
    Fatal { message_id: String, reason: String },

    #[error("Broker failure: {0}")]
    Broker(#[from] BrokerError),

    #[error("Vector store failure: {0}")]
    Store(#[from] StoreError),
}
