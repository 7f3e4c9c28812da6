//! Worker configuration
//!
//! Layers, lowest first: built-in defaults, optional `config/recsys.{toml,yaml,json}`,
//! then `RECSYS__`-prefixed environment variables with `__` between nested keys
//! (for example `RECSYS__INFERENCE__TOP_K=20`).

use crate::error::ConfigError;
use crate::factorization::FactorizationConfig;
use crate::recommendation::MergePolicy;
use crate::retry::RetryPolicy;
use crate::shutdown::ShutdownConfig;
use crate::types::EMBEDDING_DIM;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "config/recsys";
const ENV_PREFIX: &str = "RECSYS";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub qdrant: QdrantConfig,
    pub catalog: CatalogConfig,
    pub training: TrainingConfig,
    pub inference: InferenceConfig,
    pub runtime: RuntimeConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,

    /// Prepended to queue names as `<prefix>:<queue>`; empty keeps bare names
    pub stream_prefix: String,

    /// Consumer group of the training workers
    pub training_group: String,

    /// Consumer group of the inference workers
    pub inference_group: String,

    /// Stable per-process consumer name; replicas must use distinct names
    pub consumer_name: String,

    /// How long one receive blocks waiting for a message
    pub block_ms: u64,

    /// Approximate `MAXLEN` applied on publish; unset leaves streams untrimmed
    pub max_stream_length: Option<usize>,

    /// Delete entries from their stream once settled
    pub delete_on_settle: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            stream_prefix: String::new(),
            training_group: "training-workers".to_string(),
            inference_group: "inference-workers".to_string(),
            consumer_name: "worker-0".to_string(),
            block_ms: 1000,
            max_stream_length: Some(100_000),
            delete_on_settle: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QdrantConfig {
    /// gRPC endpoint
    pub url: String,
    pub user_collection: String,
    pub movie_collection: String,
    pub api_key: Option<String>,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            user_collection: "user-embeddings".to_string(),
            movie_collection: "movie-embeddings".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub metadata_path: String,
    pub popular_path: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            metadata_path: "movie_data/movie_metadata.json".to_string(),
            popular_path: "movie_data/popular_movies.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub enabled: bool,
    pub rank: usize,
    pub seed: u64,
    pub power_iterations: usize,
    pub oversamples: usize,
    /// Per-axis ceiling on user and movie ids
    pub max_dimension: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let factorization = FactorizationConfig::default();
        Self {
            enabled: true,
            rank: factorization.rank,
            seed: factorization.seed,
            power_iterations: factorization.power_iterations,
            oversamples: factorization.oversamples,
            max_dimension: crate::training::DEFAULT_MAX_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub enabled: bool,
    pub top_k: usize,
    pub merge_policy: MergePolicy,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            top_k: crate::recommendation::DEFAULT_TOP_K,
            merge_policy: MergePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bound on every vector store and broker call
    pub operation_timeout_ms: u64,
    pub connect_attempts: u32,
    pub connect_delay_ms: u64,
    pub drain_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 10_000,
            connect_attempts: 3,
            connect_delay_ms: 3_000,
            drain_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

impl AppConfig {
    /// Load from `config/recsys.*` and the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_FILE, None)
    }

    /// Load from an explicit file and, when given, an explicit environment map
    pub fn load_from(
        file: &str,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name(file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, message: &str| {
            Err(ConfigError::Invalid {
                key,
                message: message.to_string(),
            })
        };

        if self.redis.url.is_empty() {
            return invalid("redis.url", "must not be empty");
        }
        if self.redis.consumer_name.is_empty() {
            return invalid("redis.consumer_name", "must not be empty");
        }
        if self.redis.max_stream_length == Some(0) {
            return invalid("redis.max_stream_length", "must be positive when set");
        }
        if self.qdrant.url.is_empty() {
            return invalid("qdrant.url", "must not be empty");
        }
        if self.training.rank != EMBEDDING_DIM {
            return invalid("training.rank", "must match the stored embedding dimension (64)");
        }
        if self.training.max_dimension == 0 {
            return invalid("training.max_dimension", "must be positive");
        }
        if self.inference.top_k == 0 {
            return invalid("inference.top_k", "must be positive");
        }
        if self.runtime.operation_timeout_ms == 0 {
            return invalid("runtime.operation_timeout_ms", "must be positive");
        }
        if self.redis.training_group == self.redis.inference_group {
            return invalid("redis.inference_group", "must differ from redis.training_group");
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.operation_timeout_ms)
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.redis.block_ms)
    }

    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.runtime.connect_attempts,
            Duration::from_millis(self.runtime.connect_delay_ms),
        )
    }

    pub fn shutdown(&self) -> ShutdownConfig {
        ShutdownConfig {
            drain_timeout: Duration::from_millis(self.runtime.drain_timeout_ms),
        }
    }

    pub fn factorization(&self) -> FactorizationConfig {
        FactorizationConfig {
            rank: self.training.rank,
            seed: self.training.seed,
            power_iterations: self.training.power_iterations,
            oversamples: self.training.oversamples,
        }
    }
}
