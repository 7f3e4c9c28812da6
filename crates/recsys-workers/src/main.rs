//! Recommendation embedding workers
//!
//! Runs the training and inference consumers in one process, with a health
//! endpoint on port 8090 by default.

use anyhow::Context;
use recsys_workers::broker::{declare_all, RedisStreamBroker};
use recsys_workers::store::qdrant;
use recsys_workers::{
    health, retry, AppConfig, Consumer, EmbeddingStore, FactorizationEngine, InferenceConsumer,
    MovieCatalog, QdrantEmbeddingIndex, RecommendationEngine, ShutdownCoordinator,
    TrainingConsumer, WorkerError, DECLARED_QUEUES,
};
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// One Redis connection per consumer group
async fn connect_broker(config: &AppConfig, group: &str) -> anyhow::Result<RedisStreamBroker> {
    let broker = retry::retry_fixed("redis", config.connect_policy(), || {
        RedisStreamBroker::connect(
            &config.redis.url,
            config.redis.stream_prefix.clone(),
            group.to_string(),
            &config.redis.consumer_name,
            config.operation_timeout(),
        )
    })
    .await
    .with_context(|| format!("Failed to connect to Redis for group {}", group))?;

    Ok(broker
        .with_max_stream_length(config.redis.max_stream_length)
        .with_delete_on_settle(config.redis.delete_on_settle))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(
        training = config.training.enabled,
        inference = config.inference.enabled,
        "Starting recommendation workers"
    );

    let catalog = Arc::new(
        MovieCatalog::load(&config.catalog.metadata_path, &config.catalog.popular_path)
            .context("Failed to load movie catalog")?,
    );

    let timeout = config.operation_timeout();
    let policy = config.connect_policy();

    let training_broker = connect_broker(&config, &config.redis.training_group).await?;
    let inference_broker = connect_broker(&config, &config.redis.inference_group).await?;

    declare_all(&training_broker, &DECLARED_QUEUES).await?;
    declare_all(&inference_broker, &DECLARED_QUEUES).await?;

    let client = qdrant::connect(&config.qdrant.url, config.qdrant.api_key.as_deref())?;
    retry::retry_fixed("qdrant", policy, || qdrant::health_check(&client))
        .await
        .context("Failed to connect to Qdrant")?;

    let users = QdrantEmbeddingIndex::new(client.clone(), config.qdrant.user_collection.clone());
    let movies = QdrantEmbeddingIndex::new(client, config.qdrant.movie_collection.clone());
    users.ensure_collection().await?;
    movies.ensure_collection().await?;
    let store = EmbeddingStore::new(Arc::new(users), Arc::new(movies)).with_timeout(timeout);

    let coordinator = ShutdownCoordinator::new(config.shutdown());
    let mut health_state = health::HealthState::new();
    let mut workers = JoinSet::new();

    if config.training.enabled {
        let handler = TrainingConsumer::new(
            store.clone(),
            FactorizationEngine::new(config.factorization()),
        )
        .with_max_dimension(config.training.max_dimension);
        let consumer = Consumer::new(Arc::new(training_broker), Arc::new(handler))
            .with_poll_wait(config.poll_wait());

        health_state = health_state.with_worker("training", consumer.stats());
        let handle = coordinator.register_task("training");
        workers.spawn(async move { consumer.run(handle).await });
    }

    if config.inference.enabled {
        let broker = Arc::new(inference_broker);
        let engine = RecommendationEngine::new(store.clone(), catalog)
            .with_top_k(config.inference.top_k)
            .with_policy(config.inference.merge_policy);
        let handler = InferenceConsumer::new(engine, store, broker.clone());
        let consumer =
            Consumer::new(broker, Arc::new(handler)).with_poll_wait(config.poll_wait());

        health_state = health_state.with_worker("inference", consumer.stats());
        let handle = coordinator.register_task("inference");
        workers.spawn(async move { consumer.run(handle).await });
    }

    let server = if config.server.enabled {
        let server =
            health::start_server(health_state, &config.server.host, config.server.port)?;
        let handle = server.handle();
        actix_web::rt::spawn(server);
        info!(
            host = %config.server.host,
            port = config.server.port,
            "Health endpoint listening"
        );
        Some(handle)
    } else {
        None
    };

    let mut failed = false;
    let mut record = |result: Result<Result<(), WorkerError>, JoinError>| match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(error = %e, "Worker failed");
            failed = true;
        }
        Err(e) => {
            error!(error = %e, "Worker task aborted");
            failed = true;
        }
    };

    tokio::select! {
        signal = coordinator.wait_for_signal() => signal?,
        Some(result) = workers.join_next() => record(result),
    }

    coordinator.trigger();
    if !coordinator.wait_for_tasks().await {
        workers.abort_all();
    }
    while let Some(result) = workers.join_next().await {
        record(result);
    }

    if let Some(handle) = server {
        handle.stop(true).await;
    }

    if failed {
        anyhow::bail!("A worker stopped with an error");
    }

    info!("Shutdown complete");
    Ok(())
}
