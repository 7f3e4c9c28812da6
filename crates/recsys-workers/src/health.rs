//! Health endpoints
//!
//! `/health` always answers while the process is up and reports per-worker
//! counters. `/ready` turns 503 once any worker has hit a fatal failure.

use crate::consumer::{ConsumerStats, ConsumerStatsSnapshot};
use actix_web::{dev::Server, web, App, HttpResponse, HttpServer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared state behind the health endpoints
#[derive(Clone)]
pub struct HealthState {
    started_at: DateTime<Utc>,
    workers: Vec<(&'static str, Arc<ConsumerStats>)>,
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    started_at: DateTime<Utc>,
    workers: BTreeMap<&'static str, ConsumerStatsSnapshot>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            workers: Vec::new(),
        }
    }

    pub fn with_worker(mut self, name: &'static str, stats: Arc<ConsumerStats>) -> Self {
        self.workers.push((name, stats));
        self
    }

    fn snapshots(&self) -> BTreeMap<&'static str, ConsumerStatsSnapshot> {
        self.workers
            .iter()
            .map(|(name, stats)| (*name, stats.snapshot()))
            .collect()
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

async fn health_check(state: web::Data<HealthState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthReport {
        status: "healthy",
        service: "recsys-worker",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        workers: state.snapshots(),
    })
}

async fn readiness_check(state: web::Data<HealthState>) -> HttpResponse {
    let failed: Vec<&str> = state
        .snapshots()
        .into_iter()
        .filter(|(_, snapshot)| snapshot.fatal > 0)
        .map(|(name, _)| name)
        .collect();

    if failed.is_empty() {
        HttpResponse::Ok().json(serde_json::json!({ "status": "ready" }))
    } else {
        HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "not_ready",
            "failed_workers": failed
        }))
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check));
}

/// Bind the health server; the returned server must be awaited or spawned
pub fn start_server(state: HealthState, host: &str, port: u16) -> std::io::Result<Server> {
    let data = web::Data::new(state);
    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .workers(1)
        .disable_signals()
        .bind((host, port))?
        .run();
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Delivery, InMemoryBroker, MessageBroker};
    use crate::consumer::{Consumer, MessageHandler, MessageOutcome};
    use crate::shutdown::ShutdownCoordinator;
    use actix_web::{http::StatusCode, test};
    use async_trait::async_trait;

    struct AlwaysFatal;

    #[async_trait]
    impl MessageHandler for AlwaysFatal {
        fn name(&self) -> &'static str {
            "doomed"
        }

        fn queue(&self) -> &'static str {
            "doomed"
        }

        async fn handle(&self, _delivery: &Delivery) -> MessageOutcome {
            MessageOutcome::Fatal("always".into())
        }
    }

    #[actix_rt::test]
    async fn test_health_reports_workers() {
        let state = HealthState::new().with_worker("training", Arc::new(ConsumerStats::default()));
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "recsys-worker");
        assert_eq!(body["workers"]["training"]["received"], 0);
    }

    #[actix_rt::test]
    async fn test_ready_turns_unavailable_after_fatal() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.declare("doomed").await.unwrap();
        broker.publish("doomed", b"x").await.unwrap();

        let consumer = Consumer::new(broker, Arc::new(AlwaysFatal));
        let coordinator = ShutdownCoordinator::default();
        let _ = consumer.run(coordinator.register_task("doomed")).await;

        let state = HealthState::new().with_worker("doomed", consumer.stats());
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/ready").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_rt::test]
    async fn test_ready_with_no_failures() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(HealthState::default()))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/ready").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
