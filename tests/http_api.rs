//! HTTP surface tests: validation, authentication, saturation, and the
//! guarded recovery endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use serde_json::json;
use tower::ServiceExt;

use cashbox_ingest::config::{AuthConfig, IngestConfig, QueueConfig, WebhookConfig};
use cashbox_ingest::pipeline::{
    ExportSink, Pipeline, PipelineError, PipelineRun, TransactionExporter,
};
use cashbox_ingest::IngestSystem;

/// Pipeline double that parks until the gate is released.
struct GatedPipeline {
    gate: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl Pipeline for GatedPipeline {
    async fn run(
        &self,
        _date: NaiveDate,
        _source: Option<&str>,
    ) -> Result<PipelineRun, PipelineError> {
        self.gate.notified().await;
        Ok(PipelineRun {
            files_processed: 0,
            files_skipped: 0,
            transactions_loaded: 0,
            error_count: 0,
            per_table: HashMap::new(),
        })
    }
}

struct NoopExporter;

#[async_trait]
impl TransactionExporter for NoopExporter {
    async fn export(
        &self,
        _date: NaiveDate,
        _source: Option<&str>,
        _sink: ExportSink,
    ) -> Result<u64, PipelineError> {
        Ok(0)
    }
}

fn base_config() -> IngestConfig {
    IngestConfig {
        webhook: WebhookConfig {
            // Reports go nowhere in these tests; delivery failures are
            // logged and still count as sent.
            url: "http://127.0.0.1:1/reports".to_string(),
            token: None,
            report_timeout_seconds: None,
        },
        // Gated pipelines park their workers; keep the drain deadline short
        // so shutdown does not stall the suite.
        queue: QueueConfig {
            capacity: 100,
            shutdown_timeout_seconds: 1,
        },
        ..Default::default()
    }
}

async fn system_with(config: IngestConfig) -> IngestSystem {
    IngestSystem::start(
        config,
        Arc::new(GatedPipeline {
            gate: Arc::new(tokio::sync::Notify::new()),
        }),
        Arc::new(NoopExporter),
    )
    .await
    .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_is_open() {
    let system = system_with(base_config()).await;
    let response = system
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    system.shutdown().await;
}

#[tokio::test]
async fn test_unknown_operation_is_rejected() {
    let system = system_with(base_config()).await;
    let response = system
        .router()
        .oneshot(post_json(
            "/jobs",
            json!({"date": "2024-12-01", "operation": "export"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    system.shutdown().await;
}

#[tokio::test]
async fn test_malformed_date_is_rejected() {
    let system = system_with(base_config()).await;
    let response = system
        .router()
        .oneshot(post_json(
            "/jobs",
            json!({"date": "01.12.2024", "operation": "load"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    system.shutdown().await;
}

#[tokio::test]
async fn test_saturated_queue_returns_service_unavailable() {
    let mut config = base_config();
    config.queue.capacity = 1;
    let system = system_with(config).await;
    let router = system.router();
    let state = system.state();

    // First job: enqueued, then picked up by the (gated) worker.
    let response = router
        .clone()
        .oneshot(post_json(
            "/jobs",
            json!({"date": "2024-12-01", "operation": "load"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Wait until the worker has drained it so the queue is empty again.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.manager.total_size().await != 0 {
        assert!(tokio::time::Instant::now() < deadline, "worker never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Second job fills the single slot behind the parked worker.
    let response = router
        .clone()
        .oneshot(post_json(
            "/jobs",
            json!({"date": "2024-12-01", "operation": "load"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Third job finds the queue full.
    let response = router
        .clone()
        .oneshot(post_json(
            "/jobs",
            json!({"date": "2024-12-01", "operation": "load"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Depth unchanged by the rejected submission.
    assert_eq!(state.manager.total_size().await, 1);

    system.shutdown().await;
}

#[tokio::test]
async fn test_requeue_endpoint_absent_unless_enabled() {
    let system = system_with(base_config()).await;
    let response = system
        .router()
        .oneshot(post_json(
            "/queues/requeue",
            json!({"operation": "load", "batch_size": 10}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    system.shutdown().await;
}

#[tokio::test]
async fn test_queue_status_reports_in_process_provider() {
    let system = system_with(base_config()).await;
    let response = system
        .router()
        .oneshot(
            Request::builder()
                .uri("/queues/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = http_body_util::BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes();
    let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(status["provider"], "in_process");
    assert_eq!(status["total"], 0);
    assert!(status.get("broker_queues").is_none());

    system.shutdown().await;
}

#[tokio::test]
async fn test_bearer_auth_guards_protected_endpoints() {
    let mut config = base_config();
    config.auth = AuthConfig {
        enabled: true,
        token: "secret-token".to_string(),
    };
    let system = system_with(config).await;
    let router = system.router();

    // Missing credentials.
    let response = router
        .clone()
        .oneshot(post_json(
            "/jobs",
            json!({"date": "2024-12-01", "operation": "load"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong token.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/jobs")
                .header("content-type", "application/json")
                .header("authorization", "Bearer wrong")
                .body(Body::from(
                    json!({"date": "2024-12-01", "operation": "load"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct token.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/jobs")
                .header("content-type", "application/json")
                .header("authorization", "Bearer secret-token")
                .body(Body::from(
                    json!({"date": "2024-12-01", "operation": "load"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Health stays open without credentials.
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    system.shutdown().await;
}
