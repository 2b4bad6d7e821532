//! Integration tests for the verifier API endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use api::{AppState, RegistrationDefaults};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use fakes::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use verifier_lib::{
    collaborators::{InMemoryAnalysisStore, InMemoryMetricStore},
    cursor::InMemoryCursorStore,
    health::{components, HealthRegistry},
    job::{Collaborators, JobSettings},
    metadata::MetadataGraphBuilder,
    JobTable, VerificationScheduler,
};

/// Collaborator fakes for the manager and the learning engine
mod fakes {
    use anyhow::Result;
    use verifier_lib::collaborators::{
        async_trait, LearningEngine, ManagerNotifier, StateValidityOracle,
    };
    use verifier_lib::models::{LearningEngineTask, StateNotification};

    pub struct StubManager;

    #[async_trait]
    impl StateValidityOracle for StubManager {
        async fn is_state_valid(&self, _app_id: &str, _state_execution_id: &str) -> Result<bool> {
            Ok(true)
        }
    }

    #[async_trait]
    impl ManagerNotifier for StubManager {
        async fn notify(&self, _notification: &StateNotification) -> Result<()> {
            Ok(())
        }
    }

    pub struct StubEngine;

    #[async_trait]
    impl LearningEngine for StubEngine {
        async fn enqueue(&self, _task: &LearningEngineTask) -> Result<bool> {
            Ok(true)
        }

        async fn has_analysis_timed_out(&self, _: &str, _: &str, _: &str) -> Result<bool> {
            Ok(false)
        }
    }
}

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::STORE).await;

    let metric_store = Arc::new(InMemoryMetricStore::new());
    let analysis_store = Arc::new(InMemoryAnalysisStore::new());
    let table = Arc::new(JobTable::new());
    let manager = Arc::new(StubManager);
    let collaborators = Collaborators::builder()
        .oracle(manager.clone())
        .notifier(manager)
        .learning_engine(Arc::new(StubEngine))
        .metric_store(metric_store.clone())
        .analysis_store(analysis_store.clone())
        .registry(table.clone())
        .cursors(Arc::new(InMemoryCursorStore::new()))
        .build()
        .unwrap();
    let settings = JobSettings::new("verifier-test", "http://verifier:8080").unwrap();
    let scheduler = Arc::new(VerificationScheduler::new(
        table,
        collaborators,
        settings,
        health_registry.clone(),
    ));

    let state = Arc::new(AppState {
        health_registry,
        scheduler,
        metric_store,
        analysis_store,
        builder: MetadataGraphBuilder::new(),
        defaults: RegistrationDefaults::default(),
    });
    let router = api::create_router(state.clone());

    (router, state)
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn registration(state_execution_id: &str) -> Value {
    json!({
        "account_id": "acct",
        "app_id": "app",
        "workflow_id": "wf",
        "workflow_execution_id": "wf-exec",
        "state_execution_id": state_execution_id,
        "state_type": "prometheus",
        "comparison_strategy": "compare_with_current",
        "test_nodes": ["canary-1"],
        "control_nodes": ["stable-1"],
        "window": { "start_minute": 0, "duration_minutes": 10 }
    })
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let (status, health) = send(app, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;
    state
        .health_registry
        .set_unhealthy(components::STORE, "Store unreachable")
        .await;

    let (status, health) = send(app, "GET", "/healthz", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_returns_503_when_not_ready() {
    let (app, _state) = setup_test_app().await;

    let (status, readiness) = send(app, "GET", "/readyz", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
}

#[tokio::test]
async fn test_readyz_returns_ok_when_ready() {
    let (app, state) = setup_test_app().await;
    state.health_registry.set_ready(true).await;

    let (status, readiness) = send(app, "GET", "/readyz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_metrics_returns_prometheus_format() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));
}

#[tokio::test]
async fn test_register_job_applies_defaults() {
    let (app, _state) = setup_test_app().await;

    let (status, job) = send(app, "POST", "/api/v1/jobs", Some(registration("s1"))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["status"], "queued");
    assert_eq!(job["context"]["tolerance"], 0.1);
    assert_eq!(job["context"]["smooth_window"], 3);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let (app, _state) = setup_test_app().await;

    let (first, _) = send(app.clone(), "POST", "/api/v1/jobs", Some(registration("s1"))).await;
    let (second, body) = send(app, "POST", "/api/v1/jobs", Some(registration("s1"))).await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["status"], 409);
}

#[tokio::test]
async fn test_invalid_registration_is_bad_request() {
    let (app, _state) = setup_test_app().await;
    let mut body = registration("s1");
    body["test_nodes"] = json!([]);

    let (status, _) = send(app, "POST", "/api/v1/jobs", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

async fn post_heartbeats(app: Router, state: &str, minutes: std::ops::Range<i64>) {
    let heartbeats: Vec<Value> = minutes
        .map(|minute| json!({ "state_execution_id": state, "minute": minute }))
        .collect();
    let count = heartbeats.len();
    let (status, saved) = send(
        app,
        "POST",
        "/api/v1/timeseries/heartbeats",
        Some(Value::Array(heartbeats)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(saved["saved"], count);
}

#[tokio::test]
async fn test_tick_runs_job_to_completion() {
    let (app, _state) = setup_test_app().await;
    send(app.clone(), "POST", "/api/v1/jobs", Some(registration("s1"))).await;

    post_heartbeats(app.clone(), "s1", 0..6).await;
    let (_, first) = send(app.clone(), "POST", "/api/v1/jobs/s1/tick", None).await;
    assert_eq!(first["status"], "running");
    assert_eq!(first["groups"][0]["outcome"], "enqueued");
    assert_eq!(first["groups"][0]["minute"], 5);

    // the tick that processes the last window minute finishes the job
    post_heartbeats(app.clone(), "s1", 6..10).await;
    let (_, second) = send(app.clone(), "POST", "/api/v1/jobs/s1/tick", None).await;
    assert_eq!(second["status"], "success");
    assert_eq!(second["became_terminal"], true);
    assert_eq!(second["groups"][0]["minute"], 9);

    let (status, _) = send(app.clone(), "POST", "/api/v1/jobs/s1/tick", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, job) = send(app, "GET", "/api/v1/jobs/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "success");
}

#[tokio::test]
async fn test_overflowing_window_is_bad_request() {
    let (app, _state) = setup_test_app().await;
    let mut body = registration("s1");
    body["window"] = json!({ "start_minute": i64::MAX - 1, "duration_minutes": 5 });

    let (status, error) = send(app.clone(), "POST", "/api/v1/jobs", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error["error"].as_str().unwrap().contains("window"));

    let (status, _) = send(app, "GET", "/api/v1/jobs/s1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_records_round_trip_through_task_query() {
    let (app, _state) = setup_test_app().await;
    let records = json!([
        { "state_execution_id": "s1", "workflow_execution_id": "wf-exec", "host": "canary-1",
          "transaction": "/login", "metric": "latency", "value": 12.0, "minute": 1 },
        { "state_execution_id": "s1", "workflow_execution_id": "wf-exec", "host": "stable-1",
          "transaction": "/login", "metric": "latency", "value": 11.0, "minute": 1 },
        { "state_execution_id": "s1", "workflow_execution_id": "wf-exec", "host": "canary-1",
          "transaction": "/login", "metric": "latency", "value": 13.0, "minute": 8 }
    ]);
    send(app.clone(), "POST", "/api/v1/timeseries/records", Some(records)).await;

    let (status, body) = send(
        app.clone(),
        "GET",
        "/api/v1/timeseries/records?state_execution_id=s1&group_name=default&nodes=canary-1&start_minute=0&end_minute=5",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["host"], "canary-1");

    let (status, _) = send(
        app,
        "GET",
        "/api/v1/timeseries/records?start_minute=0&end_minute=5",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analysis_callback_is_stored() {
    let (app, _state) = setup_test_app().await;
    let analysis = json!({
        "state_execution_id": "s1",
        "workflow_execution_id": "wf-exec",
        "group_name": "default",
        "analysis_minute": 4,
        "source": "learning_engine",
        "risk": "medium",
        "metrics": [],
        "created_at": 0
    });

    let (status, _) = send(app.clone(), "POST", "/api/v1/analysis", Some(analysis)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, stored) = send(app, "GET", "/api/v1/analysis/s1", None).await;
    assert_eq!(stored[0]["risk"], "medium");
}

#[tokio::test]
async fn test_metadata_projection_and_mismatch() {
    let (app, _state) = setup_test_app().await;
    let pipeline = json!({
        "kind": "pipeline",
        "id": "p1",
        "name": "release",
        "status": "success",
        "stages": [{
            "definition": { "name": "deploy", "parallel": false,
                            "elements": [{ "name": "canary" }] },
            "executions": [{ "id": "e1", "status": "success" }]
        }]
    });

    let (status, metadata) = send(app.clone(), "POST", "/api/v1/metadata", Some(pipeline.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metadata["nodes"][0]["name"], "deploy");

    let mut broken = pipeline;
    broken["stages"][0]["executions"] = json!([]);
    let (status, body) = send(app, "POST", "/api/v1/metadata", Some(broken)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("deploy"));
}
