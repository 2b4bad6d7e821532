//! HTTP API for health checks, Prometheus metrics, verification jobs,
//! time-series ingestion and learning engine callbacks

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use verifier_lib::{
    collaborators::{AnalysisStore, MetricDataStore, RecordQuery, RecordScope},
    health::{ComponentStatus, HealthRegistry},
    metadata::{ExecutionRecord, MetadataGraphBuilder},
    models::{
        AnalysisRecord, ExecutionContext, FailFastRecord, HeartbeatRecord, MetricDataRecord,
        MetricGroup, DEFAULT_GROUP_NAME,
    },
    MetadataError, RegistrationError, VerificationScheduler,
};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Registration(#[from] RegistrationError),

    #[error("{0}")]
    Metadata(#[from] MetadataError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Registration(RegistrationError::AlreadyRegistered(_)) => StatusCode::CONFLICT,
            ApiError::Registration(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Metadata(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Values applied to registrations that omit them
#[derive(Debug, Clone, Copy)]
pub struct RegistrationDefaults {
    pub tolerance: f64,
    pub smooth_window: u32,
}

impl Default for RegistrationDefaults {
    fn default() -> Self {
        Self {
            tolerance: verifier_lib::models::DEFAULT_TOLERANCE,
            smooth_window: verifier_lib::models::DEFAULT_SMOOTH_WINDOW,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub scheduler: Arc<VerificationScheduler>,
    pub metric_store: Arc<dyn MetricDataStore>,
    pub analysis_store: Arc<dyn AnalysisStore>,
    pub builder: MetadataGraphBuilder,
    pub defaults: RegistrationDefaults,
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> ApiResult<impl IntoResponse> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Register a verification job; missing tolerance and smoothing fall back
/// to the service defaults
async fn register_job(
    State(state): State<Arc<AppState>>,
    Json(mut body): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let object = body
        .as_object_mut()
        .ok_or_else(|| ApiError::BadRequest("expected a JSON object".to_string()))?;
    object
        .entry("tolerance")
        .or_insert_with(|| json!(state.defaults.tolerance));
    object
        .entry("smooth_window")
        .or_insert_with(|| json!(state.defaults.smooth_window));

    let context: ExecutionContext =
        serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let snapshot = state.scheduler.register(context)?;

    Ok((StatusCode::CREATED, Json(snapshot)))
}

async fn list_jobs(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let jobs = state.scheduler.list_jobs().await;
    Json(json!({
        "jobs": jobs,
        "stats": state.scheduler.stats(),
    }))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(state_execution_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let snapshot = state
        .scheduler
        .job_snapshot(&state_execution_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job {}", state_execution_id)))?;
    Ok(Json(snapshot))
}

/// Run one tick now instead of waiting for the next scheduling pass
async fn tick_job(
    State(state): State<Arc<AppState>>,
    Path(state_execution_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state
        .scheduler
        .tick_job(&state_execution_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("active job {}", state_execution_id)))?;
    Ok(Json(report))
}

async fn save_records(
    State(state): State<Arc<AppState>>,
    Json(records): Json<Vec<MetricDataRecord>>,
) -> ApiResult<impl IntoResponse> {
    let saved = state.metric_store.save_records(records).await?;
    Ok((StatusCode::CREATED, Json(json!({ "saved": saved }))))
}

async fn save_heartbeats(
    State(state): State<Arc<AppState>>,
    Json(heartbeats): Json<Vec<HeartbeatRecord>>,
) -> ApiResult<impl IntoResponse> {
    let saved = heartbeats.len();
    for heartbeat in heartbeats {
        state.metric_store.save_heartbeat(heartbeat).await?;
    }
    Ok((StatusCode::CREATED, Json(json!({ "saved": saved }))))
}

async fn put_metric_groups(
    State(state): State<Arc<AppState>>,
    Path(state_execution_id): Path<String>,
    Json(groups): Json<Vec<MetricGroup>>,
) -> ApiResult<impl IntoResponse> {
    let count = groups.len();
    state
        .metric_store
        .save_metric_groups(&state_execution_id, groups)
        .await?;
    Ok(Json(json!({ "groups": count })))
}

async fn get_metric_groups(
    State(state): State<Arc<AppState>>,
    Path(state_execution_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let groups = state.metric_store.metric_groups(&state_execution_id).await?;
    Ok(Json(groups))
}

/// Query string of the record URLs embedded in learning engine tasks
#[derive(Debug, Deserialize)]
pub struct RecordsParams {
    pub state_execution_id: Option<String>,
    pub workflow_execution_id: Option<String>,
    pub group_name: Option<String>,
    /// Comma-separated host list
    pub nodes: Option<String>,
    pub start_minute: i64,
    pub end_minute: i64,
}

impl RecordsParams {
    fn into_query(self) -> ApiResult<RecordQuery> {
        let scope = match (self.state_execution_id, self.workflow_execution_id) {
            (Some(id), None) => RecordScope::StateExecution(id),
            (None, Some(id)) => RecordScope::WorkflowExecution(id),
            _ => {
                return Err(ApiError::BadRequest(
                    "exactly one of state_execution_id or workflow_execution_id is required"
                        .to_string(),
                ))
            }
        };
        if self.end_minute < self.start_minute {
            return Err(ApiError::BadRequest(
                "end_minute must not precede start_minute".to_string(),
            ));
        }

        let nodes: BTreeSet<String> = self
            .nodes
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();

        Ok(RecordQuery {
            scope,
            group_name: self
                .group_name
                .unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string()),
            nodes,
            start_minute: self.start_minute,
            end_minute: self.end_minute,
        })
    }
}

async fn get_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecordsParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.into_query()?;
    let records = state.metric_store.records(&query).await?;
    Ok(Json(records))
}

/// Analysis save callback used by the learning engine
async fn save_analysis(
    State(state): State<Arc<AppState>>,
    Json(record): Json<AnalysisRecord>,
) -> ApiResult<impl IntoResponse> {
    info!(
        state_execution_id = %record.state_execution_id,
        group = %record.group_name,
        analysis_minute = record.analysis_minute,
        risk = %record.risk,
        "Analysis received"
    );
    state.analysis_store.save_analysis(record).await?;
    Ok(StatusCode::CREATED)
}

async fn save_fail_fast(
    State(state): State<Arc<AppState>>,
    Json(record): Json<FailFastRecord>,
) -> ApiResult<impl IntoResponse> {
    if record.should_fail_fast {
        warn!(
            state_execution_id = %record.state_execution_id,
            message = %record.message,
            "Fail-fast requested"
        );
    }
    state.analysis_store.save_fail_fast(record).await?;
    Ok(StatusCode::CREATED)
}

async fn get_analyses(
    State(state): State<Arc<AppState>>,
    Path(state_execution_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let analyses = state.analysis_store.analyses(&state_execution_id).await?;
    Ok(Json(analyses))
}

/// Project an execution record into its ordered metadata tree
async fn project_metadata(
    State(state): State<Arc<AppState>>,
    Json(record): Json<ExecutionRecord>,
) -> ApiResult<impl IntoResponse> {
    let metadata = state.builder.execution_metadata(&record)?;
    Ok(Json(metadata))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/jobs", post(register_job).get(list_jobs))
        .route("/api/v1/jobs/:state_execution_id", get(get_job))
        .route("/api/v1/jobs/:state_execution_id/tick", post(tick_job))
        .route(
            "/api/v1/timeseries/records",
            post(save_records).get(get_records),
        )
        .route("/api/v1/timeseries/heartbeats", post(save_heartbeats))
        .route(
            "/api/v1/timeseries/groups/:state_execution_id",
            get(get_metric_groups).put(put_metric_groups),
        )
        .route("/api/v1/analysis", post(save_analysis))
        .route("/api/v1/analysis/fail-fast", post(save_fail_fast))
        .route("/api/v1/analysis/:state_execution_id", get(get_analyses))
        .route("/api/v1/metadata", post(project_metadata))
        .with_state(state)
}

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
