//! REST API server for the REIT analysis agent
//!
//! Exposes the two-phase workflow over HTTP: start a run (it pauses for
//! preferences), submit preferences to finish it, inspect a paused run.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{render_analysis_prompt, DEFAULT_LIMIT};
use crate::error::WorkflowError;
use crate::models::{RiskTolerance, UserPreferences};
use crate::report::{ranking_output, render_report};
use crate::state::{RunState, StateUpdate, DEFAULT_MAX_REFLECTIONS};
use crate::steps::preferences::COLLECTOR_MESSAGE;
use crate::workflow::{new_run_id, RunOutcome, Workflow};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct StartRunRequest {
    pub limit: Option<u32>,
    /// Overrides the configured analysis prompt.
    pub prompt: Option<String>,
    pub max_reflections: Option<u32>,
    pub run_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct PreferencesRequest {
    pub risk_tolerance: Option<String>,
    pub max_price_to_book: Option<f64>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

/// =============================
/// API State
/// =============================

/// Defaults applied to runs started over HTTP.
#[derive(Debug, Clone)]
pub struct RunDefaults {
    pub analysis_prompt: String,
    pub limit: u32,
    pub max_reflections: u32,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            analysis_prompt: "Analyze the top {limit} Singapore REITs.".to_string(),
            limit: DEFAULT_LIMIT,
            max_reflections: DEFAULT_MAX_REFLECTIONS,
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub workflow: Arc<Workflow>,
    pub defaults: Arc<RunDefaults>,
    /// REIT limit each paused run was started with, for its report.
    pub run_limits: Arc<RwLock<HashMap<String, u32>>>,
}

/// =============================
/// Helpers
/// =============================

fn parse_risk(r: Option<&str>) -> RiskTolerance {
    r.and_then(RiskTolerance::parse)
        .unwrap_or(RiskTolerance::Moderate)
}

fn status_for(err: &WorkflowError) -> StatusCode {
    match err {
        WorkflowError::CheckpointNotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::RunAlreadyExists(_) => StatusCode::CONFLICT,
        WorkflowError::SchemaError(_) | WorkflowError::InvalidToolInput(_) => {
            StatusCode::BAD_REQUEST
        }
        WorkflowError::ProviderError(_) | WorkflowError::HttpError(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: WorkflowError) -> ApiResult {
    (status_for(&err), Json(ApiResponse::error(err.to_string())))
}

fn completed_view(run_id: &str, state: &RunState, limit: u32) -> serde_json::Value {
    serde_json::json!({
        "run_id": run_id,
        "status": "completed",
        "approved": state.analysis_approved,
        "reflection_count": state.reflection_count,
        "analysis": state.latest_analysis().map(|m| m.content()),
        "raw_data": ranking_output(state),
        "report": render_report(state, limit, chrono::Utc::now()),
    })
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Run Endpoints
/// =============================

async fn start_run(
    State(state): State<ApiState>,
    Json(req): Json<StartRunRequest>,
) -> ApiResult {
    let run_id = req
        .run_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(new_run_id);
    let limit = req.limit.unwrap_or(state.defaults.limit);
    let template = req
        .prompt
        .unwrap_or_else(|| state.defaults.analysis_prompt.clone());

    info!(run_id = %run_id, limit, "Received run request");

    let initial = RunState::new(render_analysis_prompt(&template, limit)).with_max_reflections(
        req.max_reflections
            .unwrap_or(state.defaults.max_reflections),
    );

    match state.workflow.run_until(&run_id, initial).await {
        Ok(RunOutcome::Interrupted { next_step, .. }) => {
            state.run_limits.write().await.insert(run_id.clone(), limit);
            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::success(serde_json::json!({
                    "run_id": run_id,
                    "status": "awaiting_preferences",
                    "next_step": next_step,
                    "message": COLLECTOR_MESSAGE,
                    "limit": limit,
                }))),
            )
        }
        Ok(RunOutcome::Completed { state: run, .. }) => (
            StatusCode::OK,
            Json(ApiResponse::success(completed_view(&run_id, &run, limit))),
        ),
        Err(e) => failure(e),
    }
}

async fn submit_preferences(
    State(state): State<ApiState>,
    Path(run_id): Path<String>,
    Json(req): Json<PreferencesRequest>,
) -> ApiResult {
    let preferences = UserPreferences {
        risk_tolerance: Some(parse_risk(req.risk_tolerance.as_deref())),
        max_price_to_book: req.max_price_to_book.filter(|pb| *pb > 0.0),
    };

    info!(
        run_id = %run_id,
        risk_tolerance = %preferences.risk_label(),
        max_price_to_book = %preferences.max_price_to_book_label(),
        "Received preferences"
    );

    // the parser step flips the flag once it has folded these in
    let update = StateUpdate::new()
        .user_preferences(preferences)
        .preferences_collected(false);

    if let Err(e) = state.workflow.inject_update(&run_id, update).await {
        return failure(e);
    }

    let outcome = state.workflow.resume(&run_id).await;

    // finished or failed runs no longer need their limit
    let stored = if outcome.as_ref().is_ok_and(RunOutcome::is_interrupted) {
        state.run_limits.read().await.get(&run_id).copied()
    } else {
        state.run_limits.write().await.remove(&run_id)
    };
    let limit = stored.unwrap_or(state.defaults.limit);

    match outcome {
        Ok(RunOutcome::Completed { state: run, .. }) => (
            StatusCode::OK,
            Json(ApiResponse::success(completed_view(&run_id, &run, limit))),
        ),
        Ok(RunOutcome::Interrupted { next_step, .. }) => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(serde_json::json!({
                "run_id": run_id,
                "status": "interrupted",
                "next_step": next_step,
            }))),
        ),
        Err(e) => failure(e),
    }
}

async fn get_run(State(state): State<ApiState>, Path(run_id): Path<String>) -> ApiResult {
    match state.workflow.checkpoint(&run_id).await {
        Ok(Some(checkpoint)) => (StatusCode::OK, Json(ApiResponse::success(checkpoint))),
        Ok(None) => failure(WorkflowError::CheckpointNotFound(run_id)),
        Err(e) => failure(e),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(workflow: Arc<Workflow>, defaults: RunDefaults) -> Router {
    let state = ApiState {
        workflow,
        defaults: Arc::new(defaults),
        run_limits: Arc::new(RwLock::new(HashMap::new())),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/runs", post(start_run))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/runs/:run_id/preferences", post(submit_preferences))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    workflow: Arc<Workflow>,
    defaults: RunDefaults,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(workflow, defaults);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedProvider;
    use crate::steps::StepRegistry;
    use crate::tools::create_reit_registry;
    use crate::workflow::create_reit_workflow;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router(analyst: ScriptedProvider, critic: ScriptedProvider) -> Router {
        let steps = StepRegistry::standard(
            Arc::new(analyst),
            Arc::new(critic),
            Arc::new(create_reit_registry(None)),
            "RUBRIC".to_string(),
        );
        create_router(Arc::new(create_reit_workflow(steps)), RunDefaults::default())
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(ScriptedProvider::new(), ScriptedProvider::new());
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_start_then_submit_preferences() {
        let analyst = ScriptedProvider::demo_analyst(5);
        let critic = ScriptedProvider::demo_critic();
        let app = router(analyst.clone(), critic);

        let (status, body) = call(
            &app,
            "POST",
            "/api/runs",
            Some(json!({"run_id": "r-1", "limit": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["status"], "awaiting_preferences");
        assert_eq!(body["data"]["next_step"], "preference_parser");

        let (status, body) = call(&app, "GET", "/api/runs/r-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["paused_after"], "preference_collector");

        let (status, body) = call(
            &app,
            "POST",
            "/api/runs/r-1/preferences",
            Some(json!({"risk_tolerance": "Conservative", "max_price_to_book": 1.1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(body["data"]["approved"], true);
        assert!(body["data"]["analysis"].as_str().unwrap().starts_with("Scripted analysis"));
        // no market-data service configured: the failure is reported as tool output
        assert!(body["data"]["raw_data"].as_str().unwrap().contains("Error"));
        // the report keeps the limit the run was started with
        assert!(body["data"]["report"]
            .as_str()
            .unwrap()
            .contains("**Query:** Analyze top 5 Singapore REITs"));

        let first_request = &analyst.requests()[0];
        assert!(first_request[0].content().contains("conservative"));
        assert!(first_request[1].content().contains("Analyze the top 5"));

        let (status, _) = call(&app, "GET", "/api/runs/r-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_run_and_duplicate_start() {
        let app = router(ScriptedProvider::new(), ScriptedProvider::new());

        let (status, body) = call(&app, "POST", "/api/runs/nope/preferences", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        call(&app, "POST", "/api/runs", Some(json!({"run_id": "dup"}))).await;
        let (status, _) = call(&app, "POST", "/api/runs", Some(json!({"run_id": "dup"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_parse_risk_defaults_to_moderate() {
        assert_eq!(parse_risk(Some("conservative")), RiskTolerance::Conservative);
        assert_eq!(parse_risk(Some("YOLO")), RiskTolerance::Moderate);
        assert_eq!(parse_risk(None), RiskTolerance::Moderate);
    }
}
