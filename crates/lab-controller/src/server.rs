//! HTTP surface for lab lifecycle requests.
//!
//! Handlers are thin adapters over [`LabOrchestrator`]; this is the only place
//! that maps lifecycle errors to status codes.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, warn};

use crate::lab::{Error, LabOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<LabOrchestrator>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartLabRequest {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub lab_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuestRequest {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub project_slug: String,
    #[serde(default)]
    pub lab_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndLabRequest {
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub lab_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabResponse {
    pub success: bool,
    pub lab_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objects_removed: Option<usize>,
}

impl LabResponse {
    fn ok(lab_id: String, message: &str) -> Self {
        Self {
            success: true,
            lab_id,
            message: Some(message.to_string()),
            objects_removed: None,
        }
    }
}

/// Lifecycle error rendered as a JSON body with the matching status.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::Validation(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "error": message }),
            ),
            Error::CapacityExceeded { current, limit } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "success": false,
                    "error": "Exceeded maximum concurrent labs",
                    "allowed": limit,
                    "current": current,
                }),
            ),
            Error::QuestNotFound(_) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "error": self.0.to_string() }),
            ),
            other => {
                error!("Lab request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "error": other.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Lifecycle routes, without middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/start", post(start_lab))
        .route("/v1/start/playground", post(start_lab))
        .route("/v1/start/quest", post(start_quest))
        .route("/end", post(end_lab))
        .route("/v1/end/quest", post(end_lab))
        .route("/delete", delete(delete_lab))
        .route("/v1/delete/quest", delete(delete_lab))
        .route("/v1/labs/{lab_id}", get(lab_status))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "lab-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Response {
    let admission = state.orchestrator.admission();
    match admission.active_lab_count().await {
        Ok(active) => Json(json!({
            "status": "ready",
            "service": "lab-controller",
            "activeLabs": active,
            "allowedLabs": admission.limit(),
        }))
        .into_response(),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn start_lab(
    State(state): State<AppState>,
    payload: Result<Json<StartLabRequest>, JsonRejection>,
) -> Result<Json<LabResponse>, ApiError> {
    let Json(request) = payload?;
    let started = state
        .orchestrator
        .start_lab(&request.language, request.lab_id.as_deref())
        .await?;
    Ok(Json(LabResponse::ok(started.lab_id, "Lab started successfully")))
}

async fn start_quest(
    State(state): State<AppState>,
    payload: Result<Json<StartQuestRequest>, JsonRejection>,
) -> Result<Json<LabResponse>, ApiError> {
    let Json(request) = payload?;
    let started = state
        .orchestrator
        .start_quest(
            &request.language,
            &request.project_slug,
            request.lab_id.as_deref(),
        )
        .await?;
    Ok(Json(LabResponse::ok(started.lab_id, "Quest started successfully")))
}

async fn end_lab(
    State(state): State<AppState>,
    payload: Result<Json<EndLabRequest>, JsonRejection>,
) -> Result<Json<LabResponse>, ApiError> {
    let Json(request) = payload?;
    state
        .orchestrator
        .end_lab(&request.language, &request.lab_id)
        .await?;
    Ok(Json(LabResponse::ok(request.lab_id, "Lab ended successfully")))
}

async fn delete_lab(
    State(state): State<AppState>,
    payload: Result<Json<EndLabRequest>, JsonRejection>,
) -> Result<Json<LabResponse>, ApiError> {
    let Json(request) = payload?;
    let deleted = state
        .orchestrator
        .delete_lab(&request.language, &request.lab_id)
        .await?;
    Ok(Json(LabResponse {
        objects_removed: Some(deleted.objects_removed),
        ..LabResponse::ok(deleted.lab_id, "Lab deleted successfully")
    }))
}

async fn lab_status(
    State(state): State<AppState>,
    Path(lab_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.orchestrator.lab_status(&lab_id).await? {
        Some(instance) => Ok(Json(instance).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("Lab '{lab_id}' not found") })),
        )
            .into_response()),
    }
}
