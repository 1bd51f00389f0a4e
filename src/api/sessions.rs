//! Session API endpoints
//!
//! The operator surface: inspect account state, drive session lifecycles,
//! trigger or arm the kill switch, reset the daily lock.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::StateSummary;
use crate::AppState;

/// Response for listing all sessions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsListResponse {
    pub sessions: Vec<StateSummary>,
    pub total: usize,
}

/// Response for lifecycle and control actions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

/// Request to arm or disarm the kill switch.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillSwitchRequest {
    pub enabled: bool,
}

/// Create session API routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions))
        .route("/:account_id", get(get_session))
        .route("/:account_id/start", post(start_session))
        .route("/:account_id/stop", post(stop_session))
        .route("/:account_id/refresh", post(refresh_session))
        .route("/:account_id/kill", post(trigger_kill))
        .route("/:account_id/kill-switch", put(set_kill_switch))
        .route("/:account_id/reset-lock", post(reset_lock))
}

/// List all sessions
///
/// GET /api/sessions
async fn list_sessions(State(state): State<AppState>) -> Json<SessionsListResponse> {
    let sessions = state.sessions.list_summaries();
    let total = sessions.len();
    Json(SessionsListResponse { sessions, total })
}

/// Get one session's summary
///
/// GET /api/sessions/:account_id
async fn get_session(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<StateSummary>, AppError> {
    let controller = state.sessions.get(&account_id)?;
    Ok(Json(controller.summary()))
}

/// Start a session
///
/// POST /api/sessions/:account_id/start
async fn start_session(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.sessions.get(&account_id)?;
    controller.start().await?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("session {} started", account_id),
    }))
}

/// Stop a session
///
/// POST /api/sessions/:account_id/stop
async fn stop_session(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.sessions.get(&account_id)?;
    controller.stop().await?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("session {} stopped", account_id),
    }))
}

/// Re-authenticate without disturbing running services
///
/// POST /api/sessions/:account_id/refresh
async fn refresh_session(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.sessions.get(&account_id)?;
    controller.refresh().await?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("session {} refreshed", account_id),
    }))
}

/// Latch the kill trigger manually
///
/// POST /api/sessions/:account_id/kill
async fn trigger_kill(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.sessions.get(&account_id)?;
    controller.trigger_manual()?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("kill trigger latched for {}", account_id),
    }))
}

/// Arm or disarm the kill switch
///
/// PUT /api/sessions/:account_id/kill-switch
async fn set_kill_switch(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(request): Json<KillSwitchRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.sessions.get(&account_id)?;
    controller.set_kill_enabled(request.enabled)?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!(
            "kill switch {} for {}",
            if request.enabled { "armed" } else { "disarmed" },
            account_id
        ),
    }))
}

/// Clear the daily lock (operator override)
///
/// POST /api/sessions/:account_id/reset-lock
async fn reset_lock(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<ActionResponse>, AppError> {
    let controller = state.sessions.get(&account_id)?;
    controller.reset_daily_lock()?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("daily lock reset for {}", account_id),
    }))
}
