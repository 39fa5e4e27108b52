//! REST API handlers for session control and the audit archive.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{info, warn};

use rollguard_core::{
    BreakerState, CommandOutcome, OperatorCommand, SessionSnapshot, SessionStatus,
};
use rollguard_rollout::SessionError;

use crate::ApiState;

/// Response wrapper for every endpoint.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn api_error(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn session_error(e: &SessionError) -> axum::response::Response {
    let status = match e {
        SessionError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(&e.to_string(), status)
}

/// Compact session view for listings.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub service: String,
    pub environment: String,
    pub status: SessionStatus,
    pub current_step_index: usize,
    pub weight_percent: u8,
    pub breaker: BreakerState,
    pub stale_signals: Vec<String>,
    pub operator_paused: bool,
    pub started_at: u64,
}

impl From<&SessionSnapshot> for SessionSummary {
    fn from(s: &SessionSnapshot) -> Self {
        Self {
            id: s.id.clone(),
            service: s.service.clone(),
            environment: s.environment.clone(),
            status: s.status,
            current_step_index: s.current_step_index,
            weight_percent: s
                .steps
                .get(s.current_step_index)
                .map(|step| step.weight_percent)
                .unwrap_or(0),
            breaker: s.circuit.state,
            stale_signals: s.stale_signals.clone(),
            operator_paused: s.operator_paused,
            started_at: s.started_at,
        }
    }
}

/// Result of an accepted operator command.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct CommandReceipt {
    pub session_id: String,
    pub command: OperatorCommand,
}

/// GET /api/v1/sessions
pub async fn list_sessions(State(state): State<ApiState>) -> impl IntoResponse {
    let sessions = state.sessions.list().await;
    let summaries: Vec<SessionSummary> = sessions.iter().map(SessionSummary::from).collect();
    ApiResponse::ok(summaries).into_response()
}

/// GET /api/v1/sessions/{id}
pub async fn get_session(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.get(&id).await {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => session_error(&e),
    }
}

async fn run_command(state: &ApiState, id: String, command: OperatorCommand) -> axum::response::Response {
    match state.sessions.command(&id, command).await {
        Ok(CommandOutcome::Accepted) => {
            info!(session = %id, ?command, "operator command accepted");
            ApiResponse::ok(CommandReceipt {
                session_id: id,
                command,
            })
            .into_response()
        }
        Ok(CommandOutcome::Rejected { reason }) => {
            warn!(session = %id, ?command, %reason, "operator command rejected");
            api_error(&reason, StatusCode::CONFLICT)
        }
        Err(e) => session_error(&e),
    }
}

/// POST /api/v1/sessions/{id}/pause
pub async fn pause_session(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    run_command(&state, id, OperatorCommand::Pause).await
}

/// POST /api/v1/sessions/{id}/resume
pub async fn resume_session(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    run_command(&state, id, OperatorCommand::Resume).await
}

/// POST /api/v1/sessions/{id}/promote
pub async fn promote_session(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    run_command(&state, id, OperatorCommand::Promote).await
}

/// POST /api/v1/sessions/{id}/abort
pub async fn abort_session(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    run_command(&state, id, OperatorCommand::Abort).await
}

/// GET /api/v1/archive
pub async fn list_archive(State(state): State<ApiState>) -> impl IntoResponse {
    match state.sessions.archive().list_sessions() {
        Ok(sessions) => {
            let summaries: Vec<SessionSummary> = sessions.iter().map(SessionSummary::from).collect();
            ApiResponse::ok(summaries).into_response()
        }
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/archive/{id}
pub async fn get_archived(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.archive().get_session(&id) {
        Ok(Some(snapshot)) => ApiResponse::ok(snapshot).into_response(),
        Ok(None) => api_error("archived session not found", StatusCode::NOT_FOUND),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/archive/{id}/rollbacks
pub async fn list_rollbacks(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.sessions.archive().list_rollbacks(&id) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => api_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
