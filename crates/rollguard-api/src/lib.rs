//! rollguard-api — operator REST API.
//!
//! Exposes live sessions (inspect, pause, resume, promote, abort) and the
//! read-only audit archive.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/sessions` | List running sessions |
//! | GET | `/api/v1/sessions/{id}` | Get a running session |
//! | POST | `/api/v1/sessions/{id}/pause` | Hold at the current step |
//! | POST | `/api/v1/sessions/{id}/resume` | Release operator and stale pauses |
//! | POST | `/api/v1/sessions/{id}/promote` | Force promotion |
//! | POST | `/api/v1/sessions/{id}/abort` | Force rollback |
//! | GET | `/api/v1/archive` | List archived sessions |
//! | GET | `/api/v1/archive/{id}` | Get an archived session |
//! | GET | `/api/v1/archive/{id}/rollbacks` | Rollback events of a session |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use rollguard_rollout::SessionManager;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub sessions: SessionManager,
}

/// Build the API router.
pub fn build_router(sessions: SessionManager) -> Router {
    let state = ApiState { sessions };

    let api_routes = Router::new()
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/pause", post(handlers::pause_session))
        .route("/sessions/{id}/resume", post(handlers::resume_session))
        .route("/sessions/{id}/promote", post(handlers::promote_session))
        .route("/sessions/{id}/abort", post(handlers::abort_session))
        .route("/archive", get(handlers::list_archive))
        .route("/archive/{id}", get(handlers::get_archived))
        .route("/archive/{id}/rollbacks", get(handlers::list_rollbacks))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
