//! Session error types.

use thiserror::Error;

use rollguard_core::ConfigError;

/// Errors surfaced to callers of the session manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Unknown id, or the session already reached a terminal status.
    #[error("session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("baseline unavailable for {signal}: {reason}")]
    BaselineUnavailable { signal: String, reason: String },

    #[error("archive error: {0}")]
    State(#[from] rollguard_state::StateError),
}

pub type SessionResult<T> = Result<T, SessionError>;
