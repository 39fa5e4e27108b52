//! Configuration error types.

use thiserror::Error;

use crate::threshold::ThresholdIssue;

/// Result type alias for config loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why a rollout config cannot become a session plan.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("threshold misconfigured: {}", join_issues(.0))]
    ThresholdMisconfigured(Vec<ThresholdIssue>),

    #[error("invalid rollout schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
}

fn join_issues(issues: &[ThresholdIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
