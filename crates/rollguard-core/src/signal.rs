//! Metric signals watched during a rollout.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What a signal measures. Closed set: each kind knows which limits make
/// sense for it, so a bad threshold is caught before the session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalKind {
    /// Request latency at a percentile, in milliseconds.
    Latency { percentile: f64 },
    /// Failed requests as a percentage of all requests (0-100).
    ErrorRate,
    /// Any other backend query; no limit constraints beyond finiteness.
    Custom,
}

impl SignalKind {
    /// Unit used when the signal config leaves `unit` empty.
    pub fn default_unit(&self) -> &'static str {
        match self {
            Self::Latency { .. } => "ms",
            Self::ErrorRate => "percent",
            Self::Custom => "",
        }
    }

    /// Short label for logs and alert text.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Latency { .. } => "latency",
            Self::ErrorRate => "error_rate",
            Self::Custom => "custom",
        }
    }

    /// Problems with the kind's own parameters, if any.
    pub fn check(&self) -> Option<String> {
        match self {
            Self::Latency { percentile } if !(*percentile > 0.0 && *percentile <= 100.0) => {
                Some(format!("latency percentile {percentile} is outside (0, 100]"))
            }
            _ => None,
        }
    }

    /// Check an absolute limit against what this kind can report.
    pub fn check_limit(&self, limit: f64) -> Option<String> {
        if !limit.is_finite() {
            return Some("limit must be a finite number".to_string());
        }
        match self {
            Self::Latency { .. } if limit < 0.0 => {
                Some(format!("latency limit {limit} must not be negative"))
            }
            Self::ErrorRate if !(0.0..=100.0).contains(&limit) => {
                Some(format!("error-rate limit {limit} is outside 0-100 percent"))
            }
            _ => None,
        }
    }
}

/// A named time series the controller samples while a session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSignal {
    pub name: String,
    pub kind: SignalKind,
    /// Backend query expression (PromQL for the Prometheus backend).
    pub query: String,
    /// Sampling cadence.
    #[serde(default = "default_interval", with = "crate::duration::human")]
    pub interval: Duration,
    #[serde(default)]
    pub unit: String,
    /// Whether breaches and staleness of this signal gate the rollout.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_required() -> bool {
    true
}
