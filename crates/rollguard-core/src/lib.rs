//! rollguard-core — shared data model and configuration for rollguard.
//!
//! Everything a rollout session is built from lives here: metric signals,
//! thresholds, the step schedule, breaker/probe/rollback tuning, and the
//! serialisable records (snapshots, audit entries, rollback events, alerts)
//! that the other crates exchange and archive.
//!
//! A config file is parsed into [`RollguardConfig`] and validated into an
//! immutable [`SessionPlan`]. Validation is strict: a plan is only produced
//! when every threshold is usable, so a session never starts with a
//! silently ignored gate.

pub mod config;
pub mod duration;
pub mod error;
pub mod signal;
pub mod strategy;
pub mod threshold;
pub mod types;

pub use config::{
    BackendsConfig, BreakerSettings, CooldownBackoff, DeployCommands, ProbeSettings,
    RollbackSettings, RollguardConfig, RolloutConfig, SessionPlan, SignalPlan,
};
pub use error::{ConfigError, ConfigResult};
pub use signal::{MetricSignal, SignalKind};
pub use strategy::{RollbackAction, RolloutStrategy};
pub use threshold::{Comparator, Limit, ResolvedThreshold, Threshold, ThresholdIssue};
pub use types::*;
