//! Session-level records shared across rollguard crates.
//!
//! These are the serialisable shapes of sessions, samples, breaker state,
//! audit entries, rollback events and alerts. Anything archived or served
//! over the API is one of these types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identifier for a rollout session.
pub type SessionId = String;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Samples ───────────────────────────────────────────────────────

/// One reading of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    /// Unix timestamp (seconds) of the reading.
    pub timestamp: u64,
}

/// Classification of a sample against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Within,
    Breached,
    /// No usable sample: timeout, backend error, missing or NaN value.
    Unknown,
}

// ── Schedule ──────────────────────────────────────────────────────

/// One increment of the traffic schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStep {
    /// Share of traffic sent to the new version (0-100).
    #[serde(alias = "weight")]
    pub weight_percent: u8,
    /// Observation time at this weight before advancing.
    #[serde(with = "crate::duration::human")]
    pub pause: Duration,
}

// ── Session ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Promoted,
    RolledBack,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a session's circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: BreakerState,
    /// Breach streak of the signal that last moved the breaker.
    pub failure_streak: u32,
    /// Lowest half-open success streak across required signals.
    pub success_streak: u32,
    /// Unix timestamp (seconds) of the last transition to open.
    pub opened_at: Option<u64>,
    /// Cooldown applied to the current (or last) open period.
    #[serde(with = "crate::duration::human")]
    pub cooldown: Duration,
    /// How many times the breaker has opened in this session.
    pub trips: u32,
}

/// Serialisable view of a rollout session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub service: String,
    pub environment: String,
    pub steps: Vec<RolloutStep>,
    pub current_step_index: usize,
    /// Number of traffic-weight changes applied so far.
    pub steps_applied: u32,
    pub circuit: CircuitBreakerState,
    pub status: SessionStatus,
    /// Required signals currently paused for stale metrics.
    pub stale_signals: Vec<String>,
    pub operator_paused: bool,
    pub rollback_in_flight: bool,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub audit_log: Vec<AuditEntry>,
}

impl SessionSnapshot {
    /// Rollback events recorded in the audit log, oldest first.
    pub fn rollback_events(&self) -> Vec<&RollbackEvent> {
        self.audit_log
            .iter()
            .filter_map(|entry| match &entry.event {
                AuditEvent::Rollback(event) => Some(event),
                _ => None,
            })
            .collect()
    }
}

// ── Audit ─────────────────────────────────────────────────────────

/// Operator overrides accepted by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorCommand {
    Pause,
    Resume,
    Promote,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    Accepted,
    Rejected { reason: String },
}

/// Something that happened to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    SessionStarted {
        steps: usize,
    },
    StepApplied {
        index: usize,
        weight_percent: u8,
    },
    WeightFailed {
        index: usize,
        weight_percent: u8,
        error: String,
    },
    BreakerTransition {
        from: BreakerState,
        to: BreakerState,
        signal: Option<String>,
    },
    StalePaused {
        signal: String,
        unknown_streak: u32,
    },
    StaleCleared {
        signal: String,
    },
    Operator {
        command: OperatorCommand,
        outcome: CommandOutcome,
    },
    Rollback(RollbackEvent),
    /// A rollback request collapsed into one already dispatched.
    RollbackSkipped {
        reason: String,
    },
    /// Breaker opened with automatic rollback disabled.
    RollbackHeld {
        signal: Option<String>,
    },
    /// Breaker opened while a required signal was stale; the rollback
    /// waits for fresh samples or an operator.
    RollbackDeferred {
        signal: Option<String>,
    },
    Promoted {
        weight_percent: u8,
    },
    PromoteFailed {
        error: String,
    },
    Stopped,
}

/// One append-only line of a session's audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub timestamp: u64,
    pub event: AuditEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackOutcome {
    Succeeded,
    /// Every attempt failed; a fatal alert was raised.
    Failed,
}

/// Immutable record of a rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEvent {
    pub session_id: SessionId,
    pub reason: String,
    pub triggering_signal: Option<String>,
    /// Samples of the breach streak that tripped the breaker, oldest first.
    pub observed_values: Vec<f64>,
    pub timestamp: u64,
    pub actions_taken: Vec<String>,
    pub outcome: RollbackOutcome,
}

// ── Alerts ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    /// Needs a human: automation could not restore a safe state.
    Fatal,
}

/// Structured notification sent to the alert sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: Severity,
    pub service: String,
    pub environment: String,
    pub reason: String,
    pub timestamp: u64,
    pub session_id: SessionId,
}
