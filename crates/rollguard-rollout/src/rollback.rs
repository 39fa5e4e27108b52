//! Rollback executor — single-fire, retried, escalating.
//!
//! Every session owns one [`RollbackGuard`]. The first caller to claim it
//! runs the rollback; everyone after that gets
//! [`RollbackResult::AlreadyTriggered`] without touching the deployment.
//! A claimed guard is never released, so a session rolls back at most
//! once no matter how many breakers, timers or operators ask for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use rollguard_core::{
    Alert, RollbackAction, RollbackEvent, RollbackOutcome, RollbackSettings, Severity, epoch_secs,
};
use rollguard_state::ArchiveStore;

use crate::alert::{AlertSink, notify};
use crate::deploy::{DeployTarget, DeploymentBackend, revert};

/// Claimed by the first rollback of a session.
#[derive(Debug, Default)]
pub struct RollbackGuard(AtomicBool);

impl RollbackGuard {
    /// `true` for exactly one caller over the guard's lifetime.
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Why a rollback was asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct RollbackRequest {
    pub reason: String,
    pub triggering_signal: Option<String>,
    pub observed_values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RollbackResult {
    Completed { attempts: u32, event: RollbackEvent },
    /// Every attempt failed and a fatal alert went out.
    Failed { attempts: u32, event: RollbackEvent },
    /// Another caller already holds the guard; nothing was done.
    AlreadyTriggered,
}

impl RollbackResult {
    pub fn event(&self) -> Option<&RollbackEvent> {
        match self {
            Self::Completed { event, .. } | Self::Failed { event, .. } => Some(event),
            Self::AlreadyTriggered => None,
        }
    }
}

#[derive(Clone)]
pub struct RollbackExecutor {
    deployer: Arc<dyn DeploymentBackend>,
    alerts: Arc<dyn AlertSink>,
    journal: Option<ArchiveStore>,
    settings: RollbackSettings,
    action: RollbackAction,
}

impl RollbackExecutor {
    pub fn new(
        deployer: Arc<dyn DeploymentBackend>,
        alerts: Arc<dyn AlertSink>,
        settings: RollbackSettings,
        action: RollbackAction,
    ) -> Self {
        Self {
            deployer,
            alerts,
            journal: None,
            settings,
            action,
        }
    }

    /// Also journal every rollback event to `archive`.
    pub fn with_journal(mut self, archive: ArchiveStore) -> Self {
        self.journal = Some(archive);
        self
    }

    /// Roll `target` back, unless `guard` was already claimed.
    ///
    /// Attempts back off exponentially from `backoff_base`. When all
    /// `max_attempts` fail, exactly one fatal alert is raised; the caller
    /// still treats the session as rolled back.
    pub async fn execute(
        &self,
        target: &DeployTarget,
        guard: &RollbackGuard,
        request: RollbackRequest,
    ) -> RollbackResult {
        if !guard.try_claim() {
            info!(session = %target.session_id, reason = %request.reason, "rollback already triggered");
            return RollbackResult::AlreadyTriggered;
        }

        let action = self.action.as_str();
        let max_attempts = self.settings.max_attempts.max(1);
        let mut actions_taken = Vec::new();
        let mut delay = self.settings.backoff_base;
        let mut attempts = 0;
        let mut succeeded = false;

        warn!(
            session = %target.session_id,
            reason = %request.reason,
            signal = ?request.triggering_signal,
            action,
            "rolling back"
        );

        while attempts < max_attempts {
            attempts += 1;
            match revert(self.deployer.as_ref(), target, self.action).await {
                Ok(()) => {
                    actions_taken.push(format!("{action} attempt {attempts}: succeeded"));
                    succeeded = true;
                    break;
                }
                Err(e) => {
                    warn!(
                        session = %target.session_id,
                        attempt = attempts,
                        error = %format!("{e:#}"),
                        "rollback attempt failed"
                    );
                    actions_taken.push(format!("{action} attempt {attempts}: failed: {e:#}"));
                    if attempts < max_attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        let outcome = if succeeded {
            RollbackOutcome::Succeeded
        } else {
            actions_taken.push("escalated: fatal alert raised".to_string());
            RollbackOutcome::Failed
        };

        let event = RollbackEvent {
            session_id: target.session_id.clone(),
            reason: request.reason,
            triggering_signal: request.triggering_signal,
            observed_values: request.observed_values,
            timestamp: epoch_secs(),
            actions_taken,
            outcome,
        };

        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_rollback(&event) {
                error!(session = %target.session_id, error = %e, "failed to journal rollback event");
            }
        }

        let (severity, reason) = match outcome {
            RollbackOutcome::Succeeded => (
                Severity::Critical,
                format!("rolled back ({action}): {}", event.reason),
            ),
            RollbackOutcome::Failed => (
                Severity::Fatal,
                format!(
                    "rollback ({action}) failed after {attempts} attempts, manual intervention required: {}",
                    event.reason
                ),
            ),
        };
        notify(
            self.alerts.as_ref(),
            Alert {
                severity,
                service: target.service.clone(),
                environment: target.environment.clone(),
                reason,
                timestamp: event.timestamp,
                session_id: target.session_id.clone(),
            },
        )
        .await;

        if succeeded {
            info!(session = %target.session_id, attempts, "rollback completed");
            RollbackResult::Completed { attempts, event }
        } else {
            error!(session = %target.session_id, attempts, "rollback failed");
            RollbackResult::Failed { attempts, event }
        }
    }
}
