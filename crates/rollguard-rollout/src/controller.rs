//! Rollout controller — drives one session through its steps.
//!
//! The controller is the only writer of its session's state. Probe tasks
//! send it [`Observation`]s, the session manager sends it
//! [`ControlMessage`]s, and everything else (step timers, breaker
//! cooldown, an in-flight rollback) is a branch of the same `select!`
//! loop. Every change is published on a `watch` channel for readers.
//!
//! A step advances only when its pause has elapsed, the breaker is
//! closed, no required signal is stale, the operator has not paused the
//! session, and no rollback is in flight. Once the gate clears after the
//! pause, the next step is applied immediately.
//!
//! While any required signal is stale nothing moves in either direction:
//! a breaker that opens meanwhile has its rollback deferred until fresh
//! samples arrive, the operator resumes, or the operator aborts.
//!
//! Alerts are queued to a delivery task, so a slow sink never stalls the
//! loop.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use rollguard_core::{
    Alert, AuditEntry, AuditEvent, BreakerState, CommandOutcome, OperatorCommand, RollbackEvent,
    RollbackOutcome, RolloutStep, SessionId, SessionPlan, SessionSnapshot, SessionStatus, Severity,
    Verdict, epoch_secs,
};
use rollguard_probe::Observation;

use crate::alert::{AlertQueue, AlertSink};
use crate::breaker::{CircuitBreaker, Transition};
use crate::deploy::{DeployTarget, DeploymentBackend};
use crate::rollback::{RollbackExecutor, RollbackGuard, RollbackRequest, RollbackResult};

/// Values kept per signal for rollback reports.
const RECENT_VALUES: usize = 32;

/// Requests delivered to a running controller.
#[derive(Debug)]
pub enum ControlMessage {
    Command {
        command: OperatorCommand,
        reply: oneshot::Sender<CommandOutcome>,
    },
    /// Stop watching. An in-flight rollback still runs to completion.
    Stop { reply: oneshot::Sender<()> },
}

/// The session fields that end up in snapshots.
struct SessionRecord {
    id: SessionId,
    steps: Arc<[RolloutStep]>,
    current_step_index: usize,
    steps_applied: u32,
    status: SessionStatus,
    started_at: u64,
    finished_at: Option<u64>,
    audit_log: Vec<AuditEntry>,
}

impl SessionRecord {
    fn append(&mut self, event: AuditEvent) {
        let seq = self.audit_log.len() as u64;
        self.audit_log.push(AuditEntry {
            seq,
            timestamp: epoch_secs(),
            event,
        });
    }

    fn finish(&mut self, status: SessionStatus) {
        self.status = status;
        self.finished_at = Some(epoch_secs());
    }
}

pub struct RolloutController {
    plan: SessionPlan,
    target: DeployTarget,
    deployer: Arc<dyn DeploymentBackend>,
    alerts: AlertQueue,
    executor: RollbackExecutor,
    guard: Arc<RollbackGuard>,
    breaker: CircuitBreaker,
    record: SessionRecord,
    stale: BTreeSet<String>,
    operator_paused: bool,
    promote_failures: u32,
    recent: HashMap<String, VecDeque<f64>>,
    rollback: Option<JoinHandle<RollbackResult>>,
    /// Rollback waiting for stale signals to recover.
    deferred: Option<RollbackRequest>,
    status_tx: watch::Sender<SessionSnapshot>,
}

impl RolloutController {
    pub fn new(
        id: SessionId,
        plan: SessionPlan,
        deployer: Arc<dyn DeploymentBackend>,
        alerts: Arc<dyn AlertSink>,
        executor: RollbackExecutor,
    ) -> Self {
        let target = DeployTarget {
            session_id: id.clone(),
            service: plan.service.clone(),
            environment: plan.environment.clone(),
        };
        let breaker = CircuitBreaker::new(plan.breaker, plan.required_signals());
        let record = SessionRecord {
            id,
            steps: Arc::clone(&plan.steps),
            current_step_index: 0,
            steps_applied: 0,
            status: SessionStatus::Running,
            started_at: epoch_secs(),
            finished_at: None,
            audit_log: Vec::new(),
        };
        let (status_tx, _) = watch::channel(build_snapshot(
            &record,
            &plan,
            &breaker,
            &BTreeSet::new(),
            false,
            false,
        ));

        Self {
            plan,
            target,
            deployer,
            alerts: AlertQueue::spawn(alerts),
            executor,
            guard: Arc::new(RollbackGuard::default()),
            breaker,
            record,
            stale: BTreeSet::new(),
            operator_paused: false,
            promote_failures: 0,
            recent: HashMap::new(),
            rollback: None,
            deferred: None,
            status_tx,
        }
    }

    /// Live view of the session, updated after every change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.status_tx.subscribe()
    }

    /// Run the session until it is promoted, rolled back, or stopped.
    pub async fn run(
        mut self,
        mut observations: mpsc::Receiver<Observation>,
        mut control: mpsc::Receiver<ControlMessage>,
    ) -> SessionSnapshot {
        info!(
            session = %self.record.id,
            service = %self.plan.service,
            environment = %self.plan.environment,
            steps = self.record.steps.len(),
            "rollout session started"
        );
        let steps = self.record.steps.len();
        self.record.append(AuditEvent::SessionStarted { steps });

        let mut pause_until = Instant::now() + self.step_pause(0);
        let mut pause_elapsed = false;
        let mut control_open = true;
        let mut stop_reply = None;

        if let Err(request) = self.apply_step(0).await {
            self.start_rollback(request);
        }

        loop {
            self.publish();
            if self.record.status.is_terminal() {
                break;
            }

            if pause_elapsed && self.gate_open() {
                if self.record.current_step_index + 1 >= steps {
                    if self.promote().await {
                        continue;
                    }
                } else {
                    let next = self.record.current_step_index + 1;
                    match self.apply_step(next).await {
                        Ok(()) => {
                            pause_until = Instant::now() + self.step_pause(next);
                            pause_elapsed = false;
                        }
                        Err(request) => self.start_rollback(request),
                    }
                    continue;
                }
            }

            let reopen_at = self.breaker.reopen_at();
            tokio::select! {
                Some(obs) = observations.recv() => self.on_observation(obs),
                msg = control.recv(), if control_open => match msg {
                    Some(ControlMessage::Command { command, reply }) => {
                        let outcome = self.on_command(command).await;
                        let _ = reply.send(outcome);
                    }
                    Some(ControlMessage::Stop { reply }) => {
                        stop_reply = Some(reply);
                        break;
                    }
                    None => control_open = false,
                },
                _ = sleep_until(pause_until), if !pause_elapsed => {
                    debug!(session = %self.record.id, step = self.record.current_step_index, "step pause elapsed");
                    pause_elapsed = true;
                }
                _ = sleep_until_opt(reopen_at), if reopen_at.is_some() => {
                    if let Some(transition) = self.breaker.poll(Instant::now()) {
                        self.on_transition(BreakerState::Open, transition);
                    }
                }
                joined = join_rollback(&mut self.rollback), if self.rollback.is_some() => {
                    self.rollback = None;
                    self.finish_rollback(joined);
                }
                else => {
                    warn!(session = %self.record.id, "no event sources left, stopping session");
                    break;
                }
            }
        }

        observations.close();
        if !self.record.status.is_terminal() {
            info!(session = %self.record.id, "rollout session stopped");
            self.record.append(AuditEvent::Stopped);
        }
        if let Some(handle) = self.rollback.take() {
            let joined = handle.await;
            self.finish_rollback(joined);
        }

        let snapshot = self.publish();
        if let Some(reply) = stop_reply {
            let _ = reply.send(());
        }
        self.alerts.close().await;
        snapshot
    }

    // ── Steps ─────────────────────────────────────────────────────

    fn step_pause(&self, index: usize) -> std::time::Duration {
        self.record
            .steps
            .get(index)
            .map(|s| s.pause)
            .unwrap_or_default()
    }

    fn current_weight(&self) -> u8 {
        self.record
            .steps
            .get(self.record.current_step_index)
            .map(|s| s.weight_percent)
            .unwrap_or(0)
    }

    fn gate_open(&self) -> bool {
        self.breaker.state() == BreakerState::Closed
            && self.stale.is_empty()
            && !self.operator_paused
            && self.rollback.is_none()
    }

    async fn apply_step(&mut self, index: usize) -> Result<(), RollbackRequest> {
        let Some(weight_percent) = self.record.steps.get(index).map(|s| s.weight_percent) else {
            return Err(RollbackRequest {
                reason: format!("step {index} does not exist"),
                triggering_signal: None,
                observed_values: Vec::new(),
            });
        };

        match self.deployer.set_weight(&self.target, weight_percent).await {
            Ok(()) => {
                self.record.current_step_index = index;
                self.record.steps_applied += 1;
                info!(session = %self.record.id, step = index, weight_percent, "traffic weight applied");
                self.record.append(AuditEvent::StepApplied {
                    index,
                    weight_percent,
                });
                Ok(())
            }
            Err(e) => {
                let error = format!("{e:#}");
                warn!(session = %self.record.id, step = index, weight_percent, %error, "failed to apply traffic weight");
                self.record.append(AuditEvent::WeightFailed {
                    index,
                    weight_percent,
                    error: error.clone(),
                });
                Err(RollbackRequest {
                    reason: format!("failed to set traffic weight to {weight_percent}%: {error}"),
                    triggering_signal: None,
                    observed_values: Vec::new(),
                })
            }
        }
    }

    async fn promote(&mut self) -> bool {
        let weight_percent = self.current_weight();
        match self.deployer.promote(&self.target).await {
            Ok(()) => {
                self.record.finish(SessionStatus::Promoted);
                self.record.append(AuditEvent::Promoted { weight_percent });
                info!(session = %self.record.id, weight_percent, "rollout promoted");
                self.alert(
                    Severity::Info,
                    format!("promoted at {weight_percent}% after {} steps", self.record.steps_applied),
                );
                true
            }
            Err(e) => {
                let error = format!("{e:#}");
                self.promote_failures += 1;
                warn!(session = %self.record.id, attempts = self.promote_failures, %error, "promotion failed");
                self.record.append(AuditEvent::PromoteFailed {
                    error: error.clone(),
                });
                if self.promote_failures == 1 {
                    self.alert(Severity::Critical, format!("promotion failed: {error}"));
                }
                false
            }
        }
    }

    // ── Observations ──────────────────────────────────────────────

    fn on_observation(&mut self, obs: Observation) {
        if obs.verdict != Verdict::Unknown {
            if let Some(value) = obs.value {
                let recent = self.recent.entry(obs.signal.clone()).or_default();
                recent.push_back(value);
                while recent.len() > RECENT_VALUES {
                    recent.pop_front();
                }
            }
        }
        if !obs.required {
            return;
        }

        self.track_staleness(&obs);
        self.release_deferred();

        let now = Instant::now();
        if let Some(transition) = self.breaker.poll(now) {
            self.on_transition(BreakerState::Open, transition);
        }
        let from = self.breaker.state();
        if let Some(transition) = self.breaker.observe(&obs, now) {
            if let Some(request) = self.on_transition(from, transition) {
                self.start_rollback(request);
            }
        }
    }

    fn track_staleness(&mut self, obs: &Observation) {
        if obs.verdict == Verdict::Unknown {
            if obs.unknown_streak >= self.plan.probe.staleness_limit
                && self.stale.insert(obs.signal.clone())
            {
                warn!(session = %self.record.id, signal = %obs.signal, unknowns = obs.unknown_streak, "signal stale, rollout paused");
                self.record.append(AuditEvent::StalePaused {
                    signal: obs.signal.clone(),
                    unknown_streak: obs.unknown_streak,
                });
                self.alert(
                    Severity::Warning,
                    format!(
                        "no usable samples for {} in {} consecutive probes, rollout paused",
                        obs.signal, obs.unknown_streak
                    ),
                );
            }
        } else if self.stale.remove(&obs.signal) {
            info!(session = %self.record.id, signal = %obs.signal, "signal fresh again");
            self.record.append(AuditEvent::StaleCleared {
                signal: obs.signal.clone(),
            });
        }
    }

    fn on_transition(&mut self, from: BreakerState, transition: Transition) -> Option<RollbackRequest> {
        self.record.append(AuditEvent::BreakerTransition {
            from,
            to: transition.to(),
            signal: transition.signal().map(str::to_string),
        });

        let Transition::Opened { signal } = transition else {
            return None;
        };

        let streak = self.breaker.snapshot().failure_streak;
        let reason = match &signal {
            Some(name) => format!("{name} breached its threshold {streak} consecutive times"),
            None => "circuit breaker opened".to_string(),
        };

        if self.plan.auto_rollback {
            let observed_values = self.breach_values(signal.as_deref(), streak);
            let request = RollbackRequest {
                reason,
                triggering_signal: signal,
                observed_values,
            };
            if self.stale.is_empty() {
                return Some(request);
            }

            warn!(session = %self.record.id, reason = %request.reason, stale = ?self.stale, "metrics stale, rollback deferred");
            self.record.append(AuditEvent::RollbackDeferred {
                signal: request.triggering_signal.clone(),
            });
            if self.deferred.is_none() {
                self.alert(
                    Severity::Critical,
                    format!(
                        "{}; rollback deferred until stale signals recover or an operator acts",
                        request.reason
                    ),
                );
            }
            self.deferred = Some(request);
            return None;
        }

        warn!(session = %self.record.id, %reason, "automatic rollback disabled, holding");
        self.record.append(AuditEvent::RollbackHeld { signal });
        self.alert(
            Severity::Critical,
            format!(
                "{reason}; automatic rollback disabled, holding at {}%",
                self.current_weight()
            ),
        );
        None
    }

    /// Dispatch a deferred rollback once no required signal is stale.
    ///
    /// The breaker cannot close while a required signal is stale, so a
    /// deferred request is always still wanted here.
    fn release_deferred(&mut self) {
        if !self.stale.is_empty() {
            return;
        }
        if let Some(request) = self.deferred.take() {
            info!(session = %self.record.id, reason = %request.reason, "metrics fresh again, dispatching deferred rollback");
            self.start_rollback(request);
        }
    }

    /// The last `streak` values seen for `signal`, oldest first.
    fn breach_values(&self, signal: Option<&str>, streak: u32) -> Vec<f64> {
        let Some(recent) = signal.and_then(|s| self.recent.get(s)) else {
            return Vec::new();
        };
        let skip = recent.len().saturating_sub(streak as usize);
        recent.iter().skip(skip).copied().collect()
    }

    // ── Operator commands ─────────────────────────────────────────

    async fn on_command(&mut self, command: OperatorCommand) -> CommandOutcome {
        let outcome = match command {
            OperatorCommand::Pause => {
                self.operator_paused = true;
                CommandOutcome::Accepted
            }
            OperatorCommand::Resume => {
                self.operator_paused = false;
                for signal in std::mem::take(&mut self.stale) {
                    self.record.append(AuditEvent::StaleCleared { signal });
                }
                self.release_deferred();
                CommandOutcome::Accepted
            }
            OperatorCommand::Promote => self.force_promote().await,
            OperatorCommand::Abort => {
                if self.rollback.is_some() {
                    CommandOutcome::Rejected {
                        reason: "rollback already in progress".to_string(),
                    }
                } else {
                    self.start_rollback(RollbackRequest {
                        reason: "aborted by operator".to_string(),
                        triggering_signal: None,
                        observed_values: Vec::new(),
                    });
                    CommandOutcome::Accepted
                }
            }
        };

        info!(session = %self.record.id, ?command, ?outcome, "operator command");
        self.record.append(AuditEvent::Operator {
            command,
            outcome: outcome.clone(),
        });
        outcome
    }

    /// Jump to the final weight and promote, skipping remaining pauses.
    async fn force_promote(&mut self) -> CommandOutcome {
        if self.breaker.state() == BreakerState::Open {
            return CommandOutcome::Rejected {
                reason: "circuit breaker is open".to_string(),
            };
        }
        if self.rollback.is_some() {
            return CommandOutcome::Rejected {
                reason: "rollback in progress".to_string(),
            };
        }

        let last = self.record.steps.len().saturating_sub(1);
        if self.record.current_step_index < last {
            if let Err(request) = self.apply_step(last).await {
                let reason = request.reason.clone();
                self.start_rollback(request);
                return CommandOutcome::Rejected { reason };
            }
        }

        if self.promote().await {
            CommandOutcome::Accepted
        } else {
            CommandOutcome::Rejected {
                reason: "promotion failed".to_string(),
            }
        }
    }

    // ── Rollback ──────────────────────────────────────────────────

    fn start_rollback(&mut self, request: RollbackRequest) {
        self.deferred = None;
        if self.rollback.is_some() || self.guard.is_claimed() {
            info!(session = %self.record.id, reason = %request.reason, "rollback already dispatched");
            self.record.append(AuditEvent::RollbackSkipped {
                reason: request.reason,
            });
            return;
        }

        let executor = self.executor.clone();
        let target = self.target.clone();
        let guard = Arc::clone(&self.guard);
        // Detached so that stopping the session never cancels a rollback.
        self.rollback = Some(tokio::spawn(async move {
            executor.execute(&target, &guard, request).await
        }));
    }

    fn finish_rollback(&mut self, joined: Result<RollbackResult, JoinError>) {
        let event = match joined {
            Ok(RollbackResult::Completed { event, .. } | RollbackResult::Failed { event, .. }) => event,
            Ok(RollbackResult::AlreadyTriggered) => {
                self.record.append(AuditEvent::RollbackSkipped {
                    reason: "rollback already triggered".to_string(),
                });
                return;
            }
            Err(e) => {
                error!(session = %self.record.id, error = %e, "rollback task failed");
                self.alert(
                    Severity::Fatal,
                    format!("rollback task failed, manual intervention required: {e}"),
                );
                RollbackEvent {
                    session_id: self.record.id.clone(),
                    reason: "rollback task failed".to_string(),
                    triggering_signal: None,
                    observed_values: Vec::new(),
                    timestamp: epoch_secs(),
                    actions_taken: vec![format!("rollback task failed: {e}")],
                    outcome: RollbackOutcome::Failed,
                }
            }
        };

        self.record.append(AuditEvent::Rollback(event));
        self.record.finish(SessionStatus::RolledBack);
    }

    // ── Output ────────────────────────────────────────────────────

    fn alert(&self, severity: Severity, reason: String) {
        self.alerts.push(Alert {
            severity,
            service: self.target.service.clone(),
            environment: self.target.environment.clone(),
            reason,
            timestamp: epoch_secs(),
            session_id: self.record.id.clone(),
        });
    }

    fn publish(&self) -> SessionSnapshot {
        let snapshot = build_snapshot(
            &self.record,
            &self.plan,
            &self.breaker,
            &self.stale,
            self.operator_paused,
            self.rollback.is_some(),
        );
        self.status_tx.send_replace(snapshot.clone());
        snapshot
    }
}

fn build_snapshot(
    record: &SessionRecord,
    plan: &SessionPlan,
    breaker: &CircuitBreaker,
    stale: &BTreeSet<String>,
    operator_paused: bool,
    rollback_in_flight: bool,
) -> SessionSnapshot {
    SessionSnapshot {
        id: record.id.clone(),
        service: plan.service.clone(),
        environment: plan.environment.clone(),
        steps: record.steps.to_vec(),
        current_step_index: record.current_step_index,
        steps_applied: record.steps_applied,
        circuit: breaker.snapshot(),
        status: record.status,
        stale_signals: stale.iter().cloned().collect(),
        operator_paused,
        rollback_in_flight,
        started_at: record.started_at,
        finished_at: record.finished_at,
        audit_log: record.audit_log.clone(),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn join_rollback(
    handle: &mut Option<JoinHandle<RollbackResult>>,
) -> Result<RollbackResult, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => pending().await,
    }
}
