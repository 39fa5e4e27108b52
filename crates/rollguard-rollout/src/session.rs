//! Session manager — owns every live rollout session.
//!
//! Each session is a controller task plus its probe tasks. The manager
//! keeps a control channel and a status receiver per session; callers
//! never touch session state directly. When a session reaches a terminal
//! status it is archived and dropped from the live map.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tracing::{error, info, warn};

use rollguard_core::{
    CommandOutcome, ConfigError, OperatorCommand, SessionId, SessionPlan, SessionSnapshot,
    ThresholdIssue,
};
use rollguard_probe::{GatedSignal, MetricsBackend, MetricsProbe, SignalMonitor};
use rollguard_state::ArchiveStore;

use crate::alert::AlertSink;
use crate::controller::{ControlMessage, RolloutController};
use crate::deploy::DeploymentBackend;
use crate::error::{SessionError, SessionResult};
use crate::rollback::RollbackExecutor;

const OBSERVATION_BUFFER: usize = 256;
const CONTROL_BUFFER: usize = 16;

/// External systems a session talks to.
#[derive(Clone)]
pub struct Backends {
    pub metrics: Arc<dyn MetricsBackend>,
    pub deployer: Arc<dyn DeploymentBackend>,
    pub alerts: Arc<dyn AlertSink>,
}

struct LiveSession {
    control: mpsc::Sender<ControlMessage>,
    status: watch::Receiver<SessionSnapshot>,
}

/// Starts, tracks and stops rollout sessions.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<SessionId, LiveSession>>>,
    backends: Backends,
    archive: ArchiveStore,
}

impl SessionManager {
    pub fn new(backends: Backends, archive: ArchiveStore) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            backends,
            archive,
        }
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    /// Start a session for `plan` and return its id.
    ///
    /// Baseline-relative thresholds are fixed here, before any traffic
    /// moves. A baseline that cannot be measured fails the start.
    pub async fn start(&self, plan: SessionPlan) -> SessionResult<SessionId> {
        let probe = MetricsProbe::new(Arc::clone(&self.backends.metrics), plan.probe.timeout);
        let gated = self.resolve_signals(&plan, &probe).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let executor = RollbackExecutor::new(
            Arc::clone(&self.backends.deployer),
            Arc::clone(&self.backends.alerts),
            plan.rollback,
            plan.rollback_action,
        )
        .with_journal(self.archive.clone());

        let staleness_limit = plan.probe.staleness_limit;
        let controller = RolloutController::new(
            id.clone(),
            plan,
            Arc::clone(&self.backends.deployer),
            Arc::clone(&self.backends.alerts),
            executor,
        );
        let status = controller.subscribe();

        let (obs_tx, obs_rx) = mpsc::channel(OBSERVATION_BUFFER);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);

        // Hold the write lock across spawn so the session task cannot
        // remove its entry before it is inserted.
        let mut sessions = self.sessions.write().await;
        let mut monitor = SignalMonitor::spawn(&id, &gated, probe, staleness_limit, obs_tx);

        let registry = Arc::clone(&self.sessions);
        let archive = self.archive.clone();
        let session_id = id.clone();
        tokio::spawn(async move {
            let snapshot = controller.run(obs_rx, control_rx).await;
            monitor.stop();

            if snapshot.status.is_terminal() {
                match archive.archive_session(&snapshot) {
                    Ok(()) => info!(session = %session_id, status = ?snapshot.status, "session archived"),
                    Err(e) => error!(session = %session_id, error = %e, "failed to archive session"),
                }
            } else {
                warn!(session = %session_id, "session stopped before finishing, not archived");
            }
            registry.write().await.remove(&session_id);
        });

        sessions.insert(
            id.clone(),
            LiveSession {
                control: control_tx,
                status,
            },
        );
        info!(session = %id, signals = gated.len(), "session registered");
        Ok(id)
    }

    /// Snapshot of a live session.
    pub async fn get(&self, id: &str) -> SessionResult<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let live = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let snapshot = live.status.borrow().clone();
        if snapshot.status.is_terminal() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(snapshot)
    }

    /// Snapshots of all live sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        let mut out: Vec<_> = sessions
            .values()
            .map(|live| live.status.borrow().clone())
            .filter(|s| !s.status.is_terminal())
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Deliver an operator command and wait for its outcome.
    pub async fn command(&self, id: &str, command: OperatorCommand) -> SessionResult<CommandOutcome> {
        let control = self.control(id).await?;
        let (reply, rx) = oneshot::channel();
        control
            .send(ControlMessage::Command { command, reply })
            .await
            .map_err(|_| SessionError::NotFound(id.to_string()))?;
        rx.await.map_err(|_| SessionError::NotFound(id.to_string()))
    }

    /// Wait for a session to finish. Finished sessions come from the archive.
    pub async fn wait(&self, id: &str) -> SessionResult<SessionSnapshot> {
        let status = {
            let sessions = self.sessions.read().await;
            sessions.get(id).map(|live| live.status.clone())
        };

        let Some(mut status) = status else {
            return self
                .archive
                .get_session(id)?
                .ok_or_else(|| SessionError::NotFound(id.to_string()));
        };

        // Err means the controller exited without finishing (stopped).
        let _ = status.wait_for(|s| s.status.is_terminal()).await;
        let snapshot = status.borrow().clone();
        Ok(snapshot)
    }

    /// Stop watching a session. An in-flight rollback completes first.
    pub async fn stop(&self, id: &str) -> SessionResult<SessionSnapshot> {
        let (control, status) = {
            let sessions = self.sessions.read().await;
            let live = sessions
                .get(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            (live.control.clone(), live.status.clone())
        };

        let (reply, rx) = oneshot::channel();
        if control.send(ControlMessage::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
        let snapshot = status.borrow().clone();
        Ok(snapshot)
    }

    /// Stop every live session.
    pub async fn stop_all(&self) {
        let ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop(&id).await {
                warn!(session = %id, error = %e, "failed to stop session");
            }
        }
    }

    async fn control(&self, id: &str) -> SessionResult<mpsc::Sender<ControlMessage>> {
        let sessions = self.sessions.read().await;
        let live = sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if live.status.borrow().status.is_terminal() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(live.control.clone())
    }

    async fn resolve_signals(
        &self,
        plan: &SessionPlan,
        probe: &MetricsProbe,
    ) -> SessionResult<Vec<GatedSignal>> {
        let mut gated = Vec::with_capacity(plan.signals.len());
        let mut issues = Vec::new();

        for signal_plan in plan.signals.iter() {
            let name = &signal_plan.signal.name;
            let baseline = if signal_plan.threshold.needs_baseline() {
                let value = probe
                    .baseline(&signal_plan.signal, plan.probe.baseline_window)
                    .await
                    .map_err(|e| SessionError::BaselineUnavailable {
                        signal: name.clone(),
                        reason: e.to_string(),
                    })?;
                info!(signal = %name, baseline = value, "baseline fixed");
                Some(value)
            } else {
                None
            };

            match signal_plan.threshold.resolve(baseline) {
                Some(threshold) => gated.push(GatedSignal {
                    signal: signal_plan.signal.clone(),
                    threshold,
                }),
                None => issues.push(ThresholdIssue::new(
                    name.clone(),
                    "threshold could not be resolved to a finite limit",
                )),
            }
        }

        if !issues.is_empty() {
            return Err(ConfigError::ThresholdMisconfigured(issues).into());
        }
        Ok(gated)
    }
}
