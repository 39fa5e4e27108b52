//! End-to-end rollout scenarios.
//!
//! Each test runs a real `SessionManager` against scripted metrics, a
//! counting deployment backend and a recording alert sink. Time is paused,
//! so step pauses and probe intervals elapse instantly but in order.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rollguard_core::{
    Alert, AuditEvent, BreakerSettings, BreakerState, CommandOutcome, Comparator, CooldownBackoff,
    Limit, MetricSignal, OperatorCommand, ProbeSettings, RollbackAction, RollbackOutcome,
    RollbackSettings, RolloutStep, Sample, SessionPlan, SessionStatus, Severity, SignalKind,
    SignalPlan, Threshold,
};
use rollguard_probe::{BoxFuture, MetricsBackend, TimeRange};
use rollguard_rollout::{
    Backends, DeployTarget, DeploymentBackend, AlertSink, SessionError, SessionManager,
};
use rollguard_state::ArchiveStore;

// ── Test doubles ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Reply {
    Value(f64),
    /// Never answers; the probe times out.
    Hang,
    Empty,
}

/// Replays a per-query script, then keeps answering with a default.
struct ScriptedMetrics {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    default: Reply,
}

impl ScriptedMetrics {
    fn steady(value: f64) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: Reply::Value(value),
        }
    }

    fn script(self, query: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(query.to_string(), replies.into_iter().collect());
        self
    }

    fn then(mut self, default: Reply) -> Self {
        self.default = default;
        self
    }
}

impl MetricsBackend for ScriptedMetrics {
    fn query<'a>(&'a self, query: &'a str, range: TimeRange) -> BoxFuture<'a, anyhow::Result<Vec<Sample>>> {
        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(query)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.default);
        Box::pin(async move {
            match reply {
                Reply::Value(value) => Ok(vec![Sample {
                    value,
                    timestamp: range.end,
                }]),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
                Reply::Empty => Ok(Vec::new()),
            }
        })
    }
}

/// Records weights; fails the first `abort_failures` aborts.
#[derive(Default)]
struct CountingDeployer {
    weights: Mutex<Vec<u8>>,
    aborts: AtomicU32,
    promotes: AtomicU32,
    abort_failures: u32,
}

impl CountingDeployer {
    fn failing_aborts(abort_failures: u32) -> Self {
        Self {
            abort_failures,
            ..Self::default()
        }
    }

    fn aborts(&self) -> u32 {
        self.aborts.load(Ordering::SeqCst)
    }

    fn promotes(&self) -> u32 {
        self.promotes.load(Ordering::SeqCst)
    }

    fn weights(&self) -> Vec<u8> {
        self.weights.lock().unwrap().clone()
    }
}

impl DeploymentBackend for CountingDeployer {
    fn set_weight<'a>(&'a self, _: &'a DeployTarget, percent: u8) -> BoxFuture<'a, anyhow::Result<()>> {
        self.weights.lock().unwrap().push(percent);
        Box::pin(async { Ok(()) })
    }

    fn abort<'a>(&'a self, _: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        let n = self.aborts.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = n <= self.abort_failures;
        Box::pin(async move {
            if fail {
                anyhow::bail!("deployment api returned 503");
            }
            Ok(())
        })
    }

    fn undo<'a>(&'a self, _: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async { anyhow::bail!("undo not expected") })
    }

    fn promote<'a>(&'a self, _: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        self.promotes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<Alert>>);

impl RecordingSink {
    fn count(&self, severity: Severity) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.severity == severity)
            .count()
    }
}

impl AlertSink for RecordingSink {
    fn send<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, anyhow::Result<()>> {
        self.0.lock().unwrap().push(alert.clone());
        Box::pin(async { Ok(()) })
    }
}

/// Accepts alerts and never finishes delivering them.
struct HangingSink;

impl AlertSink for HangingSink {
    fn send<'a>(&'a self, _: &'a Alert) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(std::future::pending())
    }
}

// ── Fixtures ──────────────────────────────────────────────────────

fn latency_signal(name: &str) -> MetricSignal {
    MetricSignal {
        name: name.to_string(),
        kind: SignalKind::Latency { percentile: 99.0 },
        query: name.to_string(),
        interval: Duration::from_secs(15),
        unit: "ms".to_string(),
        required: true,
    }
}

fn latency_gate(name: &str, limit: Limit) -> SignalPlan {
    SignalPlan {
        signal: latency_signal(name),
        threshold: Threshold {
            signal: name.to_string(),
            comparator: Comparator::Le,
            limit,
            max_consecutive_breaches: 3,
        },
    }
}

fn plan(weights: &[u8], signals: Vec<SignalPlan>) -> SessionPlan {
    let pause = Duration::from_secs(120);
    SessionPlan {
        service: "checkout".to_string(),
        environment: "prod".to_string(),
        steps: weights
            .iter()
            .map(|&weight_percent| RolloutStep { weight_percent, pause })
            .collect(),
        signals: signals.into(),
        breaker: BreakerSettings {
            cooldown: Duration::from_secs(60),
            cooldown_max: Duration::from_secs(600),
            backoff: CooldownBackoff::Exponential,
            success_threshold: 3,
        },
        probe: ProbeSettings {
            timeout: Duration::from_secs(5),
            staleness_limit: 5,
            baseline_window: Duration::from_secs(600),
        },
        rollback: RollbackSettings {
            max_attempts: 3,
            backoff_base: Duration::from_secs(5),
        },
        rollback_action: RollbackAction::Abort,
        auto_rollback: true,
    }
}

fn p99_plan(weights: &[u8]) -> SessionPlan {
    plan(weights, vec![latency_gate("p99", Limit::Absolute(500.0))])
}

struct Rig {
    manager: SessionManager,
    deployer: Arc<CountingDeployer>,
    sink: Arc<RecordingSink>,
    archive: ArchiveStore,
}

fn rig(metrics: ScriptedMetrics, deployer: CountingDeployer) -> Rig {
    let deployer = Arc::new(deployer);
    let sink = Arc::new(RecordingSink::default());
    let archive = ArchiveStore::open_in_memory().unwrap();
    let backends = Backends {
        metrics: Arc::new(metrics),
        deployer: deployer.clone(),
        alerts: sink.clone(),
    };
    Rig {
        manager: SessionManager::new(backends, archive.clone()),
        deployer,
        sink,
        archive,
    }
}

// ── Scenarios ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn healthy_canary_promotes_after_four_steps() {
    let rig = rig(ScriptedMetrics::steady(120.0), CountingDeployer::default());
    let id = rig.manager.start(p99_plan(&[5, 25, 50, 100])).await.unwrap();

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Promoted);
    assert_eq!(done.steps_applied, 4);
    assert_eq!(done.current_step_index, 3);
    assert!(done.rollback_events().is_empty());
    assert_eq!(rig.deployer.weights(), vec![5, 25, 50, 100]);
    assert_eq!(rig.deployer.promotes(), 1);
    assert_eq!(rig.deployer.aborts(), 0);

    // Terminal sessions leave the live map and land in the archive.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(rig.sink.count(Severity::Info), 1);
    assert!(matches!(rig.manager.get(&id).await, Err(SessionError::NotFound(_))));
    let archived = rig.archive.get_session(&id).unwrap().unwrap();
    assert_eq!(archived.status, SessionStatus::Promoted);
}

#[tokio::test(start_paused = true)]
async fn three_consecutive_breaches_open_breaker_and_roll_back_once() {
    let metrics = ScriptedMetrics::steady(100.0)
        .script("p99", [600.0, 100.0, 600.0, 600.0, 600.0].map(Reply::Value))
        .then(Reply::Value(600.0));
    let rig = rig(metrics, CountingDeployer::default());
    let id = rig.manager.start(p99_plan(&[5, 25, 50, 100])).await.unwrap();

    // One breach is not enough.
    tokio::time::sleep(Duration::from_secs(20)).await;
    let snapshot = rig.manager.get(&id).await.unwrap();
    assert_eq!(snapshot.circuit.state, BreakerState::Closed);
    assert_eq!(snapshot.circuit.failure_streak, 1);

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::RolledBack);
    assert_eq!(done.circuit.state, BreakerState::Open);

    let events = done.rollback_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].triggering_signal.as_deref(), Some("p99"));
    assert_eq!(events[0].observed_values, vec![600.0, 600.0, 600.0]);
    assert_eq!(events[0].outcome, RollbackOutcome::Succeeded);

    assert_eq!(rig.deployer.aborts(), 1);
    assert_eq!(rig.deployer.promotes(), 0);
    assert_eq!(rig.deployer.weights(), vec![5]);
    assert_eq!(rig.sink.count(Severity::Critical), 1);
    assert_eq!(rig.archive.list_rollbacks(&id).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_breaches_trigger_a_single_rollback() {
    let metrics = ScriptedMetrics::steady(900.0);
    let rig = rig(metrics, CountingDeployer::default());
    let signals = vec![
        latency_gate("p99", Limit::Absolute(500.0)),
        latency_gate("p95", Limit::Absolute(300.0)),
    ];
    let id = rig.manager.start(plan(&[10, 100], signals)).await.unwrap();

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::RolledBack);
    assert_eq!(done.rollback_events().len(), 1);
    assert_eq!(done.circuit.trips, 1);
    assert_eq!(rig.deployer.aborts(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_metrics_pause_until_fresh_data_arrives() {
    // Eight probes time out (5s each at a 15s cadence), then data returns.
    let metrics = ScriptedMetrics::steady(100.0).script("p99", [Reply::Hang; 8]);
    let rig = rig(metrics, CountingDeployer::default());
    let id = rig.manager.start(p99_plan(&[50, 100])).await.unwrap();

    // The first pause ended at 120s, but the signal went stale at 100s.
    tokio::time::sleep(Duration::from_secs(150)).await;
    let snapshot = rig.manager.get(&id).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.stale_signals, vec!["p99".to_string()]);
    assert_eq!(snapshot.steps_applied, 1);
    assert!(snapshot.rollback_events().is_empty());
    assert_eq!(rig.deployer.promotes(), 0);
    assert_eq!(rig.sink.count(Severity::Warning), 1);

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Promoted);
    assert!(done.rollback_events().is_empty());
    assert_eq!(rig.deployer.aborts(), 0);
    assert!(done
        .audit_log
        .iter()
        .any(|e| matches!(&e.event, AuditEvent::StaleCleared { signal } if signal == "p99")));
}

#[tokio::test(start_paused = true)]
async fn rollback_succeeds_on_third_attempt_without_escalation() {
    let rig = rig(
        ScriptedMetrics::steady(800.0),
        CountingDeployer::failing_aborts(2),
    );
    let id = rig.manager.start(p99_plan(&[5, 100])).await.unwrap();

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::RolledBack);
    assert_eq!(rig.deployer.aborts(), 3);

    let events = done.rollback_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, RollbackOutcome::Succeeded);
    assert_eq!(events[0].actions_taken.len(), 3);
    assert_eq!(rig.sink.count(Severity::Fatal), 0);
    assert_eq!(rig.sink.count(Severity::Critical), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_rollback_escalates_exactly_once() {
    let rig = rig(
        ScriptedMetrics::steady(800.0),
        CountingDeployer::failing_aborts(u32::MAX),
    );
    let id = rig.manager.start(p99_plan(&[5, 100])).await.unwrap();

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::RolledBack);
    assert_eq!(rig.deployer.aborts(), 3);
    assert_eq!(rig.sink.count(Severity::Fatal), 1);

    let events = done.rollback_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, RollbackOutcome::Failed);
    let failed = events[0]
        .actions_taken
        .iter()
        .filter(|a| a.contains("failed"))
        .count();
    assert_eq!(failed, 3);
    assert!(events[0].actions_taken.iter().any(|a| a.contains("escalated")));
}

#[tokio::test(start_paused = true)]
async fn breaker_opening_during_stale_pause_defers_rollback() {
    // p99 stops answering and goes stale at 100s; p95 degrades after 150s
    // and opens the breaker at 195s. p99 answers again at 315s.
    let metrics = ScriptedMetrics::steady(900.0)
        .script("p95", [Reply::Value(100.0); 10])
        .script("p99", [Reply::Hang; 15]);
    let rig = rig(metrics, CountingDeployer::default());
    let signals = vec![
        latency_gate("p99", Limit::Absolute(500.0)),
        latency_gate("p95", Limit::Absolute(300.0)),
    ];
    let id = rig.manager.start(plan(&[50, 100], signals)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(290)).await;
    let snapshot = rig.manager.get(&id).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.stale_signals, vec!["p99".to_string()]);
    assert_eq!(snapshot.circuit.state, BreakerState::Open);
    assert!(snapshot.rollback_events().is_empty());
    assert!(snapshot
        .audit_log
        .iter()
        .any(|e| matches!(&e.event, AuditEvent::RollbackDeferred { signal: Some(s) } if s == "p95")));
    assert_eq!(rig.deployer.aborts(), 0);
    assert_eq!(rig.deployer.promotes(), 0);

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::RolledBack);
    assert_eq!(rig.deployer.aborts(), 1);
    let events = done.rollback_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].triggering_signal.as_deref(), Some("p95"));

    let cleared = done
        .audit_log
        .iter()
        .position(|e| matches!(&e.event, AuditEvent::StaleCleared { signal } if signal == "p99"))
        .unwrap();
    let rolled_back = done
        .audit_log
        .iter()
        .position(|e| matches!(e.event, AuditEvent::Rollback(_)))
        .unwrap();
    assert!(cleared < rolled_back);
}

#[tokio::test(start_paused = true)]
async fn hung_alert_sink_does_not_block_operator_abort() {
    let deployer = Arc::new(CountingDeployer::default());
    let backends = Backends {
        metrics: Arc::new(ScriptedMetrics::steady(100.0).script("p99", [Reply::Hang; 5])),
        deployer: deployer.clone(),
        alerts: Arc::new(HangingSink),
    };
    let manager = SessionManager::new(backends, ArchiveStore::open_in_memory().unwrap());
    let id = manager.start(p99_plan(&[50, 100])).await.unwrap();

    // The stale warning at 100s goes to a sink that never answers.
    tokio::time::sleep(Duration::from_secs(110)).await;
    let snapshot = manager.get(&id).await.unwrap();
    assert_eq!(snapshot.stale_signals, vec!["p99".to_string()]);

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        manager.command(&id, OperatorCommand::Abort),
    )
    .await
    .expect("abort answered promptly")
    .unwrap();
    assert_eq!(outcome, CommandOutcome::Accepted);

    let done = tokio::time::timeout(Duration::from_secs(3600), manager.wait(&id))
        .await
        .expect("session finished")
        .unwrap();
    assert_eq!(done.status, SessionStatus::RolledBack);
    assert_eq!(deployer.aborts(), 1);
    assert_eq!(deployer.weights(), vec![50]);
}

#[tokio::test(start_paused = true)]
async fn stopping_during_rollback_lets_it_finish() {
    // Breaker opens at 45s; aborts fail at 45s and 50s, succeed at 60s.
    let rig = rig(
        ScriptedMetrics::steady(800.0),
        CountingDeployer::failing_aborts(2),
    );
    let id = rig.manager.start(p99_plan(&[5, 100])).await.unwrap();

    tokio::time::sleep(Duration::from_secs(47)).await;
    assert_eq!(rig.deployer.aborts(), 1);
    assert!(rig.manager.get(&id).await.unwrap().rollback_in_flight);

    let stopped = rig.manager.stop(&id).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::RolledBack);
    assert_eq!(rig.deployer.aborts(), 3);
    assert_eq!(stopped.rollback_events()[0].outcome, RollbackOutcome::Succeeded);
    assert!(stopped
        .audit_log
        .iter()
        .any(|e| matches!(e.event, AuditEvent::Stopped)));

    tokio::time::sleep(Duration::from_secs(1)).await;
    let archived = rig.archive.get_session(&id).unwrap().unwrap();
    assert_eq!(archived.status, SessionStatus::RolledBack);
    assert_eq!(rig.archive.list_rollbacks(&id).unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn observe_only_session_recovers_and_promotes() {
    // Three breaches open the breaker at 45s. It half-opens at 105s and
    // closes after three good samples at 135s.
    let metrics = ScriptedMetrics::steady(100.0).script("p99", [Reply::Value(900.0); 3]);
    let rig = rig(metrics, CountingDeployer::default());
    let mut plan = p99_plan(&[50, 100]);
    plan.auto_rollback = false;
    let id = rig.manager.start(plan).await.unwrap();

    tokio::time::sleep(Duration::from_secs(100)).await;
    let snapshot = rig.manager.get(&id).await.unwrap();
    assert_eq!(snapshot.circuit.state, BreakerState::Open);
    assert_eq!(snapshot.steps_applied, 1);
    assert!(snapshot
        .audit_log
        .iter()
        .any(|e| matches!(e.event, AuditEvent::RollbackHeld { .. })));

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Promoted);
    assert_eq!(done.circuit.state, BreakerState::Closed);
    assert_eq!(done.circuit.trips, 1);
    assert!(done.rollback_events().is_empty());
    assert!(done.audit_log.iter().any(|e| matches!(
        e.event,
        AuditEvent::BreakerTransition {
            from: BreakerState::HalfOpen,
            to: BreakerState::Closed,
            ..
        }
    )));
    assert_eq!(rig.deployer.weights(), vec![50, 100]);
    assert_eq!(rig.deployer.aborts(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(rig.sink.count(Severity::Critical), 1);
}

// ── Session management ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unmeasurable_baseline_fails_start() {
    let rig = rig(
        ScriptedMetrics::steady(100.0).then(Reply::Empty),
        CountingDeployer::default(),
    );
    let signals = vec![latency_gate("p99", Limit::BaselineFactor(1.5))];
    let err = rig.manager.start(plan(&[10, 100], signals)).await.unwrap_err();
    assert!(
        matches!(&err, SessionError::BaselineUnavailable { signal, .. } if signal == "p99"),
        "{err}"
    );
    assert!(rig.manager.list().await.is_empty());
    assert!(rig.deployer.weights().is_empty());
}

#[tokio::test(start_paused = true)]
async fn baseline_relative_limit_is_fixed_at_start() {
    // Baseline 200ms, limit 1.5x = 300ms; live traffic then sits at 350ms.
    let metrics = ScriptedMetrics::steady(350.0).script("p99", [Reply::Value(200.0)]);
    let rig = rig(metrics, CountingDeployer::default());
    let signals = vec![latency_gate("p99", Limit::BaselineFactor(1.5))];
    let id = rig.manager.start(plan(&[10, 100], signals)).await.unwrap();

    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::RolledBack);
    assert_eq!(done.rollback_events()[0].observed_values, vec![350.0; 3]);
}

#[tokio::test(start_paused = true)]
async fn operator_commands_reach_the_session() {
    let rig = rig(ScriptedMetrics::steady(100.0), CountingDeployer::default());
    let id = rig.manager.start(p99_plan(&[5, 25, 100])).await.unwrap();

    let outcome = rig.manager.command(&id, OperatorCommand::Pause).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Accepted);
    tokio::time::sleep(Duration::from_secs(600)).await;
    let snapshot = rig.manager.get(&id).await.unwrap();
    assert!(snapshot.operator_paused);
    assert_eq!(snapshot.steps_applied, 1);

    let outcome = rig.manager.command(&id, OperatorCommand::Abort).await.unwrap();
    assert_eq!(outcome, CommandOutcome::Accepted);
    let done = rig.manager.wait(&id).await.unwrap();
    assert_eq!(done.status, SessionStatus::RolledBack);
    assert_eq!(done.rollback_events()[0].reason, "aborted by operator");

    // Terminal sessions no longer accept commands.
    let err = rig.manager.command(&id, OperatorCommand::Resume).await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn unknown_session_is_not_found() {
    let rig = rig(ScriptedMetrics::steady(100.0), CountingDeployer::default());
    assert!(matches!(rig.manager.get("nope").await, Err(SessionError::NotFound(_))));
    assert!(matches!(
        rig.manager.command("nope", OperatorCommand::Pause).await,
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(rig.manager.wait("nope").await, Err(SessionError::NotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn stop_tears_down_without_archiving() {
    let rig = rig(ScriptedMetrics::steady(100.0), CountingDeployer::default());
    let id = rig.manager.start(p99_plan(&[5, 100])).await.unwrap();
    assert_eq!(rig.manager.list().await.len(), 1);

    let stopped = rig.manager.stop(&id).await.unwrap();
    assert_eq!(stopped.status, SessionStatus::Running);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rig.manager.list().await.is_empty());
    assert!(rig.archive.get_session(&id).unwrap().is_none());
    assert_eq!(rig.deployer.promotes(), 0);
}

#[tokio::test(start_paused = true)]
async fn sessions_are_independent() {
    let metrics = ScriptedMetrics::steady(100.0).script("bad", [Reply::Value(900.0); 16]);
    let rig = rig(metrics, CountingDeployer::default());

    let good = rig.manager.start(p99_plan(&[50, 100])).await.unwrap();
    let bad = rig
        .manager
        .start(plan(&[50, 100], vec![latency_gate("bad", Limit::Absolute(500.0))]))
        .await
        .unwrap();
    assert_ne!(good, bad);

    let (good, bad) = tokio::join!(rig.manager.wait(&good), rig.manager.wait(&bad));
    assert_eq!(good.unwrap().status, SessionStatus::Promoted);
    assert_eq!(bad.unwrap().status, SessionStatus::RolledBack);
}
