//! Signal monitor — one background task per watched signal.
//!
//! Each task samples its signal on the signal's own cadence, classifies
//! the sample, updates its private [`BreachAccumulator`], and forwards an
//! [`Observation`] into the session's channel. Tasks never touch shared
//! session state; the receiving controller is the single writer.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rollguard_core::{Verdict, epoch_secs};

use crate::accumulator::BreachAccumulator;
use crate::evaluator::GatedSignal;
use crate::probe::MetricsProbe;

/// One classified sample, as seen by the signal's task.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub signal: String,
    pub required: bool,
    pub verdict: Verdict,
    /// Raw sample value, when one was obtained.
    pub value: Option<f64>,
    /// Breach streak after this observation.
    pub streak: u32,
    /// Consecutive unknowns after this observation.
    pub unknown_streak: u32,
    /// Breach streak has reached the threshold's limit.
    pub tripped: bool,
    /// Unknown streak has reached the staleness limit.
    pub stale: bool,
    pub timestamp: u64,
}

/// Handles to the probe tasks of one session.
pub struct SignalMonitor {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SignalMonitor {
    /// Spawn one polling task per signal, all sending into `tx`.
    pub fn spawn(
        session_id: &str,
        signals: &[GatedSignal],
        probe: MetricsProbe,
        staleness_limit: u32,
        tx: mpsc::Sender<Observation>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = signals
            .iter()
            .map(|gated| {
                let session_id = session_id.to_string();
                let gated = gated.clone();
                let probe = probe.clone();
                let tx = tx.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    run_signal_loop(&session_id, gated, probe, staleness_limit, tx, shutdown).await;
                })
            })
            .collect::<Vec<_>>();

        info!(session = %session_id, signals = handles.len(), "signal monitor started");
        Self {
            handles,
            shutdown_tx,
        }
    }

    /// Cancel every probe task immediately, including in-flight queries.
    pub fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    /// Number of probe tasks still running.
    pub fn active(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }
}

impl Drop for SignalMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The polling loop for a single signal.
async fn run_signal_loop(
    session_id: &str,
    gated: GatedSignal,
    probe: MetricsProbe,
    staleness_limit: u32,
    tx: mpsc::Sender<Observation>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = gated.signal.interval.max(Duration::from_millis(1));
    let mut accumulator =
        BreachAccumulator::new(gated.threshold.max_consecutive_breaches, staleness_limit);

    debug!(session = %session_id, signal = %gated.name(), ?interval, "signal loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let sample = match probe.sample(&gated.signal).await {
                    Ok(sample) => Some(sample),
                    Err(e) => {
                        debug!(session = %session_id, error = %e, "probe unavailable");
                        None
                    }
                };
                let verdict = gated.evaluate(sample.as_ref());
                let streak = accumulator.record(verdict);

                if verdict == Verdict::Breached {
                    warn!(
                        session = %session_id,
                        signal = %gated.name(),
                        value = sample.map(|s| s.value),
                        limit = gated.threshold.limit,
                        streak,
                        "threshold breached"
                    );
                }

                let observation = Observation {
                    signal: gated.signal.name.clone(),
                    required: gated.signal.required,
                    verdict,
                    value: sample.map(|s| s.value),
                    streak,
                    unknown_streak: accumulator.unknown_streak(),
                    tripped: accumulator.is_tripped(),
                    stale: accumulator.is_stale(),
                    timestamp: sample.map(|s| s.timestamp).unwrap_or_else(epoch_secs),
                };
                if tx.send(observation).await.is_err() {
                    debug!(session = %session_id, signal = %gated.name(), "observation channel closed");
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(session = %session_id, signal = %gated.name(), "signal loop shutting down");
                break;
            }
        }
    }
}
