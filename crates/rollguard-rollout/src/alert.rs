//! Alert sink seam and its adapters.
//!
//! Sessions never wait on delivery: alerts go through an [`AlertQueue`]
//! whose task delivers them in order, each bounded by the sink's
//! delivery timeout.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail};
use http::Method;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use rollguard_core::{Alert, Severity};
use rollguard_probe::BoxFuture;
use rollguard_probe::client::{self, HttpTarget};

/// Default bound on a single alert delivery.
pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers alerts to whoever is on call.
pub trait AlertSink: Send + Sync {
    fn send<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, anyhow::Result<()>>;

    /// How long one delivery may take before it is given up.
    fn delivery_timeout(&self) -> Duration {
        DEFAULT_ALERT_TIMEOUT
    }
}

/// Deliver `alert`, logging instead of failing when the sink is down or
/// does not answer in time.
pub async fn notify(sink: &dyn AlertSink, alert: Alert) {
    let limit = sink.delivery_timeout();
    let result = match tokio::time::timeout(limit, sink.send(&alert)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("no answer within {limit:?}")),
    };
    if let Err(e) = result {
        error!(
            session = %alert.session_id,
            severity = ?alert.severity,
            error = %format!("{e:#}"),
            "failed to deliver alert"
        );
    }
}

/// Ordered, non-blocking alert delivery for one session.
pub struct AlertQueue {
    tx: mpsc::UnboundedSender<Alert>,
    task: JoinHandle<()>,
}

impl AlertQueue {
    /// Spawn the delivery task for `sink`.
    pub fn spawn(sink: Arc<dyn AlertSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Alert>();
        let task = tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                notify(sink.as_ref(), alert).await;
            }
            debug!("alert queue drained");
        });
        Self { tx, task }
    }

    /// Queue `alert` without waiting for delivery.
    pub fn push(&self, alert: Alert) {
        if let Err(e) = self.tx.send(alert) {
            error!(session = %e.0.session_id, "alert queue closed, alert dropped");
        }
    }

    /// Deliver everything still queued, then stop the task.
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!(error = %e, "alert delivery task failed");
        }
    }
}

/// Writes alerts to the log at a level matching their severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let Alert {
                severity,
                service,
                environment,
                reason,
                session_id,
                ..
            } = alert;
            match severity {
                Severity::Info => info!(session = %session_id, %service, %environment, "{reason}"),
                Severity::Warning => warn!(session = %session_id, %service, %environment, "{reason}"),
                Severity::Critical | Severity::Fatal => {
                    error!(session = %session_id, %service, %environment, ?severity, "{reason}")
                }
            }
            Ok(())
        })
    }
}

/// POSTs each alert as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    target: HttpTarget,
    timeout: Duration,
}

impl WebhookAlertSink {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            target: HttpTarget::parse(url)?,
            timeout: DEFAULT_ALERT_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl AlertSink for WebhookAlertSink {
    fn send<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let body = serde_json::to_vec(alert)?;
            let mut path = self.target.path("");
            if path.is_empty() {
                path.push('/');
            }
            let request = client::send(
                &self.target,
                Method::POST,
                &path,
                Some(("application/json", body)),
            );
            let (status, _) = tokio::time::timeout(self.timeout, request)
                .await
                .map_err(|_| anyhow!("alert webhook did not answer within {:?}", self.timeout))??;
            if !status.is_success() {
                bail!("alert webhook returned {status}");
            }
            Ok(())
        })
    }

    fn delivery_timeout(&self) -> Duration {
        self.timeout
    }
}
