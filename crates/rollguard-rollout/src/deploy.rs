//! Deployment backend seam and its adapters.
//!
//! The controller only ever asks for four things: shift traffic to a
//! weight, abort, undo, and promote. How that happens is up to the
//! backend. Two adapters ship here: a dry-run backend that only logs, and
//! a command backend that shells out to operator-supplied templates.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info};

use rollguard_core::{DeployCommands, RollbackAction};
use rollguard_probe::BoxFuture;

/// Which deployment a call is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployTarget {
    pub session_id: String,
    pub service: String,
    pub environment: String,
}

/// Mutates live traffic for a service.
///
/// Implementations must be safe to call from several sessions at once.
pub trait DeploymentBackend: Send + Sync {
    /// Route `percent` of traffic to the new version.
    fn set_weight<'a>(&'a self, target: &'a DeployTarget, percent: u8)
    -> BoxFuture<'a, anyhow::Result<()>>;

    /// Stop the rollout and return all traffic to the stable version.
    fn abort<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Revert to the previous revision.
    fn undo<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Make the new version the stable one.
    fn promote<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Dispatch a rollback action to the matching backend call.
pub fn revert<'a>(
    backend: &'a dyn DeploymentBackend,
    target: &'a DeployTarget,
    action: RollbackAction,
) -> BoxFuture<'a, anyhow::Result<()>> {
    match action {
        RollbackAction::Abort => backend.abort(target),
        RollbackAction::Undo => backend.undo(target),
    }
}

// ── Dry run ───────────────────────────────────────────────────────

/// Logs every call and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunDeployer;

impl DryRunDeployer {
    fn log(target: &DeployTarget, action: &str) {
        info!(
            session = %target.session_id,
            service = %target.service,
            environment = %target.environment,
            action,
            "dry run: deployment call skipped"
        );
    }
}

impl DeploymentBackend for DryRunDeployer {
    fn set_weight<'a>(
        &'a self,
        target: &'a DeployTarget,
        percent: u8,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            Self::log(target, &format!("set_weight {percent}%"));
            Ok(())
        })
    }

    fn abort<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            Self::log(target, "abort");
            Ok(())
        })
    }

    fn undo<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            Self::log(target, "undo");
            Ok(())
        })
    }

    fn promote<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            Self::log(target, "promote");
            Ok(())
        })
    }
}

// ── Shell commands ────────────────────────────────────────────────

/// Default bound on one deploy command.
pub const DEFAULT_DEPLOY_TIMEOUT: Duration = Duration::from_secs(60);

/// Runs `sh -c <template>` for each call.
///
/// Templates may reference `{service}`, `{environment}`, `{session}` and,
/// for `set_weight`, `{weight}`. A non-zero exit status is an error
/// carrying the command's stderr. A command that outlives the timeout is
/// killed and reported as failed.
#[derive(Debug, Clone)]
pub struct CommandDeployer {
    commands: DeployCommands,
    timeout: Duration,
}

impl CommandDeployer {
    pub fn new(commands: DeployCommands) -> Self {
        Self {
            commands,
            timeout: DEFAULT_DEPLOY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, template: &str, target: &DeployTarget, weight: Option<u8>) -> anyhow::Result<()> {
        let command = render(template, target, weight);
        debug!(session = %target.session_id, %command, "running deploy command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| anyhow!("{command:?} did not finish within {:?}", self.timeout))?
            .with_context(|| format!("failed to spawn {command:?}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{command:?} exited with {}: {}", output.status, stderr.trim());
        }
        Ok(())
    }
}

impl DeploymentBackend for CommandDeployer {
    fn set_weight<'a>(
        &'a self,
        target: &'a DeployTarget,
        percent: u8,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.run(&self.commands.set_weight, target, Some(percent)))
    }

    fn abort<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.run(&self.commands.abort, target, None))
    }

    fn undo<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.run(&self.commands.undo, target, None))
    }

    fn promote<'a>(&'a self, target: &'a DeployTarget) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.run(&self.commands.promote, target, None))
    }
}

fn render(template: &str, target: &DeployTarget, weight: Option<u8>) -> String {
    let mut out = template
        .replace("{service}", &target.service)
        .replace("{environment}", &target.environment)
        .replace("{session}", &target.session_id);
    if let Some(weight) = weight {
        out = out.replace("{weight}", &weight.to_string());
    }
    out
}
