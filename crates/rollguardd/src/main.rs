//! rollguardd — the rollguard daemon.
//!
//! Runs one metrics-gated rollout session from a config file and serves
//! the operator API while it runs:
//! - Archive (redb)
//! - Metrics backend (Prometheus)
//! - Deployment backend (shell commands, or dry run)
//! - Alert sink (webhook, or log)
//! - Session manager + REST API
//!
//! # Usage
//!
//! ```text
//! rollguardd run --config rollout.toml --data-dir /var/lib/rollguard
//! rollguardd validate --config rollout.toml
//! rollguardd audit --data-dir /var/lib/rollguard --session <id>
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use rollguard_core::duration::format_duration;
use rollguard_core::{ConfigError, RollguardConfig, SessionPlan, SessionStatus};
use rollguard_probe::{MetricsBackend, PrometheusBackend};
use rollguard_rollout::{
    AlertSink, Backends, CommandDeployer, DeploymentBackend, DryRunDeployer, SessionManager,
    TracingAlertSink, WebhookAlertSink,
};
use rollguard_state::ArchiveStore;

#[derive(Parser)]
#[command(name = "rollguardd", about = "rollguard daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run one rollout session to completion.
    Run {
        /// Rollout config file.
        #[arg(long)]
        config: PathBuf,

        /// Data directory for the audit archive.
        #[arg(long, default_value = "/var/lib/rollguard")]
        data_dir: PathBuf,

        /// Address for the operator API.
        #[arg(long, default_value = "127.0.0.1:8480")]
        listen: SocketAddr,

        /// Prometheus address, overriding `backends.prometheus`.
        #[arg(long)]
        prometheus: Option<String>,
    },

    /// Check a config file and report every problem in it.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },

    /// Print archived sessions and rollback events as JSON.
    Audit {
        #[arg(long, default_value = "/var/lib/rollguard")]
        data_dir: PathBuf,

        /// Only this session, with its rollback journal.
        #[arg(long)]
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            data_dir,
            listen,
            prometheus,
        } => run(&config, &data_dir, listen, prometheus).await,
        Command::Validate { config } => validate(&config),
        Command::Audit { data_dir, session } => audit(&data_dir, session.as_deref()),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_plan(path: &Path) -> anyhow::Result<(RollguardConfig, SessionPlan)> {
    let config = RollguardConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    let plan = config.validate()?;
    Ok((config, plan))
}

async fn run(
    config_path: &Path,
    data_dir: &Path,
    listen: SocketAddr,
    prometheus: Option<String>,
) -> anyhow::Result<ExitCode> {
    let (config, plan) = load_plan(config_path)?;
    info!(
        service = %plan.service,
        environment = %plan.environment,
        steps = plan.steps.len(),
        signals = plan.signals.len(),
        "rollguard daemon starting"
    );

    // ── Backends ───────────────────────────────────────────────

    let Some(prometheus) = prometheus.or(config.backends.prometheus.clone()) else {
        bail!("no metrics backend: set backends.prometheus or pass --prometheus");
    };
    let metrics: Arc<dyn MetricsBackend> = Arc::new(PrometheusBackend::new(&prometheus)?);
    info!(url = %prometheus, "metrics backend configured");

    let deployer: Arc<dyn DeploymentBackend> = match &config.backends.deploy {
        Some(commands) => Arc::new(
            CommandDeployer::new(commands.clone()).with_timeout(config.backends.deploy_timeout),
        ),
        None => {
            warn!("backends.deploy not set, running in dry-run mode");
            Arc::new(DryRunDeployer)
        }
    };

    let alerts: Arc<dyn AlertSink> = match &config.backends.alert_webhook {
        Some(url) => Arc::new(WebhookAlertSink::new(url)?.with_timeout(config.backends.alert_timeout)),
        None => Arc::new(TracingAlertSink),
    };

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("rollguard.redb");
    let archive = ArchiveStore::open(&db_path)?;
    info!(path = ?db_path, "archive opened");

    let manager = SessionManager::new(
        Backends {
            metrics,
            deployer,
            alerts,
        },
        archive,
    );

    // ── API server ─────────────────────────────────────────────

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let router = rollguard_api::build_router(manager.clone());
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listen, "API server starting");

    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    // ── Session ────────────────────────────────────────────────

    let id = manager.start(plan).await?;
    info!(session = %id, "session started");

    let snapshot = tokio::select! {
        done = manager.wait(&id) => done?,
        _ = tokio::signal::ctrl_c() => {
            info!(session = %id, "shutdown signal received, stopping session");
            manager.stop(&id).await?
        }
    };

    let _ = shutdown_tx.send(true);
    server.await??;

    let elapsed = snapshot
        .finished_at
        .unwrap_or_else(rollguard_core::epoch_secs)
        .saturating_sub(snapshot.started_at);
    info!(
        session = %id,
        status = ?snapshot.status,
        steps_applied = snapshot.steps_applied,
        elapsed = %format_duration(std::time::Duration::from_secs(elapsed)),
        "rollguard daemon stopped"
    );

    Ok(match snapshot.status {
        SessionStatus::Promoted => ExitCode::SUCCESS,
        SessionStatus::RolledBack => ExitCode::from(2),
        SessionStatus::Running => ExitCode::from(130),
    })
}

fn validate(config_path: &Path) -> anyhow::Result<ExitCode> {
    match load_plan(config_path) {
        Ok((_, plan)) => {
            println!(
                "{}: ok ({} in {}, {} steps, {} signals)",
                config_path.display(),
                plan.service,
                plan.environment,
                plan.steps.len(),
                plan.signals.len()
            );
            for step in plan.steps.iter() {
                println!("  step {:>3}% for {}", step.weight_percent, format_duration(step.pause));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            match e.downcast_ref::<ConfigError>() {
                Some(ConfigError::ThresholdMisconfigured(issues)) => {
                    eprintln!("{}: {} invalid threshold(s)", config_path.display(), issues.len());
                    for issue in issues {
                        eprintln!("  {issue}");
                    }
                }
                _ => eprintln!("{}: {e:#}", config_path.display()),
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn audit(data_dir: &Path, session: Option<&str>) -> anyhow::Result<ExitCode> {
    let archive = ArchiveStore::open(&data_dir.join("rollguard.redb"))?;

    let report = match session {
        Some(id) => {
            let Some(snapshot) = archive.get_session(id)? else {
                bail!("session {id} is not in the archive");
            };
            let rollbacks = archive.list_rollbacks(id)?;
            serde_json::json!({ "session": snapshot, "rollbacks": rollbacks })
        }
        None => serde_json::to_value(archive.list_sessions()?)?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}
