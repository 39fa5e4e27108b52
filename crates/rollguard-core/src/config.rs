//! Rollout config parser (`rollout.toml`).
//!
//! ```toml
//! [rollout]
//! service = "checkout"
//! environment = "prod"
//! strategy = { type = "canary" }
//! pause = "2m"
//!
//! [[signals]]
//! name = "p99_latency"
//! kind = { type = "latency", percentile = 99.0 }
//! query = "histogram_quantile(0.99, sum(rate(http_duration_ms_bucket[1m])) by (le))"
//! interval = "15s"
//!
//! [[thresholds]]
//! signal = "p99_latency"
//! comparator = "<="
//! limit = { absolute = 500.0 }
//! max_consecutive_breaches = 3
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::signal::MetricSignal;
use crate::strategy::{RollbackAction, RolloutStrategy, check_steps};
use crate::threshold::{Threshold, ThresholdIssue};
use crate::types::RolloutStep;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollguardConfig {
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub signals: Vec<MetricSignal>,
    #[serde(default)]
    pub thresholds: Vec<Threshold>,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub rollback: RollbackSettings,
    #[serde(default)]
    pub backends: BackendsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub service: String,
    pub environment: String,
    #[serde(default)]
    pub strategy: RolloutStrategy,
    /// Explicit schedule; when empty the strategy's default schedule is used.
    #[serde(default)]
    pub steps: Vec<RolloutStep>,
    /// Pause per step for strategy-generated schedules.
    #[serde(default = "default_pause", with = "crate::duration::human")]
    pub pause: Duration,
    /// Roll back automatically when the breaker opens.
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
    #[serde(default)]
    pub rollback_action: RollbackAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CooldownBackoff {
    Fixed,
    /// Cooldown doubles on every repeated trip, up to `cooldown_max`.
    #[default]
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_cooldown", with = "crate::duration::human")]
    pub cooldown: Duration,
    #[serde(default = "default_cooldown_max", with = "crate::duration::human")]
    pub cooldown_max: Duration,
    #[serde(default)]
    pub backoff: CooldownBackoff,
    /// Consecutive within-bounds samples per required signal to close
    /// from half-open.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            cooldown: default_cooldown(),
            cooldown_max: default_cooldown_max(),
            backoff: CooldownBackoff::default(),
            success_threshold: default_success_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Bound on every backend query.
    #[serde(default = "default_probe_timeout", with = "crate::duration::human")]
    pub timeout: Duration,
    /// Consecutive unknown samples on a required signal before the session
    /// pauses for stale metrics.
    #[serde(default = "default_staleness_limit")]
    pub staleness_limit: u32,
    /// Look-back window used to measure baselines for relative limits.
    #[serde(default = "default_baseline_window", with = "crate::duration::human")]
    pub baseline_window: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: default_probe_timeout(),
            staleness_limit: default_staleness_limit(),
            baseline_window: default_baseline_window(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackSettings {
    /// Total backend calls before escalating.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each failure.
    #[serde(default = "default_backoff_base", with = "crate::duration::human")]
    pub backoff_base: Duration,
}

impl Default for RollbackSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
        }
    }
}

/// Where the daemon finds its collaborators. Unset entries fall back to
/// log-only adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Prometheus base address, e.g. `http://127.0.0.1:9090`.
    pub prometheus: Option<String>,
    /// Alert webhook URL; alerts are POSTed as JSON.
    pub alert_webhook: Option<String>,
    /// Bound on one alert delivery.
    #[serde(default = "default_alert_timeout", with = "crate::duration::human")]
    pub alert_timeout: Duration,
    pub deploy: Option<DeployCommands>,
    /// Bound on one deploy command; a command still running is killed.
    #[serde(default = "default_deploy_timeout", with = "crate::duration::human")]
    pub deploy_timeout: Duration,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            prometheus: None,
            alert_webhook: None,
            alert_timeout: default_alert_timeout(),
            deploy: None,
            deploy_timeout: default_deploy_timeout(),
        }
    }
}

/// Command templates for the deployment backend. Placeholders:
/// `{service}`, `{environment}`, `{session}`, `{weight}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployCommands {
    pub set_weight: String,
    pub abort: String,
    pub undo: String,
    pub promote: String,
}

fn default_pause() -> Duration {
    Duration::from_secs(120)
}

fn default_true() -> bool {
    true
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_cooldown_max() -> Duration {
    Duration::from_secs(600)
}

fn default_success_threshold() -> u32 {
    3
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_staleness_limit() -> u32 {
    5
}

fn default_baseline_window() -> Duration {
    Duration::from_secs(600)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(5)
}

fn default_alert_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_deploy_timeout() -> Duration {
    Duration::from_secs(60)
}

/// A signal paired with the threshold that gates it.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalPlan {
    pub signal: MetricSignal,
    pub threshold: Threshold,
}

/// Validated, immutable description of one rollout session.
///
/// Steps and signals are behind `Arc` so that every task of a session (and
/// several sessions started from the same config) can share them read-only.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub service: String,
    pub environment: String,
    pub steps: Arc<[RolloutStep]>,
    pub signals: Arc<[SignalPlan]>,
    pub breaker: BreakerSettings,
    pub probe: ProbeSettings,
    pub rollback: RollbackSettings,
    pub rollback_action: RollbackAction,
    pub auto_rollback: bool,
}

impl SessionPlan {
    /// Names of signals that gate the rollout.
    pub fn required_signals(&self) -> impl Iterator<Item = &str> {
        self.signals
            .iter()
            .filter(|p| p.signal.required)
            .map(|p| p.signal.name.as_str())
    }
}

impl RollguardConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate everything and build a [`SessionPlan`].
    ///
    /// Threshold problems are collected, not short-circuited, so the error
    /// names every invalid threshold at once.
    pub fn validate(&self) -> ConfigResult<SessionPlan> {
        self.check_settings()?;

        let steps = if self.rollout.steps.is_empty() {
            self.rollout.strategy.default_steps(self.rollout.pause)
        } else {
            self.rollout.steps.clone()
        };
        check_steps(&steps).map_err(ConfigError::InvalidSchedule)?;

        let signals = self.pair_thresholds()?;

        Ok(SessionPlan {
            service: self.rollout.service.clone(),
            environment: self.rollout.environment.clone(),
            steps: steps.into(),
            signals: signals.into(),
            breaker: self.breaker,
            probe: self.probe,
            rollback: self.rollback,
            rollback_action: self.rollout.rollback_action,
            auto_rollback: self.rollout.auto_rollback,
        })
    }

    fn check_settings(&self) -> ConfigResult<()> {
        if self.rollout.service.trim().is_empty() {
            return Err(invalid("rollout.service", "must not be empty"));
        }
        if self.breaker.success_threshold == 0 {
            return Err(invalid("breaker.success_threshold", "must be at least 1"));
        }
        if self.breaker.cooldown_max < self.breaker.cooldown {
            return Err(invalid(
                "breaker.cooldown_max",
                "must not be shorter than breaker.cooldown",
            ));
        }
        if self.probe.timeout.is_zero() {
            return Err(invalid("probe.timeout", "must be greater than zero"));
        }
        if self.probe.staleness_limit == 0 {
            return Err(invalid("probe.staleness_limit", "must be at least 1"));
        }
        if self.rollback.max_attempts == 0 {
            return Err(invalid("rollback.max_attempts", "must be at least 1"));
        }
        if self.backends.alert_timeout.is_zero() {
            return Err(invalid("backends.alert_timeout", "must be greater than zero"));
        }
        if self.backends.deploy_timeout.is_zero() {
            return Err(invalid("backends.deploy_timeout", "must be greater than zero"));
        }
        Ok(())
    }

    fn pair_thresholds(&self) -> ConfigResult<Vec<SignalPlan>> {
        let mut issues = Vec::new();

        let mut seen = HashSet::new();
        for signal in &self.signals {
            if !seen.insert(signal.name.as_str()) {
                issues.push(ThresholdIssue::new(&signal.name, "signal defined more than once"));
            }
        }

        let mut by_signal: HashMap<&str, &Threshold> = HashMap::new();
        for threshold in &self.thresholds {
            if !seen.contains(threshold.signal.as_str()) {
                issues.push(ThresholdIssue::new(
                    &threshold.signal,
                    "threshold references an unknown signal",
                ));
            } else if by_signal.insert(threshold.signal.as_str(), threshold).is_some() {
                issues.push(ThresholdIssue::new(
                    &threshold.signal,
                    "more than one threshold for this signal",
                ));
            }
        }

        let mut plans = Vec::new();
        for signal in &self.signals {
            if signal.interval.is_zero() {
                issues.push(ThresholdIssue::new(&signal.name, "sampling interval must be greater than zero"));
            }
            if let Some(problem) = signal.kind.check() {
                issues.push(ThresholdIssue::new(&signal.name, problem));
            }
            let Some(threshold) = by_signal.get(signal.name.as_str()) else {
                issues.push(ThresholdIssue::new(&signal.name, "no threshold configured"));
                continue;
            };
            for problem in threshold.check(&signal.kind) {
                issues.push(ThresholdIssue::new(&signal.name, problem));
            }

            let mut signal = signal.clone();
            if signal.unit.is_empty() {
                signal.unit = signal.kind.default_unit().to_string();
            }
            plans.push(SignalPlan {
                signal,
                threshold: (*threshold).clone(),
            });
        }

        if !self.signals.iter().any(|s| s.required) {
            issues.push(ThresholdIssue::new(
                "*",
                "at least one required signal is needed to gate the rollout",
            ));
        }

        if issues.is_empty() {
            Ok(plans)
        } else {
            Err(ConfigError::ThresholdMisconfigured(issues))
        }
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::Limit;

    const CONFIG: &str = r#"
        [rollout]
        service = "checkout"
        environment = "prod"
        pause = "2m"

        [[signals]]
        name = "p99_latency"
        kind = { type = "latency", percentile = 99.0 }
        query = "histogram_quantile(0.99, sum(rate(http_duration_ms_bucket[1m])) by (le))"
        interval = "15s"

        [[signals]]
        name = "errors"
        kind = { type = "error_rate" }
        query = "100 * sum(rate(http_errors_total[1m])) / sum(rate(http_requests_total[1m]))"
        required = false

        [[thresholds]]
        signal = "p99_latency"
        comparator = "<="
        limit = { baseline_factor = 2.0 }
        max_consecutive_breaches = 3

        [[thresholds]]
        signal = "errors"
        comparator = "<"
        limit = { absolute = 5.0 }
        max_consecutive_breaches = 2
    "#;

    #[test]
    fn parses_and_validates_full_config() {
        let config = RollguardConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.probe.staleness_limit, 5);
        assert_eq!(config.rollback.max_attempts, 3);
        assert!(config.rollout.auto_rollback);

        let plan = config.validate().unwrap();
        assert_eq!(plan.steps.len(), 4);
        assert_eq!(plan.steps[3].weight_percent, 100);
        assert_eq!(plan.signals.len(), 2);
        assert_eq!(plan.signals[0].signal.unit, "ms");
        assert_eq!(plan.signals[1].signal.unit, "percent");
        assert_eq!(plan.signals[0].threshold.limit, Limit::BaselineFactor(2.0));
        assert_eq!(plan.required_signals().collect::<Vec<_>>(), vec!["p99_latency"]);
    }

    #[test]
    fn backend_timeouts_default_and_parse() {
        let config = RollguardConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.backends.alert_timeout, Duration::from_secs(10));
        assert_eq!(config.backends.deploy_timeout, Duration::from_secs(60));

        let tuned = format!("{CONFIG}\n[backends]\nalert_timeout = \"3s\"\ndeploy_timeout = \"2m\"\n");
        let config = RollguardConfig::from_toml_str(&tuned).unwrap();
        assert_eq!(config.backends.alert_timeout, Duration::from_secs(3));
        assert_eq!(config.backends.deploy_timeout, Duration::from_secs(120));

        let zero = format!("{CONFIG}\n[backends]\ndeploy_timeout = \"0s\"\n");
        let err = RollguardConfig::from_toml_str(&zero).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("backends.deploy_timeout"), "{err}");
    }

    #[test]
    fn explicit_steps_override_strategy() {
        let mut config = RollguardConfig::from_toml_str(CONFIG).unwrap();
        config.rollout.steps = vec![
            RolloutStep {
                weight_percent: 10,
                pause: Duration::from_secs(30),
            },
            RolloutStep {
                weight_percent: 100,
                pause: Duration::from_secs(30),
            },
        ];
        let plan = config.validate().unwrap();
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn every_bad_threshold_is_reported() {
        let mut config = RollguardConfig::from_toml_str(CONFIG).unwrap();
        config.thresholds[0].max_consecutive_breaches = 0;
        config.thresholds[1].limit = Limit::Absolute(250.0);
        config.thresholds.push(Threshold {
            signal: "ghost".to_string(),
            ..config.thresholds[0].clone()
        });

        match config.validate() {
            Err(ConfigError::ThresholdMisconfigured(issues)) => {
                let signals: Vec<_> = issues.iter().map(|i| i.signal.as_str()).collect();
                assert_eq!(signals, vec!["ghost", "p99_latency", "errors"]);
            }
            other => panic!("expected ThresholdMisconfigured, got {other:?}"),
        }
    }

    #[test]
    fn signal_without_threshold_is_rejected() {
        let mut config = RollguardConfig::from_toml_str(CONFIG).unwrap();
        config.thresholds.pop();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("errors: no threshold configured"));
    }

    #[test]
    fn no_required_signal_is_rejected() {
        let mut config = RollguardConfig::from_toml_str(CONFIG).unwrap();
        for signal in &mut config.signals {
            signal.required = false;
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdMisconfigured(_))
        ));
    }

    #[test]
    fn bad_duration_fails_to_parse() {
        let broken = CONFIG.replace("pause = \"2m\"", "pause = \"two minutes\"");
        assert!(matches!(
            RollguardConfig::from_toml_str(&broken),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_rollback_attempts_rejected() {
        let mut config = RollguardConfig::from_toml_str(CONFIG).unwrap();
        config.rollback.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSetting {
                field: "rollback.max_attempts",
                ..
            })
        ));
    }
}
