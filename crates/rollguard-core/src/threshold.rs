//! Thresholds: the limit a signal must respect while traffic shifts.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signal::SignalKind;

/// How a sample is compared against its limit. A sample satisfying the
/// comparison is within bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
}

impl Comparator {
    /// Whether `value` satisfies the comparison against `limit`.
    pub fn holds(self, value: f64, limit: f64) -> bool {
        match self {
            Self::Le => value <= limit,
            Self::Ge => value >= limit,
            Self::Lt => value < limit,
            Self::Gt => value > limit,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Gt => ">",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// The bound a threshold compares against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// A fixed value in the signal's unit.
    Absolute(f64),
    /// A multiple of the pre-rollout baseline, e.g. `2.0` for "2x baseline".
    BaselineFactor(f64),
}

/// A gate on one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    /// Name of the [`MetricSignal`](crate::MetricSignal) this applies to.
    pub signal: String,
    pub comparator: Comparator,
    pub limit: Limit,
    /// Consecutive breached samples needed to trip.
    pub max_consecutive_breaches: u32,
}

impl Threshold {
    /// Every problem that would make this threshold unusable for `kind`.
    pub fn check(&self, kind: &SignalKind) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_consecutive_breaches == 0 {
            problems.push("max_consecutive_breaches must be at least 1".to_string());
        }
        match self.limit {
            Limit::Absolute(value) => problems.extend(kind.check_limit(value)),
            Limit::BaselineFactor(factor) => {
                if !(factor.is_finite() && factor > 0.0) {
                    problems.push(format!("baseline factor {factor} must be a positive number"));
                }
            }
        }
        problems
    }

    pub fn needs_baseline(&self) -> bool {
        matches!(self.limit, Limit::BaselineFactor(_))
    }

    /// Fix the limit to an absolute value.
    ///
    /// Returns `None` for a baseline-relative threshold without a usable
    /// baseline.
    pub fn resolve(&self, baseline: Option<f64>) -> Option<ResolvedThreshold> {
        let limit = match self.limit {
            Limit::Absolute(value) => value,
            Limit::BaselineFactor(factor) => {
                let base = baseline.filter(|b| b.is_finite())?;
                factor * base
            }
        };
        Some(ResolvedThreshold {
            comparator: self.comparator,
            limit,
            max_consecutive_breaches: self.max_consecutive_breaches,
            baseline,
        })
    }
}

/// A threshold with its limit fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedThreshold {
    pub comparator: Comparator,
    pub limit: f64,
    pub max_consecutive_breaches: u32,
    /// Baseline the limit was derived from, for relative thresholds.
    pub baseline: Option<f64>,
}

/// One reason a session cannot start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdIssue {
    pub signal: String,
    pub problem: String,
}

impl ThresholdIssue {
    pub fn new(signal: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            problem: problem.into(),
        }
    }
}

impl fmt::Display for ThresholdIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.signal, self.problem)
    }
}
