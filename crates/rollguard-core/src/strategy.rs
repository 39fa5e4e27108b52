//! Rollout strategies — canary, blue-green, rolling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::RolloutStep;

/// How traffic moves to the new version when no explicit steps are given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Small weighted increments: 5%, 25%, 50%, 100%.
    #[default]
    Canary,
    /// Switch all traffic at once, then observe.
    BlueGreen,
    /// Equal increments over `batches` steps.
    Rolling { batches: u32 },
}

impl RolloutStrategy {
    /// The step schedule this strategy implies, each step paused for `pause`.
    pub fn default_steps(&self, pause: Duration) -> Vec<RolloutStep> {
        let weights: Vec<u8> = match self {
            Self::Canary => vec![5, 25, 50, 100],
            Self::BlueGreen => vec![100],
            Self::Rolling { batches } => {
                let batches = (*batches).clamp(1, 100);
                (1..=batches).map(|i| (i * 100 / batches) as u8).collect()
            }
        };
        weights
            .into_iter()
            .map(|weight_percent| RolloutStep {
                weight_percent,
                pause,
            })
            .collect()
    }
}

/// Which deployment-backend operation undoes a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RollbackAction {
    /// Stop the rollout and send all traffic back to the stable version.
    #[default]
    Abort,
    /// Revert to the previous revision.
    Undo,
}

impl RollbackAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Undo => "undo",
        }
    }
}

/// Check an explicit step schedule.
pub fn check_steps(steps: &[RolloutStep]) -> Result<(), String> {
    if steps.is_empty() {
        return Err("at least one step is required".to_string());
    }
    let mut previous = 0u8;
    for (i, step) in steps.iter().enumerate() {
        if step.weight_percent > 100 {
            return Err(format!(
                "step {i} weight {}% exceeds 100%",
                step.weight_percent
            ));
        }
        if step.weight_percent < previous {
            return Err(format!(
                "step {i} weight {}% is below the previous step's {previous}%",
                step.weight_percent
            ));
        }
        previous = step.weight_percent;
    }
    Ok(())
}
