//! Per-signal breach tracking.

use rollguard_core::Verdict;
use tracing::debug;

/// Tracks consecutive verdicts for a single signal.
///
/// * `Breached` extends the breach streak.
/// * `Within` resets it to zero.
/// * `Unknown` leaves it untouched and extends the unknown streak.
#[derive(Debug, Clone)]
pub struct BreachAccumulator {
    streak: u32,
    unknown_streak: u32,
    max_consecutive_breaches: u32,
    staleness_limit: u32,
}

impl BreachAccumulator {
    pub fn new(max_consecutive_breaches: u32, staleness_limit: u32) -> Self {
        Self {
            streak: 0,
            unknown_streak: 0,
            max_consecutive_breaches,
            staleness_limit,
        }
    }

    /// Record a verdict and return the breach streak.
    pub fn record(&mut self, verdict: Verdict) -> u32 {
        match verdict {
            Verdict::Breached => {
                self.streak = self.streak.saturating_add(1);
                self.unknown_streak = 0;
                if self.streak == self.max_consecutive_breaches {
                    debug!(
                        streak = self.streak,
                        limit = self.max_consecutive_breaches,
                        "breach streak reached limit"
                    );
                }
            }
            Verdict::Within => {
                self.streak = 0;
                self.unknown_streak = 0;
            }
            Verdict::Unknown => {
                self.unknown_streak = self.unknown_streak.saturating_add(1);
            }
        }
        self.streak
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn unknown_streak(&self) -> u32 {
        self.unknown_streak
    }

    pub fn is_tripped(&self) -> bool {
        self.streak >= self.max_consecutive_breaches
    }

    /// Whether telemetry has been missing for `staleness_limit` samples.
    pub fn is_stale(&self) -> bool {
        self.unknown_streak >= self.staleness_limit
    }
}
