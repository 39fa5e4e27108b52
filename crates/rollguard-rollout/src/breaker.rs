//! Per-session circuit breaker.
//!
//! ```text
//!            N consecutive breaches            cooldown elapsed
//!  CLOSED ─────────────────────────▶ OPEN ─────────────────────▶ HALF_OPEN
//!    ▲                                 ▲                             │
//!    │                                 └──────── any breach ─────────┤
//!    └──────── every required signal within K times in a row ────────┘
//! ```
//!
//! Only required signals move the breaker. `Unknown` verdicts never do.
//! The breaker keeps no clock of its own: callers pass `now`, and must
//! call [`CircuitBreaker::poll`] to let an open breaker cool down.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use rollguard_core::{
    BreakerSettings, BreakerState, CircuitBreakerState, CooldownBackoff, Verdict, epoch_secs,
};
use rollguard_probe::Observation;

/// A state change reported by the breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Opened by `signal` breaching; `None` only for forced opens.
    Opened { signal: Option<String> },
    HalfOpened,
    Closed,
}

impl Transition {
    pub fn to(&self) -> BreakerState {
        match self {
            Self::Opened { .. } => BreakerState::Open,
            Self::HalfOpened => BreakerState::HalfOpen,
            Self::Closed => BreakerState::Closed,
        }
    }

    pub fn signal(&self) -> Option<&str> {
        match self {
            Self::Opened { signal } => signal.as_deref(),
            _ => None,
        }
    }
}

pub struct CircuitBreaker {
    settings: BreakerSettings,
    required: BTreeSet<String>,
    state: BreakerState,
    failure_streak: u32,
    success_streaks: HashMap<String, u32>,
    opened_at: Option<Instant>,
    opened_at_epoch: Option<u64>,
    cooldown: Duration,
    trips: u32,
}

impl CircuitBreaker {
    pub fn new<I, S>(settings: BreakerSettings, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            settings,
            required: required.into_iter().map(Into::into).collect(),
            state: BreakerState::Closed,
            failure_streak: 0,
            success_streaks: HashMap::new(),
            opened_at: None,
            opened_at_epoch: None,
            cooldown: settings.cooldown,
            trips: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Feed one observation. Returns the transition it caused, if any.
    pub fn observe(&mut self, obs: &Observation, now: Instant) -> Option<Transition> {
        if !obs.required || !self.required.contains(&obs.signal) {
            return None;
        }

        match self.state {
            BreakerState::Closed => {
                if obs.verdict != Verdict::Unknown {
                    self.failure_streak = obs.streak;
                }
                obs.tripped.then(|| self.open(now, &obs.signal))
            }
            // Cooling down; `poll` decides when to probe again.
            BreakerState::Open => None,
            BreakerState::HalfOpen => match obs.verdict {
                Verdict::Breached => {
                    self.failure_streak = obs.streak;
                    Some(self.open(now, &obs.signal))
                }
                Verdict::Within => {
                    *self.success_streaks.entry(obs.signal.clone()).or_default() += 1;
                    self.recovered().then(|| self.close())
                }
                Verdict::Unknown => None,
            },
        }
    }

    /// Move an open breaker to half-open once its cooldown has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Transition> {
        let deadline = self.reopen_at()?;
        if now < deadline {
            return None;
        }
        self.state = BreakerState::HalfOpen;
        self.success_streaks.clear();
        info!(trips = self.trips, "circuit breaker half-open");
        Some(Transition::HalfOpened)
    }

    /// When an open breaker becomes eligible for half-open.
    pub fn reopen_at(&self) -> Option<Instant> {
        match (self.state, self.opened_at) {
            (BreakerState::Open, Some(at)) => Some(at + self.cooldown),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let success_streak = match self.state {
            BreakerState::HalfOpen => self
                .required
                .iter()
                .map(|s| self.success_streaks.get(s).copied().unwrap_or(0))
                .min()
                .unwrap_or(0),
            _ => 0,
        };
        CircuitBreakerState {
            state: self.state,
            failure_streak: self.failure_streak,
            success_streak,
            opened_at: self.opened_at_epoch,
            cooldown: self.cooldown,
            trips: self.trips,
        }
    }

    fn open(&mut self, now: Instant, signal: &str) -> Transition {
        self.trips += 1;
        self.cooldown = self.cooldown_for(self.trips);
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.opened_at_epoch = Some(epoch_secs());
        self.success_streaks.clear();
        warn!(
            signal,
            streak = self.failure_streak,
            trips = self.trips,
            cooldown = ?self.cooldown,
            "circuit breaker opened"
        );
        Transition::Opened {
            signal: Some(signal.to_string()),
        }
    }

    fn close(&mut self) -> Transition {
        self.state = BreakerState::Closed;
        self.failure_streak = 0;
        self.success_streaks.clear();
        info!(trips = self.trips, "circuit breaker closed");
        Transition::Closed
    }

    fn recovered(&self) -> bool {
        let needed = self.settings.success_threshold;
        self.required
            .iter()
            .all(|s| self.success_streaks.get(s).copied().unwrap_or(0) >= needed)
    }

    fn cooldown_for(&self, trips: u32) -> Duration {
        let base = self.settings.cooldown;
        match self.settings.backoff {
            CooldownBackoff::Fixed => base,
            CooldownBackoff::Exponential => {
                let factor = 1u32
                    .checked_shl(trips.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(self.settings.cooldown_max)
            }
        }
    }
}
