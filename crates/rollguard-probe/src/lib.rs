//! rollguard-probe — metric sampling and breach tracking for rollouts.
//!
//! Turns raw time series from a metrics backend into per-signal verdicts
//! that a rollout controller can act on. Each watched signal gets its own
//! background task; all tasks of a session feed one ordered channel.
//!
//! # Architecture
//!
//! ```text
//! SignalMonitor
//!   └── Per-signal background task
//!       ├── MetricsProbe::sample() → Sample | ProbeError (timeout-bounded)
//!       ├── evaluate() → Within | Breached | Unknown
//!       ├── BreachAccumulator (breach streak, unknown streak)
//!       └── Observation → mpsc channel → rollout controller
//! ```
//!
//! # Fail-safe classification
//!
//! Missing telemetry is never read as "all clear": timeouts, backend
//! errors, empty series and NaN values all become `Unknown`, which neither
//! extends nor resets a breach streak.

pub mod accumulator;
pub mod backend;
pub mod client;
pub mod evaluator;
pub mod monitor;
pub mod probe;
pub mod prometheus;

pub use accumulator::BreachAccumulator;
pub use backend::{BoxFuture, MetricsBackend, TimeRange};
pub use evaluator::{GatedSignal, evaluate};
pub use monitor::{Observation, SignalMonitor};
pub use probe::{MetricsProbe, ProbeError};
pub use prometheus::PrometheusBackend;
