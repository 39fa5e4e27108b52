//! rollguard-rollout — metrics-gated progressive rollouts.
//!
//! Drives a rollout session through its traffic-weight steps, watching
//! live signals while it does, and rolls back automatically when they
//! degrade.
//!
//! # Components
//!
//! - **`breaker`** — per-session circuit breaker (closed / open / half-open)
//! - **`controller`** — the session's single owning task: steps, gates,
//!   operator overrides, breaker transitions
//! - **`rollback`** — single-fire, retried rollback with fatal escalation
//! - **`session`** — `SessionManager`, the only owner of live sessions
//! - **`deploy`** / **`alert`** — deployment backend and alert sink seams
//!   with their adapters
//!
//! # Data flow
//!
//! ```text
//! probe tasks ──Observation──▶ RolloutController ──▶ CircuitBreaker
//!                                  │        │
//!                       set_weight/promote  └──OPEN──▶ RollbackExecutor ──▶ abort/undo
//!                                  │                          │
//!                                  └────────── AlertSink ◀────┘
//! ```

pub mod alert;
pub mod breaker;
pub mod controller;
pub mod deploy;
pub mod error;
pub mod rollback;
pub mod session;

pub use alert::{AlertQueue, AlertSink, TracingAlertSink, WebhookAlertSink};
pub use breaker::{CircuitBreaker, Transition};
pub use controller::{ControlMessage, RolloutController};
pub use deploy::{CommandDeployer, DeployTarget, DeploymentBackend, DryRunDeployer};
pub use error::{SessionError, SessionResult};
pub use rollback::{RollbackExecutor, RollbackGuard, RollbackRequest, RollbackResult};
pub use session::{Backends, SessionManager};
