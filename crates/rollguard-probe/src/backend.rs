//! The metrics-backend seam.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rollguard_core::Sample;

/// Boxed future alias for backend calls.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Inclusive range of unix timestamps (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: u64,
    pub end: u64,
}

impl TimeRange {
    /// The `window` leading up to `end`.
    pub fn trailing(window: Duration, end: u64) -> Self {
        Self {
            start: end.saturating_sub(window.as_secs().max(1)),
            end,
        }
    }
}

/// Answers time-series queries for named signals.
///
/// Implementations are pull-based and may be slow or fail; callers bound
/// every call with a timeout.
pub trait MetricsBackend: Send + Sync {
    /// Evaluate `query` over `range`, returning points oldest first.
    fn query<'a>(
        &'a self,
        query: &'a str,
        range: TimeRange,
    ) -> BoxFuture<'a, anyhow::Result<Vec<Sample>>>;
}
