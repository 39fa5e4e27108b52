//! Metrics probe — timeout-bounded sampling of one signal.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use rollguard_core::{MetricSignal, Sample, epoch_secs};

use crate::backend::{MetricsBackend, TimeRange};

/// Why a probe produced no sample. Every variant is transient and is
/// classified as `Unknown` by the caller.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe for {signal} timed out after {timeout:?}")]
    Timeout { signal: String, timeout: Duration },

    #[error("metrics backend failed for {signal}: {reason}")]
    Backend { signal: String, reason: String },

    #[error("no samples returned for {signal}")]
    NoData { signal: String },
}

/// Samples signals from a metrics backend, one call at a time.
#[derive(Clone)]
pub struct MetricsProbe {
    backend: Arc<dyn MetricsBackend>,
    timeout: Duration,
}

impl MetricsProbe {
    pub fn new(backend: Arc<dyn MetricsBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Latest reading of `signal` over its last sampling interval.
    pub async fn sample(&self, signal: &MetricSignal) -> Result<Sample, ProbeError> {
        let range = TimeRange::trailing(signal.interval, epoch_secs());
        let points = self.query(signal, range).await?;
        points
            .into_iter()
            .max_by_key(|p| p.timestamp)
            .ok_or_else(|| ProbeError::NoData {
                signal: signal.name.clone(),
            })
    }

    /// Mean of the finite points over the `window` before now.
    ///
    /// Used to fix baseline-relative limits before traffic shifts.
    pub async fn baseline(&self, signal: &MetricSignal, window: Duration) -> Result<f64, ProbeError> {
        let range = TimeRange::trailing(window, epoch_secs());
        let points = self.query(signal, range).await?;
        let finite: Vec<f64> = points
            .iter()
            .map(|p| p.value)
            .filter(|v| v.is_finite())
            .collect();
        if finite.is_empty() {
            return Err(ProbeError::NoData {
                signal: signal.name.clone(),
            });
        }
        let mean = finite.iter().sum::<f64>() / finite.len() as f64;
        debug!(signal = %signal.name, baseline = mean, points = finite.len(), "baseline measured");
        Ok(mean)
    }

    async fn query(&self, signal: &MetricSignal, range: TimeRange) -> Result<Vec<Sample>, ProbeError> {
        match tokio::time::timeout(self.timeout, self.backend.query(&signal.query, range)).await {
            Ok(Ok(points)) => Ok(points),
            Ok(Err(e)) => Err(ProbeError::Backend {
                signal: signal.name.clone(),
                reason: format!("{e:#}"),
            }),
            Err(_) => Err(ProbeError::Timeout {
                signal: signal.name.clone(),
                timeout: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BoxFuture;
    use rollguard_core::SignalKind;

    struct FixedBackend(Vec<Sample>);

    impl MetricsBackend for FixedBackend {
        fn query<'a>(
            &'a self,
            _query: &'a str,
            _range: TimeRange,
        ) -> BoxFuture<'a, anyhow::Result<Vec<Sample>>> {
            let points = self.0.clone();
            Box::pin(async move { Ok(points) })
        }
    }

    struct HangingBackend;

    impl MetricsBackend for HangingBackend {
        fn query<'a>(
            &'a self,
            _query: &'a str,
            _range: TimeRange,
        ) -> BoxFuture<'a, anyhow::Result<Vec<Sample>>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            })
        }
    }

    struct FailingBackend;

    impl MetricsBackend for FailingBackend {
        fn query<'a>(
            &'a self,
            _query: &'a str,
            _range: TimeRange,
        ) -> BoxFuture<'a, anyhow::Result<Vec<Sample>>> {
            Box::pin(async { Err(anyhow::anyhow!("connection refused")) })
        }
    }

    fn signal() -> MetricSignal {
        MetricSignal {
            name: "p99".to_string(),
            kind: SignalKind::Latency { percentile: 99.0 },
            query: "p99".to_string(),
            interval: Duration::from_secs(15),
            unit: "ms".to_string(),
            required: true,
        }
    }

    fn point(value: f64, timestamp: u64) -> Sample {
        Sample { value, timestamp }
    }

    #[tokio::test]
    async fn sample_returns_latest_point() {
        let backend = FixedBackend(vec![point(10.0, 100), point(30.0, 130), point(20.0, 115)]);
        let probe = MetricsProbe::new(Arc::new(backend), Duration::from_secs(5));
        let sample = probe.sample(&signal()).await.unwrap();
        assert_eq!(sample, point(30.0, 130));
    }

    #[tokio::test]
    async fn empty_series_is_no_data() {
        let probe = MetricsProbe::new(Arc::new(FixedBackend(Vec::new())), Duration::from_secs(5));
        assert!(matches!(
            probe.sample(&signal()).await,
            Err(ProbeError::NoData { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let probe = MetricsProbe::new(Arc::new(HangingBackend), Duration::from_secs(5));
        assert!(matches!(
            probe.sample(&signal()).await,
            Err(ProbeError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn backend_error_is_reported() {
        let probe = MetricsProbe::new(Arc::new(FailingBackend), Duration::from_secs(5));
        let err = probe.sample(&signal()).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn baseline_ignores_nan_points() {
        let backend = FixedBackend(vec![point(100.0, 1), point(f64::NAN, 2), point(140.0, 3)]);
        let probe = MetricsProbe::new(Arc::new(backend), Duration::from_secs(5));
        let baseline = probe.baseline(&signal(), Duration::from_secs(600)).await.unwrap();
        assert_eq!(baseline, 120.0);
    }
}
