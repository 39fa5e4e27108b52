//! Threshold evaluation — classify one sample against its threshold.

use rollguard_core::{MetricSignal, ResolvedThreshold, Sample, Verdict};

/// Classify a sample.
///
/// A missing sample or a non-finite value is `Unknown`, never `Breached`:
/// probe noise must not trip the breaker.
pub fn evaluate(sample: Option<&Sample>, threshold: &ResolvedThreshold) -> Verdict {
    let Some(sample) = sample else {
        return Verdict::Unknown;
    };
    if !sample.value.is_finite() || !threshold.limit.is_finite() {
        return Verdict::Unknown;
    }
    if threshold.comparator.holds(sample.value, threshold.limit) {
        Verdict::Within
    } else {
        Verdict::Breached
    }
}

/// A signal bound to its resolved threshold for the life of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct GatedSignal {
    pub signal: MetricSignal,
    pub threshold: ResolvedThreshold,
}

impl GatedSignal {
    pub fn name(&self) -> &str {
        &self.signal.name
    }

    pub fn evaluate(&self, sample: Option<&Sample>) -> Verdict {
        evaluate(sample, &self.threshold)
    }
}
