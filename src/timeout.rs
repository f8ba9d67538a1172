//! Timeout budgets for compressor invocations.

use std::time::Duration;

use crate::config::TimeoutPolicy;

/// Throughput-driven estimator used by the search loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutEstimator {
    base_secs: u64,
    safety_margin_secs: u64,
    slowdown_factor: f64,
}

impl TimeoutEstimator {
    pub fn new(base_secs: u64, safety_margin_secs: u64, slowdown_factor: f64) -> Self {
        Self {
            base_secs,
            safety_margin_secs,
            slowdown_factor,
        }
    }

    pub fn from_policy(policy: &TimeoutPolicy) -> Self {
        Self::new(policy.base_secs, policy.safety_margin_secs, policy.slowdown_factor)
    }

    pub fn base(&self) -> Duration {
        Duration::from_secs(self.base_secs)
    }

    /// Budget for compressing `container_bytes` given the last observed rate.
    ///
    /// Without a prior rate this is `base + margin`. With one, the next run is
    /// assumed to manage only `slowdown_factor` of that rate, plus the margin,
    /// and the result never drops below `base`.
    pub fn estimate(&self, container_bytes: u64, last_bytes_per_sec: Option<f64>) -> Duration {
        let secs = match last_bytes_per_sec {
            Some(bps) if bps > 0.0 => {
                let pessimistic = (bps * self.slowdown_factor).max(1.0);
                let estimated = (container_bytes as f64 / pessimistic) as u64;
                estimated
                    .saturating_add(self.safety_margin_secs)
                    .max(self.base_secs)
            }
            _ => self.base_secs.saturating_add(self.safety_margin_secs),
        };
        Duration::from_secs(secs)
    }
}

/// Size-only budget used when restoring: `max(base, bytes / bytes_per_sec)`.
pub fn estimate_from_size(artifact_bytes: u64, base_secs: u64, bytes_per_sec: u64) -> Duration {
    Duration::from_secs((artifact_bytes / bytes_per_sec.max(1)).max(base_secs))
}
