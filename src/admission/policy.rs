//! Eviction batch sizing.
//!
//! ```text
//! unknown sample or no pressure      → 0
//! empty registry                     → 0
//! otherwise                          → min(max_batch, registry_size,
//!                                          max(1, ceil(excess * factor)))
//! ```
//!
//! `excess` is how far usage sits above the high-water mark. The minimum of
//! one guarantees forward progress whenever pressure is reported.

use crate::admission::monitor::ResourceSample;

/// Decides how many pending connections to close per check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionPolicy {
    /// Upper bound on evictions per check.
    pub max_batch: usize,
    /// Evictions per unit of usage above the high-water mark (>= 1).
    pub factor: f64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_batch: 16,
            factor: 1.0,
        }
    }
}

impl EvictionPolicy {
    pub fn new(max_batch: usize, factor: f64) -> Self {
        Self { max_batch, factor }
    }

    /// Number of connections to evict for this sample.
    pub fn decide(&self, sample: Option<&ResourceSample>, registry_size: usize) -> usize {
        let Some(sample) = sample else {
            return 0;
        };
        if !sample.is_under_pressure || registry_size == 0 {
            return 0;
        }

        let proportional = (sample.excess() as f64 * self.factor).ceil();
        let wanted = if proportional >= usize::MAX as f64 {
            usize::MAX
        } else {
            proportional as usize
        };

        wanted.max(1).min(self.max_batch.max(1)).min(registry_size)
    }
}
