//! Multiplier Clock
//!
//! Maps elapsed round time to the displayed multiplier. The value depends only
//! on elapsed wall time, never on how many ticks were delivered.

/// Default growth constant per second.
///
/// At 0.06/s a median round (about 1.98x) runs for roughly eleven seconds.
pub const DEFAULT_GROWTH_CONSTANT: f64 = 0.06;

/// Exponential multiplier curve `m(t) = e^(k * t)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiplierClock {
    growth: f64,
}

impl Default for MultiplierClock {
    fn default() -> Self {
        Self::new(DEFAULT_GROWTH_CONSTANT)
    }
}

impl MultiplierClock {
    /// Create a clock with growth constant `k` (per second).
    ///
    /// Non-positive or non-finite constants fall back to the default; the
    /// curve must be strictly increasing.
    pub fn new(growth: f64) -> Self {
        let growth = if growth.is_finite() && growth > 0.0 {
            growth
        } else {
            DEFAULT_GROWTH_CONSTANT
        };
        Self { growth }
    }

    /// Growth constant in use.
    pub fn growth(&self) -> f64 {
        self.growth
    }

    /// Multiplier after `elapsed_secs` seconds of running.
    ///
    /// Negative inputs are treated as zero.
    #[inline]
    pub fn multiplier_at(&self, elapsed_secs: f64) -> f64 {
        (self.growth * elapsed_secs.max(0.0)).exp()
    }

    /// Seconds of running needed to reach `multiplier`.
    #[inline]
    pub fn elapsed_for(&self, multiplier: f64) -> f64 {
        if multiplier <= 1.0 {
            return 0.0;
        }
        multiplier.ln() / self.growth
    }
}

// =============================================================================
// TESTS
// =============================================================================
