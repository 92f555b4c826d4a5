//! Crash Point Generation
//!
//! A crash point is drawn once per round by inverse-transform sampling:
//! `floor(100 * (1 - edge) / (1 - u)) / 100`, floored at 1.00. For every
//! cashout target `x >= 1.01` the survival probability is `(1 - edge) / x`,
//! so the expected return of any strategy is `1 - edge`.
//!
//! Two generators implement [`CrashPointGenerator`]:
//! - [`SeededSampler`] - deterministic under a fixed seed (simulation, tests)
//! - [`ProvablyFairGenerator`](crate::proof::ProvablyFairGenerator) -
//!   commit–reveal over server seeds (production)

use crate::core::hash::Hash32;
use crate::core::rng::DeterministicRng;
use crate::engine::state::RoundId;
use crate::proof::commitment::FairnessProof;

/// Default house edge (1%).
pub const DEFAULT_HOUSE_EDGE: f64 = 0.01;

/// Largest crash point the engine will schedule.
pub const MAX_CRASH_POINT: f64 = 1_000_000.0;

/// Crash point generation failures. Any of these aborts the round.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeneratorError {
    /// No seed was committed for the round being started.
    #[error("no seed committed for round {0}")]
    MissingCommitment(RoundId),

    /// The entropy source could not produce a seed.
    #[error("entropy source failed: {0}")]
    Entropy(String),

    /// The generator produced a value the engine cannot schedule.
    #[error("invalid crash point {0}")]
    InvalidCrashPoint(f64),
}

/// Source of one crash point per round.
///
/// The scheduler calls [`commit`](Self::commit) when a round is created,
/// [`generate`](Self::generate) on the waiting→running edge, and only asks
/// for [`reveal_proof_for`](Self::reveal_proof_for) after that round crashed.
pub trait CrashPointGenerator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Commit to the round's randomness before bets open.
    ///
    /// Returns the public commitment, or `None` for schemes without one.
    fn commit(&mut self, round_id: RoundId) -> Option<Hash32> {
        let _ = round_id;
        None
    }

    /// Produce the crash point for a round.
    fn generate(&mut self, round_id: RoundId) -> Result<f64, GeneratorError>;

    /// Proof material for a finished round, if the scheme has any.
    fn reveal_proof_for(&self, round_id: RoundId) -> Option<FairnessProof> {
        let _ = round_id;
        None
    }
}

/// Clamp a configured house edge into `[0, 0.99]`.
pub fn normalize_house_edge(house_edge: f64) -> f64 {
    if house_edge.is_finite() {
        house_edge.clamp(0.0, 0.99)
    } else {
        DEFAULT_HOUSE_EDGE
    }
}

/// Map a uniform draw `u ∈ [0, 1)` to a crash point.
pub fn crash_point_from_unit(u: f64, house_edge: f64) -> f64 {
    if !(0.0..1.0).contains(&u) {
        return 1.0;
    }
    let edge = normalize_house_edge(house_edge);
    let hundredths = (100.0 * (1.0 - edge) / (1.0 - u)).floor();
    (hundredths / 100.0).clamp(1.0, MAX_CRASH_POINT)
}

/// Check a generated value before the scheduler arms a round with it.
pub fn validate_crash_point(value: f64) -> Result<f64, GeneratorError> {
    if value.is_finite() && (1.0..=MAX_CRASH_POINT).contains(&value) {
        Ok(value)
    } else {
        Err(GeneratorError::InvalidCrashPoint(value))
    }
}

// =============================================================================
// SEEDED SAMPLER
// =============================================================================

/// Plain distribution sampler over [`DeterministicRng`].
///
/// Not auditable by players; identical seeds give identical crash sequences.
#[derive(Debug, Clone)]
pub struct SeededSampler {
    rng: DeterministicRng,
    house_edge: f64,
}

impl SeededSampler {
    /// Create a sampler with the given seed and house edge.
    pub fn new(seed: u64, house_edge: f64) -> Self {
        Self {
            rng: DeterministicRng::new(seed),
            house_edge: normalize_house_edge(house_edge),
        }
    }
}

impl CrashPointGenerator for SeededSampler {
    fn name(&self) -> &'static str {
        "seeded"
    }

    fn generate(&mut self, _round_id: RoundId) -> Result<f64, GeneratorError> {
        Ok(crash_point_from_unit(self.rng.next_unit(), self.house_edge))
    }
}

// =============================================================================
// TEST SUPPORT
// =============================================================================


// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_values() {
        // u = 0 lands below 1.00 and is floored to an instant crash
        assert_eq!(crash_point_from_unit(0.0, 0.01), 1.0);
        // 99 / 0.5 = 198 hundredths
        assert_eq!(crash_point_from_unit(0.5, 0.01), 1.98);
        // zero edge, 1 / 0.25 = 4x
        assert_eq!(crash_point_from_unit(0.75, 0.0), 4.0);
    }

    #[test]
    fn test_out_of_range_unit() {
        assert_eq!(crash_point_from_unit(1.0, 0.01), 1.0);
        assert_eq!(crash_point_from_unit(-0.1, 0.01), 1.0);
        assert_eq!(crash_point_from_unit(f64::NAN, 0.01), 1.0);
    }

    #[test]
    fn test_validate_crash_point() {
        assert_eq!(validate_crash_point(2.5), Ok(2.5));
        assert!(validate_crash_point(0.5).is_err());
        assert!(validate_crash_point(f64::INFINITY).is_err());
        assert!(validate_crash_point(f64::NAN).is_err());
    }

    #[test]
    fn test_sampler_deterministic() {
        let mut a = SeededSampler::new(42, DEFAULT_HOUSE_EDGE);
        let mut b = SeededSampler::new(42, DEFAULT_HOUSE_EDGE);

        for round in 0..500 {
            let id = RoundId(round);
            assert_eq!(a.generate(id).unwrap(), b.generate(id).unwrap());
        }
    }

    #[test]
    fn test_sampler_house_edge() {
        let mut sampler = SeededSampler::new(7, 0.01);
        let trials = 100_000;
        let mut survived_2x = 0u32;

        for round in 0..trials {
            if sampler.generate(RoundId(round)).unwrap() >= 2.0 {
                survived_2x += 1;
            }
        }

        // P(crash >= 2) = 0.99 / 2
        let rate = survived_2x as f64 / trials as f64;
        assert!((rate - 0.495).abs() < 0.01, "survival rate {}", rate);
    }

    #[test]
    fn test_normalize_house_edge() {
        assert_eq!(normalize_house_edge(-1.0), 0.0);
        assert_eq!(normalize_house_edge(2.0), 0.99);
        assert_eq!(normalize_house_edge(f64::NAN), DEFAULT_HOUSE_EDGE);
    }

    proptest! {
        #[test]
        fn prop_crash_point_at_least_one(u in 0.0f64..1.0, edge in 0.0f64..0.5) {
            let crash = crash_point_from_unit(u, edge);
            prop_assert!(crash >= 1.0);
            prop_assert!(crash <= MAX_CRASH_POINT);
        }

        #[test]
        fn prop_sampler_at_least_one(seed in any::<u64>()) {
            let mut sampler = SeededSampler::new(seed, DEFAULT_HOUSE_EDGE);
            for round in 0..32 {
                prop_assert!(sampler.generate(RoundId(round)).unwrap() >= 1.0);
            }
        }
    }
}
