//! Round State Definitions
//!
//! Identifiers, phases and the single live round record.

use std::time::Instant;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::hash::Hash32;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique player identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[derive(Default)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

/// Monotonic round number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    /// The round after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// PHASE
// =============================================================================

/// Round phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Countdown, bets accepted.
    Waiting,
    /// Multiplier rising, cashouts accepted.
    Running,
    /// Cooldown after the crash.
    Crashed,
}

// =============================================================================
// ROUND
// =============================================================================

/// The live round.
///
/// The crash point is private; it leaves this struct only through
/// [`Round::revealed_crash_point`] once the round has crashed.
#[derive(Debug, Clone)]
pub struct Round {
    /// Round number.
    pub id: RoundId,
    /// Current phase.
    pub phase: Phase,
    /// When the current phase began (scheduled instant, not tick arrival).
    pub phase_started_at: Instant,
    /// Current multiplier.
    pub multiplier: f64,
    /// Seed commitment published while waiting, if the generator commits.
    pub commitment: Option<Hash32>,
    /// Wall-clock time of the scheduled crash instant.
    pub crashed_at: Option<DateTime<Utc>>,
    crash_point: Option<f64>,
}

impl Round {
    /// Create a round in the waiting phase.
    pub fn new(id: RoundId, now: Instant, commitment: Option<Hash32>) -> Self {
        Self {
            id,
            phase: Phase::Waiting,
            phase_started_at: now,
            multiplier: 1.0,
            commitment,
            crashed_at: None,
            crash_point: None,
        }
    }

    /// Arm the round with its crash point and enter the running phase.
    pub(crate) fn begin_running(&mut self, crash_point: f64, at: Instant) {
        self.crash_point = Some(crash_point);
        self.phase = Phase::Running;
        self.phase_started_at = at;
        self.multiplier = 1.0;
    }

    /// Pin the multiplier to the crash point and enter the crashed phase.
    ///
    /// `at` is the scheduled crash instant, `now` the instant it is applied.
    pub(crate) fn mark_crashed(&mut self, at: Instant, now: Instant) {
        if let Some(crash_point) = self.crash_point {
            self.multiplier = crash_point;
        }
        self.phase = Phase::Crashed;
        self.phase_started_at = at;
        self.crashed_at = Some(wall_clock_at(at, now));
    }

    /// Crash point known to the engine (hidden from observers).
    pub(crate) fn crash_point(&self) -> Option<f64> {
        self.crash_point
    }

    /// Crash point, available only after the crash.
    pub fn revealed_crash_point(&self) -> Option<f64> {
        match self.phase {
            Phase::Crashed => self.crash_point,
            _ => None,
        }
    }
}

/// Wall-clock time of `at`, given that `now` is the present.
pub(crate) fn wall_clock_at(at: Instant, now: Instant) -> DateTime<Utc> {
    let behind = chrono::Duration::from_std(now.saturating_duration_since(at))
        .unwrap_or_else(|_| chrono::Duration::zero());
    Utc::now() - behind
}

/// Read-only snapshot of the scheduler, safe to hand to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round number.
    pub round_id: RoundId,
    /// Current phase.
    pub phase: Phase,
    /// Current multiplier.
    pub multiplier: f64,
    /// Milliseconds left in the countdown (waiting) or cooldown (crashed).
    pub remaining_ms: u64,
    /// Milliseconds since the running phase began (zero otherwise).
    pub elapsed_ms: u64,
    /// Hex seed commitment, when the generator publishes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
    /// Crash point, present only once crashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_point: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crash_point_hidden_until_crash() {
        let now = Instant::now();
        let mut round = Round::new(RoundId(1), now, None);
        assert_eq!(round.revealed_crash_point(), None);

        round.begin_running(2.5, now);
        assert_eq!(round.revealed_crash_point(), None);
        assert_eq!(round.crash_point(), Some(2.5));

        round.mark_crashed(now, now + std::time::Duration::from_secs(4));
        assert_eq!(round.revealed_crash_point(), Some(2.5));
        assert_eq!(round.multiplier, 2.5);

        // Stamped at the scheduled instant, not when it was applied
        let lag = Utc::now() - round.crashed_at.unwrap();
        assert!(lag.num_milliseconds() >= 4000, "crash stamped {:?} ago", lag);
    }

    #[test]
    fn test_player_id_uuid_roundtrip() {
        let id = PlayerId::new([7; 16]);
        let parsed = PlayerId::from_uuid_str(&id.to_uuid_string());
        assert_eq!(parsed, Some(id));
        assert_eq!(id.short(), "07070707");
    }

    #[test]
    fn test_round_id_serializes_as_integer() {
        let json = serde_json::to_string(&RoundId(42)).unwrap();
        assert_eq!(json, "42");
        assert_eq!(RoundId(42).next(), RoundId(43));
    }
}
