//! Engine Events
//!
//! Lifecycle and settlement events, fanned out to any number of listeners.

use serde::{Serialize, Deserialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::engine::history::HistoryRecord;
use crate::engine::ledger::{Bet, RosterEntry, Settlement};
use crate::engine::state::RoundId;
use crate::proof::commitment::FairnessProof;

/// Default per-listener buffer before a slow listener starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something observers may care about.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A new round opened for bets.
    RoundWaiting {
        /// Round ID.
        round_id: RoundId,
        /// Time left to bet.
        countdown_ms: u64,
        /// Hex seed commitment, if the generator commits.
        commitment: Option<String>,
    },

    /// Betting closed, multiplier started.
    RoundStarted {
        /// Round ID.
        round_id: RoundId,
    },

    /// Multiplier recomputed on a tick.
    MultiplierUpdate {
        /// Round ID.
        round_id: RoundId,
        /// Current multiplier.
        value: f64,
        /// Time since the round started.
        elapsed_ms: u64,
    },

    /// Round crashed; bets still active are lost.
    RoundCrashed {
        /// Round ID.
        round_id: RoundId,
        /// Final multiplier.
        crash_point: f64,
        /// Revealed seed, for commit–reveal rounds.
        proof: Option<FairnessProof>,
    },

    /// Crash point could not be produced; every bet refunded.
    RoundAborted {
        /// Round ID.
        round_id: RoundId,
        /// Generator failure.
        reason: String,
        /// Bets refunded.
        refunded: usize,
    },

    /// A bet was accepted.
    BetPlaced {
        /// The new bet.
        bet: Bet,
    },

    /// A bet was cashed out.
    CashedOut {
        /// Credit applied.
        settlement: Settlement,
    },

    /// Active bets were marked lost at the crash.
    BetsSettled {
        /// Round ID.
        round_id: RoundId,
        /// Bets marked lost.
        lost: usize,
    },

    /// Roster of exposed players changed.
    PlayersChanged {
        /// Players with an active bet.
        players: Vec<RosterEntry>,
    },

    /// A finished round entered the history log.
    HistoryAppended {
        /// The finished round.
        record: HistoryRecord,
    },
}

/// Fan-out relay.
///
/// Every listener owns a receiver with its own buffer, so a slow listener
/// lags behind instead of holding up the others. Listeners only observe.
#[derive(Clone, Debug)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBroadcaster {
    /// Create a broadcaster buffering `capacity` events per listener.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a listener.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Returns how many listeners it was queued for.
    pub fn publish(&self, event: EngineEvent) -> usize {
        trace!(?event, "publish");
        self.tx.send(event).unwrap_or(0)
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
