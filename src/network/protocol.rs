//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON text frames; multiplier ticks can optionally be sent as
//! compact bincode frames to clients that ask for them.

use serde::{Serialize, Deserialize};

use crate::engine::events::EngineEvent;
use crate::engine::history::HistoryRecord;
use crate::engine::ledger::{Amount, Bet, Rejection, RosterEntry};
use crate::engine::state::{RoundId, RoundSnapshot};
use crate::proof::commitment::FairnessProof;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server.
    Auth(AuthRequest),

    /// Bet on the round that is currently open.
    PlaceBet {
        /// Wager in account units.
        amount: Amount,
        /// Currency ticker, e.g. `BTC`.
        currency: String,
    },

    /// Cash out the active bet at the current multiplier.
    CashOut,

    /// Request current round state (for reconnection).
    SyncRequest,

    /// Request the recent crash history.
    HistoryRequest,

    /// Request the fairness proof of a finished round.
    ProofRequest {
        /// Round to prove.
        round_id: RoundId,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// JWT, or any opaque guest token when the server runs without keys.
    pub token: String,
    /// Receive multiplier ticks as binary [`MultiplierFrame`]s.
    #[serde(default)]
    pub binary_ticks: bool,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// A round opened for bets.
    RoundWaiting {
        /// Round number.
        round_id: RoundId,
        /// Time left to bet.
        countdown_ms: u64,
        /// Hex commitment to the round's server seed.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        commitment: Option<String>,
    },

    /// Betting closed and the multiplier started rising.
    RoundStarted {
        /// Round number.
        round_id: RoundId,
    },

    /// Multiplier tick.
    MultiplierUpdate {
        /// Round number.
        round_id: RoundId,
        /// Current multiplier.
        value: f64,
        /// Time since the round started.
        elapsed_ms: u64,
    },

    /// The round crashed.
    RoundCrashed {
        /// Round number.
        round_id: RoundId,
        /// Final multiplier.
        crash_point: f64,
        /// Revealed server seed, for provably fair rounds.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        proof: Option<FairnessProof>,
    },

    /// The round was abandoned and every bet refunded.
    RoundAborted {
        /// Round number.
        round_id: RoundId,
        /// Number of bets refunded.
        refunded: usize,
    },

    /// Your bet was accepted.
    BetAccepted {
        /// The bet as recorded.
        bet: Bet,
    },

    /// Your bet was refused.
    BetRejected {
        /// Why.
        reason: Rejection,
    },

    /// Someone placed a bet.
    BetPlaced {
        /// The bet as recorded.
        bet: Bet,
    },

    /// Your cashout was accepted.
    CashoutResult {
        /// Amount credited.
        amount: Amount,
        /// Multiplier locked in.
        multiplier: f64,
        /// Balance after the credit.
        balance: Amount,
    },

    /// Your cashout was refused.
    CashoutRejected {
        /// Why.
        reason: Rejection,
    },

    /// Players exposed in the live round.
    Players {
        /// Roster.
        players: Vec<RosterEntry>,
    },

    /// Your balance.
    Balance {
        /// Balance in account units.
        balance: Amount,
    },

    /// Recent crash history, most recent first.
    HistorySnapshot {
        /// Records.
        records: Vec<HistoryRecord>,
    },

    /// Full round snapshot (on sync or after falling behind).
    State(RoundSnapshot),

    /// Answer to a proof request.
    FairnessProof {
        /// Round asked about.
        round_id: RoundId,
        /// Proof, absent while the round is live or when it was not provable.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        proof: Option<FairnessProof>,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall clock, Unix millis.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Player id (UUID string) if successful.
    pub player_id: Option<String>,
    /// Balance if successful.
    pub balance: Option<Amount>,
    /// Whether the server accepted the token without verifying it.
    pub guest: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Not authenticated.
    NotAuthenticated,
    /// JWT token has expired.
    TokenExpired,
    /// Invalid JWT token (signature, format, claims).
    InvalidToken,
    /// Invalid input.
    InvalidInput,
    /// Server at its connection limit.
    ServerOverloaded,
    /// No room for another player account.
    AccountLimitReached,
}

impl ServerMessage {
    /// Client-facing form of an engine event, if clients should see it.
    pub fn from_event(event: &EngineEvent) -> Option<Self> {
        let msg = match event {
            EngineEvent::RoundWaiting { round_id, countdown_ms, commitment } => Self::RoundWaiting {
                round_id: *round_id,
                countdown_ms: *countdown_ms,
                commitment: commitment.clone(),
            },
            EngineEvent::RoundStarted { round_id } => Self::RoundStarted { round_id: *round_id },
            EngineEvent::MultiplierUpdate { round_id, value, elapsed_ms } => Self::MultiplierUpdate {
                round_id: *round_id,
                value: *value,
                elapsed_ms: *elapsed_ms,
            },
            EngineEvent::RoundCrashed { round_id, crash_point, proof } => Self::RoundCrashed {
                round_id: *round_id,
                crash_point: *crash_point,
                proof: proof.clone(),
            },
            EngineEvent::RoundAborted { round_id, refunded, .. } => Self::RoundAborted {
                round_id: *round_id,
                refunded: *refunded,
            },
            EngineEvent::BetPlaced { bet } => Self::BetPlaced { bet: bet.clone() },
            EngineEvent::PlayersChanged { players } => Self::Players { players: players.clone() },
            // Settlement details go to the owner directly; history is pulled.
            EngineEvent::CashedOut { .. }
            | EngineEvent::BetsSettled { .. }
            | EngineEvent::HistoryAppended { .. } => return None,
        };
        Some(msg)
    }
}

// =============================================================================
// BINARY TICKS
// =============================================================================

/// Compact multiplier tick for binary frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiplierFrame {
    /// Round number.
    pub round_id: u64,
    /// Current multiplier.
    pub value: f64,
    /// Time since the round started.
    pub elapsed_ms: u64,
}

impl MultiplierFrame {
    /// Binary frame for a multiplier update event.
    pub fn from_event(event: &EngineEvent) -> Option<Self> {
        match event {
            EngineEvent::MultiplierUpdate { round_id, value, elapsed_ms } => Some(Self {
                round_id: round_id.0,
                value: *value,
                elapsed_ms: *elapsed_ms,
            }),
            _ => None,
        }
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
