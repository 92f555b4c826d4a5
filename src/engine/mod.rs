//! Round Engine Module
//!
//! Everything that decides what happens in a round. Synchronous; the network
//! layer wraps the scheduler in a lock and drives it with ticks.
//!
//! ## Module Structure
//!
//! - `clock`: Multiplier growth curve
//! - `crash_point`: Crash point generators
//! - `state`: Identifiers, phases, the live round
//! - `ledger`: Accounts, bets, cashouts
//! - `price`: Currency price source
//! - `history`: Finished-round log
//! - `events`: Event fan-out
//! - `config`: Engine configuration
//! - `scheduler`: The round state machine

pub mod clock;
pub mod crash_point;
pub mod state;
pub mod ledger;
pub mod price;
pub mod history;
pub mod events;
pub mod config;
pub mod scheduler;

// Re-export key types
pub use clock::MultiplierClock;
pub use crash_point::{CrashPointGenerator, GeneratorError, SeededSampler};
pub use state::{Phase, PlayerId, Round, RoundId, RoundSnapshot};
pub use ledger::{Amount, Bet, BetLedger, BetStatus, Rejection, RosterEntry, Settlement};
pub use price::{Currency, PriceSource, StaticPriceSource};
pub use history::{HistoryRecord, HistoryStore};
pub use events::{EngineEvent, EventBroadcaster};
pub use config::{ConfigError, EngineConfig, FairnessMode};
pub use scheduler::RoundScheduler;
