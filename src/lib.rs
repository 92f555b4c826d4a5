//! # Crash Engine Server
//!
//! Authoritative round engine for a multiplayer crash game: a multiplier
//! rises from 1.00x until a hidden crash point, and players who cash out
//! before the crash win their wager times the multiplier.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH ENGINE SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │  └── hash.rs     - Domain-separated SHA-256                  │
//! │                                                              │
//! │  engine/         - Round engine (synchronous)                │
//! │  ├── scheduler.rs- WAITING → RUNNING → CRASHED state machine │
//! │  ├── clock.rs    - Multiplier growth curve                   │
//! │  ├── crash_point.rs - Crash point generators                 │
//! │  ├── ledger.rs   - Accounts, bets, cashouts                  │
//! │  ├── history.rs  - Finished-round log                        │
//! │  └── events.rs   - Event fan-out                             │
//! │                                                              │
//! │  proof/          - Provably fair commit–reveal               │
//! │                                                              │
//! │  network/        - WebSocket transport                       │
//! │  ├── server.rs   - Accept loop, per-connection relay         │
//! │  ├── driver.rs   - Tick task                                 │
//! │  ├── session.rs  - Per-connection request handling           │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - JWT / guest authentication                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! The scheduler sits behind a single lock. Ticks, bets and cashouts each
//! apply every transition due at their own instant before acting, so a
//! cashout racing the crash either lands before the crash commit or is
//! rejected; never both, never neither.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod engine;
pub mod network;
pub mod proof;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use engine::config::EngineConfig;
pub use engine::scheduler::RoundScheduler;
pub use engine::state::{Phase, PlayerId, RoundId};
pub use proof::commitment::{FairnessProof, verify_proof};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
