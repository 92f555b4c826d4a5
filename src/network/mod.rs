//! Network Layer
//!
//! WebSocket transport around the round engine. Everything that decides a
//! round lives in `engine/`; this layer authenticates players, ticks the
//! scheduler, and relays requests and events.

pub mod auth;
pub mod driver;
pub mod protocol;
pub mod session;
pub mod server;

pub use auth::{AuthConfig, AuthError, Identity, PlayerClaims, VerifyKey, authenticate, verify_jwt};
pub use driver::{RoundDriver, SharedScheduler};
pub use protocol::{ClientMessage, ServerMessage, ErrorCode, MultiplierFrame};
pub use session::{ClientSession, GameContext, Outbound};
pub use server::{CrashServer, CrashServerError, ServerConfig};
