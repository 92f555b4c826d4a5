//! Core deterministic primitives.
//!
//! Seeded randomness and domain-separated hashing shared by the crash point
//! generators and the fairness proofs.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::DeterministicRng;
pub use hash::{DomainHasher, Hash32};
