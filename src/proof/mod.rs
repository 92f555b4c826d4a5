//! Provably Fair Rounds
//!
//! Commit–reveal over per-round server seeds. The commitment goes out with
//! `round_waiting`; the seed is revealed with `round_crashed` and can be
//! checked offline with [`verify_proof`].

pub mod commitment;

pub use commitment::{
    FairnessProof, ProofError, ProvablyFairGenerator, SeedSource,
    commit_seed, derive_crash_point, verify_proof,
};
