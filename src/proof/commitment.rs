//! Server Seed Commitment Protocol
//!
//! Commit to each round's server seed before bets open. Reveal the seed after
//! the crash so anyone can recompute the crash point from published values.
//!
//! ```text
//! commitment  = SHA-256(server_seed)
//! digest      = SHA-256("CRASH_ENGINE_ROUND_V1" ‖ server_seed ‖ len ‖ client_seed ‖ round_id)
//! u           = first 52 bits of digest / 2^52
//! crash_point = floor(100 · (1 − edge) / (1 − u)) / 100, at least 1.00
//! ```

use std::collections::BTreeMap;
use rand::RngCore;
use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::hash::{decode_hash32, hash_bytes, DomainHasher, Hash32};
use crate::core::rng::unit_from_digest;
use crate::engine::crash_point::{
    crash_point_from_unit, normalize_house_edge, CrashPointGenerator, GeneratorError,
};
use crate::engine::state::RoundId;

/// Domain separator for crash point derivation.
const ROUND_DOMAIN: &[u8] = b"CRASH_ENGINE_ROUND_V1";

/// How many revealed proofs are kept for lookups.
pub const PROOF_RETENTION: usize = 256;

/// Produces fresh 32-byte server seeds.
pub type SeedSource = Box<dyn FnMut() -> Result<Hash32, GeneratorError> + Send + Sync>;

/// Everything a third party needs to recompute a round's crash point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FairnessProof {
    /// Round the proof belongs to.
    pub round_id: RoundId,
    /// Revealed server seed (hex).
    pub server_seed: String,
    /// Commitment published before the round (hex).
    pub commitment: String,
    /// Public client seed mixed into every round.
    pub client_seed: String,
    /// House edge in force for the round.
    pub house_edge: f64,
    /// Crash point the engine used.
    pub crash_point: f64,
}

/// Errors that can occur during proof verification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProofError {
    /// Seed or commitment is not 32 bytes of hex.
    #[error("malformed seed or commitment")]
    Malformed,

    /// Revealed seed does not hash to the commitment.
    #[error("server seed does not match commitment")]
    PreimageMismatch,

    /// Recomputed crash point differs from the claimed one.
    #[error("crash point mismatch: expected {expected}, got {got}")]
    CrashPointMismatch {
        /// Crash point recomputed from the seeds.
        expected: f64,
        /// Crash point in the proof.
        got: f64,
    },
}

/// Compute the public commitment for a server seed.
pub fn commit_seed(server_seed: &Hash32) -> Hash32 {
    hash_bytes(server_seed)
}

/// Derive the crash point from revealed inputs.
pub fn derive_crash_point(
    server_seed: &Hash32,
    client_seed: &str,
    round_id: RoundId,
    house_edge: f64,
) -> f64 {
    let mut hasher = DomainHasher::new(ROUND_DOMAIN);
    hasher.update_bytes(server_seed);
    hasher.update_str(client_seed);
    hasher.update_u64(round_id.0);
    let digest = hasher.finalize();

    crash_point_from_unit(unit_from_digest(&digest), house_edge)
}

/// Verify a revealed proof.
pub fn verify_proof(proof: &FairnessProof) -> Result<(), ProofError> {
    let seed = decode_hash32(&proof.server_seed).ok_or(ProofError::Malformed)?;
    let commitment = decode_hash32(&proof.commitment).ok_or(ProofError::Malformed)?;

    if commit_seed(&seed) != commitment {
        return Err(ProofError::PreimageMismatch);
    }

    let expected = derive_crash_point(&seed, &proof.client_seed, proof.round_id, proof.house_edge);
    if expected != proof.crash_point {
        return Err(ProofError::CrashPointMismatch {
            expected,
            got: proof.crash_point,
        });
    }

    Ok(())
}

/// Draw a server seed from the operating system.
pub fn os_seed() -> Result<Hash32, GeneratorError> {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| GeneratorError::Entropy(e.to_string()))?;
    Ok(seed)
}

// =============================================================================
// GENERATOR
// =============================================================================

/// Commit–reveal crash point generator.
pub struct ProvablyFairGenerator {
    house_edge: f64,
    client_seed: String,
    seed_source: SeedSource,
    /// Seeds committed but not yet used.
    pending: BTreeMap<RoundId, Hash32>,
    /// Proofs for generated rounds, oldest evicted first.
    proofs: BTreeMap<RoundId, FairnessProof>,
}

impl ProvablyFairGenerator {
    /// Create a generator drawing server seeds from the OS RNG.
    pub fn new(house_edge: f64, client_seed: impl Into<String>) -> Self {
        Self::with_seed_source(house_edge, client_seed, Box::new(os_seed))
    }

    /// Create a generator with a custom seed source.
    pub fn with_seed_source(
        house_edge: f64,
        client_seed: impl Into<String>,
        seed_source: SeedSource,
    ) -> Self {
        Self {
            house_edge: normalize_house_edge(house_edge),
            client_seed: client_seed.into(),
            seed_source,
            pending: BTreeMap::new(),
            proofs: BTreeMap::new(),
        }
    }

    /// Public client seed.
    pub fn client_seed(&self) -> &str {
        &self.client_seed
    }
}

impl CrashPointGenerator for ProvablyFairGenerator {
    fn name(&self) -> &'static str {
        "provably_fair"
    }

    fn commit(&mut self, round_id: RoundId) -> Option<Hash32> {
        match (self.seed_source)() {
            Ok(seed) => {
                let commitment = commit_seed(&seed);
                self.pending.insert(round_id, seed);
                debug!("Committed round {} to {}", round_id, hex::encode(commitment));
                Some(commitment)
            }
            Err(e) => {
                warn!("Could not commit round {}: {}", round_id, e);
                None
            }
        }
    }

    fn generate(&mut self, round_id: RoundId) -> Result<f64, GeneratorError> {
        let seed = self
            .pending
            .remove(&round_id)
            .ok_or(GeneratorError::MissingCommitment(round_id))?;

        // Seeds for skipped rounds are never revealed.
        self.pending.retain(|id, _| *id > round_id);

        let crash_point = derive_crash_point(&seed, &self.client_seed, round_id, self.house_edge);

        self.proofs.insert(round_id, FairnessProof {
            round_id,
            server_seed: hex::encode(seed),
            commitment: hex::encode(commit_seed(&seed)),
            client_seed: self.client_seed.clone(),
            house_edge: self.house_edge,
            crash_point,
        });
        while self.proofs.len() > PROOF_RETENTION {
            self.proofs.pop_first();
        }

        Ok(crash_point)
    }

    fn reveal_proof_for(&self, round_id: RoundId) -> Option<FairnessProof> {
        self.proofs.get(&round_id).cloned()
    }
}

// =============================================================================
// TESTS
// =============================================================================
