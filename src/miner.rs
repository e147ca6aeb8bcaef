//! Proof-of-work engine.
//!
//! A proof `p` is admitted after `last_proof` when the SHA-256 hex digest of
//! the decimal text `"{last_proof}{p}"` starts with `difficulty` zero
//! characters. Difficulty is fixed for the lifetime of a network; there is no
//! retargeting.
//!
//! The search is CPU-bound, so callers running inside the async runtime use
//! [`ProofOfWork::spawn_proof_search`], which moves it onto tokio's blocking
//! pool and honours a cancellation flag.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Number of leading zero hex characters a proof digest must carry.
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Upper bound on difficulty: a SHA-256 hex digest has 64 characters.
pub const MAX_DIFFICULTY: usize = 64;

/// Attempts between two reads of the cancellation flag.
const CANCEL_CHECK_INTERVAL: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: usize,
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY)
    }
}

impl ProofOfWork {
    /// Difficulty is clamped to [`MAX_DIFFICULTY`].
    pub fn new(difficulty: usize) -> Self {
        Self {
            difficulty: difficulty.min(MAX_DIFFICULTY),
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Does `proof` satisfy the admission predicate after `last_proof`?
    pub fn valid_proof(&self, last_proof: u64, proof: u64) -> bool {
        let guess = format!("{}{}", last_proof, proof);
        let digest = Sha256::digest(guess.as_bytes());
        has_leading_zero_nibbles(&digest, self.difficulty)
    }

    /// Smallest non-negative proof valid after `last_proof`, by linear search
    /// from zero.
    pub fn find_proof(&self, last_proof: u64) -> u64 {
        let mut proof = 0u64;
        while !self.valid_proof(last_proof, proof) {
            proof += 1;
        }
        proof
    }

    /// Same search as [`find_proof`](Self::find_proof), abandoned with `None`
    /// once `cancel` is raised.
    pub fn find_proof_cancellable(&self, last_proof: u64, cancel: &AtomicBool) -> Option<u64> {
        let mut proof = 0u64;
        loop {
            if proof % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                trace!(last_proof, attempts = proof, "proof search cancelled");
                return None;
            }
            if self.valid_proof(last_proof, proof) {
                debug!(last_proof, proof, "proof found");
                return Some(proof);
            }
            proof += 1;
        }
    }

    /// Run the search on the blocking pool. The handle resolves to `None`
    /// if `cancel` was raised before a proof was found.
    pub fn spawn_proof_search(
        &self,
        last_proof: u64,
        cancel: Arc<AtomicBool>,
    ) -> JoinHandle<Option<u64>> {
        let engine = *self;
        tokio::task::spawn_blocking(move || engine.find_proof_cancellable(last_proof, &cancel))
    }
}

/// Raises a search's cancellation flag when dropped.
///
/// Held by whoever awaits a spawned search, so the blocking thread stops
/// even when the awaiting future is dropped before it completes.
pub struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn has_leading_zero_nibbles(digest: &[u8], count: usize) -> bool {
    (0..count).all(|i| {
        let byte = digest[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        nibble == 0
    })
}
