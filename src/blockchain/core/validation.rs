use crate::blockchain::core::chain::Block;
use crate::error::ChainError;
use crate::miner::ProofOfWork;
use tracing::debug;

/// Walk `chain` pairwise from the second block and check that every block
/// links to the digest of its predecessor and carries a proof admitted
/// after the predecessor's proof. Stops at the first broken link.
///
/// The chain may come from an untrusted peer; field shapes were already
/// enforced when it was deserialized. An empty chain is rejected, a
/// genesis-only chain is trivially valid.
pub fn validate_chain(chain: &[Block], pow: &ProofOfWork) -> Result<(), ChainError> {
    if chain.is_empty() {
        return Err(ChainError::InvalidChain("chain is empty".to_string()));
    }

    for (position, pair) in chain.windows(2).enumerate() {
        let (prev, curr) = (&pair[0], &pair[1]);

        let expected = prev.hash();
        if curr.previous_hash != expected {
            return Err(ChainError::InvalidChain(format!(
                "block at position {} links to {}, expected {}",
                position + 1,
                curr.previous_hash,
                expected
            )));
        }

        if !pow.valid_proof(prev.proof, curr.proof) {
            return Err(ChainError::InvalidChain(format!(
                "block at position {} has proof {} not admitted after {}",
                position + 1,
                curr.proof,
                prev.proof
            )));
        }
    }

    Ok(())
}

pub fn is_valid_chain(chain: &[Block], pow: &ProofOfWork) -> bool {
    match validate_chain(chain, pow) {
        Ok(()) => true,
        Err(e) => {
            debug!(length = chain.len(), reason = %e, "chain failed validation");
            false
        }
    }
}
