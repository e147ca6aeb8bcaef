use crate::blockchain::core::state::PendingTransactions;
use crate::blockchain::core::validation::is_valid_chain;
use crate::error::ChainError;
use crate::miner::ProofOfWork;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Index of the genesis block. Indices are 1-based: a block's index is its
/// position in the chain counting from one.
pub const GENESIS_INDEX: u64 = 1;
/// Sentinel previous-hash of the genesis block; not a real digest.
pub const GENESIS_PREVIOUS_HASH: &str = "1";
/// Reserved genesis proof; not derived from proof-of-work.
pub const GENESIS_PROOF: u64 = 100;

/// An ordered sequence of blocks, genesis first.
pub type Chain = Vec<Block>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    /// Seconds since the Unix epoch, with microsecond resolution.
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
    pub proof: u64,
    pub previous_hash: String,
}

impl Block {
    /// Assemble a block and stamp it with the current wall-clock time.
    ///
    /// The block's digest is not stored; it is always recomputed from the
    /// fields by [`Block::hash`].
    pub fn new(
        index: u64,
        proof: u64,
        previous_hash: impl Into<String>,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            index,
            timestamp: now_seconds(),
            transactions,
            proof,
            previous_hash: previous_hash.into(),
        }
    }

    pub fn genesis() -> Self {
        Block::new(GENESIS_INDEX, GENESIS_PROOF, GENESIS_PREVIOUS_HASH, Vec::new())
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_PREVIOUS_HASH && self.proof == GENESIS_PROOF
    }

    /// Lowercase hex SHA-256 of [`canonical_encoding`](Self::canonical_encoding).
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_encoding().as_bytes()))
    }

    /// Deterministic byte encoding hashed by every replica.
    ///
    /// Compact JSON with object keys in ascending order at every level:
    /// `index`, `previous_hash`, `proof`, `timestamp`, `transactions`, and
    /// within each transaction `amount`, `recipient`, `sender`. The
    /// transaction list keeps its order. Scalars use serde_json's encoding.
    pub fn canonical_encoding(&self) -> String {
        let transactions: Vec<String> = self
            .transactions
            .iter()
            .map(canonical_transaction)
            .collect();

        format!(
            r#"{{"index":{},"previous_hash":{},"proof":{},"timestamp":{},"transactions":[{}]}}"#,
            self.index,
            Value::from(self.previous_hash.as_str()),
            self.proof,
            Value::from(self.timestamp),
            transactions.join(",")
        )
    }
}

fn canonical_transaction(tx: &Transaction) -> String {
    format!(
        r#"{{"amount":{},"recipient":{},"sender":{}}}"#,
        Value::from(tx.amount),
        Value::from(tx.recipient.as_str()),
        Value::from(tx.sender.as_str())
    )
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// The head of a chain as seen by a miner before it starts searching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    pub index: u64,
    pub proof: u64,
    pub hash: String,
}

/// Authoritative chain plus the buffer of transactions awaiting a block.
///
/// The chain is never empty: it starts at genesis and only grows through
/// [`mine`](Self::mine) / [`commit_proof`](Self::commit_proof), or is swapped
/// wholesale through [`replace_chain`](Self::replace_chain).
#[derive(Debug, Clone)]
pub struct Ledger {
    blocks: Chain,
    pending: PendingTransactions,
    node_id: String,
    pow: ProofOfWork,
}

impl Ledger {
    /// Create a ledger holding only the genesis block. `node_id` receives
    /// the mining reward for every block this ledger forges.
    pub fn new(node_id: impl Into<String>, pow: ProofOfWork) -> Self {
        Ledger {
            blocks: vec![Block::genesis()],
            pending: PendingTransactions::new(),
            node_id: node_id.into(),
            pow,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn pow(&self) -> ProofOfWork {
        self.pow
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Read-only snapshot of the chain.
    pub fn chain(&self) -> Chain {
        self.blocks.clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn last_block(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip(&self) -> ChainTip {
        let last = self.last_block();
        ChainTip {
            index: last.index,
            proof: last.proof,
            hash: last.hash(),
        }
    }

    pub fn pending(&self) -> &[Transaction] {
        self.pending.as_slice()
    }

    /// Buffer a transaction for the next block and return that block's index.
    pub fn submit_transaction(&mut self, tx: Transaction) -> u64 {
        self.pending.push(tx);
        self.last_block().index + 1
    }

    /// Search for a proof against the current head and forge the next block.
    ///
    /// Blocks the calling thread for the whole search; async callers go
    /// through [`crate::node::Node::mine`] instead.
    pub fn mine(&mut self) -> Block {
        let proof = self.pow.find_proof(self.last_block().proof);
        self.forge(proof)
    }

    /// Forge the next block with a proof found off-lock.
    ///
    /// Fails with [`ChainError::StaleMine`] when the head is no longer the
    /// block whose hash was `expected_last_hash`, or when `proof` does not
    /// satisfy the predicate against the current head. State is untouched on
    /// failure.
    pub fn commit_proof(&mut self, expected_last_hash: &str, proof: u64) -> Result<Block, ChainError> {
        let last = self.last_block();
        if last.hash() != expected_last_hash || !self.pow.valid_proof(last.proof, proof) {
            warn!(
                expected = %expected_last_hash,
                head_index = last.index,
                proof,
                "discarding stale proof"
            );
            return Err(ChainError::StaleMine);
        }
        Ok(self.forge(proof))
    }

    fn forge(&mut self, proof: u64) -> Block {
        let reward = Transaction::reward(&self.node_id);
        self.pending.push(reward);

        let last = self.last_block();
        let block = Block::new(last.index + 1, proof, last.hash(), self.pending.take());
        self.blocks.push(block.clone());

        info!(
            index = block.index,
            proof = block.proof,
            transactions = block.transactions.len(),
            "new block forged"
        );
        block
    }

    /// Substitute the whole chain. Callers must have validated `candidate`;
    /// an empty candidate is ignored so the ledger always keeps a head.
    pub fn replace_chain(&mut self, candidate: Chain) {
        if candidate.is_empty() {
            warn!("refusing to replace chain with an empty one");
            return;
        }
        info!(
            old_length = self.blocks.len(),
            new_length = candidate.len(),
            "replacing local chain"
        );
        self.blocks = candidate;
    }

    pub fn is_valid(&self) -> bool {
        is_valid_chain(&self.blocks, &self.pow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pow() -> ProofOfWork {
        ProofOfWork::new(2)
    }

    fn sample_block() -> Block {
        Block {
            index: 2,
            timestamp: 1_700_000_000.25,
            transactions: vec![
                Transaction::new("a", "b", 5.0),
                Transaction::reward("node"),
            ],
            proof: 35_293,
            previous_hash: "ab".repeat(32),
        }
    }

    #[test]
    fn test_fresh_ledger_holds_genesis() {
        let ledger = Ledger::new("node", ProofOfWork::default());
        assert_eq!(ledger.len(), 1);
        let genesis = ledger.last_block();
        assert_eq!(genesis.index, GENESIS_INDEX);
        assert_eq!(genesis.previous_hash, "1");
        assert_eq!(genesis.proof, 100);
        assert!(genesis.transactions.is_empty());
        assert!(genesis.is_genesis());
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_canonical_encoding_layout() {
        let block = sample_block();
        let expected = format!(
            r#"{{"index":2,"previous_hash":"{}","proof":35293,"timestamp":1700000000.25,"transactions":[{{"amount":5.0,"recipient":"b","sender":"a"}},{{"amount":1.0,"recipient":"node","sender":"0"}}]}}"#,
            "ab".repeat(32)
        );
        assert_eq!(block.canonical_encoding(), expected);
    }

    #[test]
    fn test_hash_is_deterministic_hex() {
        let block = sample_block();
        let hash = block.hash();
        assert_eq!(hash, block.clone().hash());
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_hash_changes_with_any_field() {
        let block = sample_block();
        let original = block.hash();

        let mut mutated = block.clone();
        mutated.index += 1;
        assert_ne!(mutated.hash(), original);

        let mut mutated = block.clone();
        mutated.timestamp += 0.000001;
        assert_ne!(mutated.hash(), original);

        let mut mutated = block.clone();
        mutated.proof += 1;
        assert_ne!(mutated.hash(), original);

        let mut mutated = block.clone();
        mutated.previous_hash.replace_range(0..1, "c");
        assert_ne!(mutated.hash(), original);

        let mut mutated = block.clone();
        mutated.transactions[0].amount = 6.0;
        assert_ne!(mutated.hash(), original);

        let mut mutated = block.clone();
        mutated.transactions.swap(0, 1);
        assert_ne!(mutated.hash(), original);
    }

    #[test]
    fn test_hash_survives_json_round_trip() {
        let block = sample_block();
        let json = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.hash(), block.hash());
    }

    #[test]
    fn test_submit_transaction_targets_next_block() {
        let mut ledger = Ledger::new("node", test_pow());
        let index = ledger.submit_transaction(Transaction::new("a", "b", 5.0));
        assert_eq!(index, 2);
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn test_mine_appends_one_block_and_clears_buffer() {
        let mut ledger = Ledger::new("node", test_pow());
        ledger.submit_transaction(Transaction::new("a", "b", 5.0));
        let genesis_hash = ledger.last_block().hash();

        let block = ledger.mine();

        assert_eq!(ledger.len(), 2);
        assert!(ledger.pending().is_empty());
        assert_eq!(block.index, 2);
        assert_eq!(block.previous_hash, genesis_hash);
        assert!(block.transactions.contains(&Transaction::new("a", "b", 5.0)));
        assert!(block.transactions.contains(&Transaction::reward("node")));
        assert!(ledger.pow().valid_proof(GENESIS_PROOF, block.proof));
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_commit_proof_rejects_stale_head() {
        let mut ledger = Ledger::new("node", test_pow());
        let tip = ledger.tip();
        let proof = ledger.pow().find_proof(tip.proof);

        ledger.mine();
        ledger.submit_transaction(Transaction::new("a", "b", 1.0));

        let err = ledger.commit_proof(&tip.hash, proof).unwrap_err();
        assert!(matches!(err, ChainError::StaleMine));
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn test_commit_proof_rejects_invalid_proof() {
        let mut ledger = Ledger::new("node", test_pow());
        let tip = ledger.tip();
        let bad = (0..).find(|p| !ledger.pow().valid_proof(tip.proof, *p)).unwrap();
        assert!(matches!(
            ledger.commit_proof(&tip.hash, bad),
            Err(ChainError::StaleMine)
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_commit_proof_forges_on_current_head() {
        let mut ledger = Ledger::new("node", test_pow());
        let tip = ledger.tip();
        let proof = ledger.pow().find_proof(tip.proof);
        let block = ledger.commit_proof(&tip.hash, proof).unwrap();
        assert_eq!(block.previous_hash, tip.hash);
        assert_eq!(ledger.len(), 2);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_replace_chain_ignores_empty_candidate() {
        let mut ledger = Ledger::new("node", test_pow());
        ledger.mine();
        ledger.replace_chain(Vec::new());
        assert_eq!(ledger.len(), 2);

        let other = Ledger::new("other", test_pow()).chain();
        ledger.replace_chain(other.clone());
        assert_eq!(ledger.chain(), other);
    }
}
