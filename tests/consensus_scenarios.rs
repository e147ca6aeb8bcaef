//! End-to-end ledger and consensus scenarios run against in-process peers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tallychain::blockchain::{is_valid_chain, Chain, Ledger};
use tallychain::config::Config;
use tallychain::consensus::{ConsensusResolver, ResolveOptions};
use tallychain::error::ChainError;
use tallychain::miner::ProofOfWork;
use tallychain::network::{ChainFetcher, Peer, PeerChain};
use tallychain::node::Node;
use tallychain::transaction::Transaction;

const DIFFICULTY: usize = 2;

/// Serves fixed chains; peers missing from the map are unreachable.
struct FixedPeers {
    chains: HashMap<Peer, PeerChain>,
}

impl ChainFetcher for FixedPeers {
    async fn fetch_chain(&self, peer: &Peer) -> Result<PeerChain, ChainError> {
        self.chains
            .get(peer)
            .cloned()
            .ok_or_else(|| ChainError::PeerUnreachable(peer.addr()))
    }
}

fn pow() -> ProofOfWork {
    ProofOfWork::new(DIFFICULTY)
}

fn mined_chain(owner: &str, length: usize) -> Chain {
    let mut ledger = Ledger::new(owner, pow());
    while ledger.len() < length {
        ledger.submit_transaction(Transaction::new(owner, "someone", 2.5));
        ledger.mine();
    }
    ledger.chain()
}

fn reported(chain: Chain) -> PeerChain {
    PeerChain {
        length: chain.len(),
        chain,
    }
}

fn config(identifier: &str) -> Config {
    let mut config = Config::default();
    config.node.identifier = identifier.to_string();
    config.miner.difficulty = DIFFICULTY;
    config
}

#[test]
fn scenario_a_fresh_ledger_is_genesis_only() {
    let ledger = Ledger::new("node", ProofOfWork::default());
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.last_block().previous_hash, "1");
    assert_eq!(ledger.last_block().proof, 100);
}

#[test]
fn scenario_b_and_c_submit_then_mine() {
    let mut ledger = Ledger::new("node", pow());

    let index = ledger.submit_transaction(Transaction::new("a", "b", 5.0));
    assert_eq!(index, 2);
    assert_eq!(ledger.pending().len(), 1);

    let block = ledger.mine();
    assert_eq!(ledger.len(), 2);
    assert!(block.transactions.contains(&Transaction::reward("node")));
    assert!(block.transactions.contains(&Transaction::new("a", "b", 5.0)));
    assert!(ledger.pending().is_empty());
    assert!(ledger.is_valid());
}

#[test]
fn monotonic_length_over_many_mines() {
    let mut ledger = Ledger::new("node", pow());
    for expected in 2..=6 {
        ledger.submit_transaction(Transaction::new("a", "b", 1.0));
        ledger.mine();
        assert_eq!(ledger.len(), expected);
        assert!(ledger.pending().is_empty());
    }
    assert!(is_valid_chain(ledger.blocks(), &pow()));
}

#[tokio::test]
async fn scenario_d_tampered_longer_chain_loses_to_valid_shorter_one() {
    tokio::time::timeout(Duration::from_secs(30), async {
        let local = mined_chain("local", 3);

        let mut tampered = mined_chain("peer-a", 5);
        tampered[2].transactions[0].amount = 9_999.0;
        assert!(!is_valid_chain(&tampered, &pow()));

        let honest = mined_chain("peer-b", 4);

        let peer_a = Peer::new("10.0.0.1", 5000);
        let peer_b = Peer::new("10.0.0.2", 5000);
        let mut chains = HashMap::new();
        chains.insert(peer_a.clone(), reported(tampered));
        chains.insert(peer_b.clone(), reported(honest.clone()));

        let resolver = ConsensusResolver::new(
            Arc::new(FixedPeers { chains }),
            pow(),
            ResolveOptions::default(),
        );
        let resolution = resolver.resolve_conflicts(&[peer_a, peer_b], &local).await;

        assert!(resolution.replaced);
        assert_eq!(resolution.chain, honest);
    })
    .await
    .expect("scenario_d timed out");
}

#[tokio::test]
async fn scenario_e_all_peers_unreachable() {
    tokio::time::timeout(Duration::from_secs(10), async {
        let node = Node::with_fetcher(
            config("local"),
            FixedPeers {
                chains: HashMap::new(),
            },
        )
        .unwrap();
        node.register_peers(&["10.0.0.1:5000", "10.0.0.2:5000"]).unwrap();
        node.mine().await.unwrap();
        let before = node.chain().await;

        let resolution = node.resolve().await;

        assert!(!resolution.replaced);
        assert_eq!(resolution.chain, before);
        assert_eq!(node.chain().await, before);
    })
    .await
    .expect("scenario_e timed out");
}

#[tokio::test]
async fn resolution_is_idempotent_through_node() {
    tokio::time::timeout(Duration::from_secs(30), async {
        let remote = mined_chain("remote", 4);
        let peer = Peer::new("10.0.0.9", 5000);
        let mut chains = HashMap::new();
        chains.insert(peer.clone(), reported(remote.clone()));

        let node = Node::with_fetcher(config("local"), FixedPeers { chains }).unwrap();
        node.register_peers(&["http://10.0.0.9:5000"]).unwrap();

        let first = node.resolve().await;
        assert!(first.replaced);
        assert_eq!(node.chain().await, remote);

        let second = node.resolve().await;
        assert!(!second.replaced);
        assert_eq!(node.chain().await, remote);

        // Mining continues on top of the adopted chain.
        let block = node.mine().await.unwrap();
        assert_eq!(block.index, 5);
        assert!(node.is_valid().await);
    })
    .await
    .expect("resolution_is_idempotent_through_node timed out");
}
