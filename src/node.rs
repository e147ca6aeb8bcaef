//! Shared node handle used by the request boundary.
//!
//! The ledger is the only shared mutable state and sits behind a single
//! `RwLock`. Mining reads the chain tip, releases the lock, searches for a
//! proof on the blocking pool, then re-acquires the lock and commits only if
//! the tip is unchanged. Resolution fetches peer chains with no lock held.

use crate::blockchain::{Block, Chain, Ledger};
use crate::config::Config;
use crate::consensus::{ConsensusResolver, Resolution};
use crate::error::ChainError;
use crate::miner::{CancelOnDrop, ProofOfWork};
use crate::network::{ChainFetcher, HttpChainFetcher, Peer, PeerSet};
use crate::transaction::Transaction;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Ready,
    ShuttingDown,
}

/// Random 32-character hex identifier for nodes configured without one.
pub fn generate_node_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

pub struct Node<F = HttpChainFetcher> {
    pub(crate) config: Config,
    pub(crate) ledger: Arc<RwLock<Ledger>>,
    pub peers: PeerSet,
    resolver: ConsensusResolver<F>,
    pow: ProofOfWork,
    shutdown: watch::Sender<bool>,
}

impl Node<HttpChainFetcher> {
    /// Build a node that fetches peer chains over HTTP.
    pub fn from_config(config: Config) -> Result<Self, ChainError> {
        let fetcher = HttpChainFetcher::new(config.consensus.peer_timeout())?;
        Self::with_fetcher(config, fetcher)
    }
}

impl<F: ChainFetcher> Node<F> {
    pub fn with_fetcher(config: Config, fetcher: F) -> Result<Self, ChainError> {
        config.validate()?;

        let node_id = if config.node.identifier.trim().is_empty() {
            generate_node_id()
        } else {
            config.node.identifier.trim().to_string()
        };
        let pow = config.miner.pow();
        let ledger = Ledger::new(node_id, pow);

        let peers = PeerSet::new();
        peers.register_many(&config.network.bootstrap_peers)?;

        let resolver =
            ConsensusResolver::new(Arc::new(fetcher), pow, config.consensus.resolve_options());
        let (shutdown, _) = watch::channel(false);

        info!(
            node_id = %ledger.node_id(),
            difficulty = pow.difficulty(),
            peers = peers.len(),
            "node initialised"
        );

        Ok(Self {
            config,
            ledger: Arc::new(RwLock::new(ledger)),
            peers,
            resolver,
            pow,
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn node_id(&self) -> String {
        self.ledger.read().await.node_id().to_string()
    }

    pub fn state(&self) -> NodeState {
        if *self.shutdown.borrow() {
            NodeState::ShuttingDown
        } else {
            NodeState::Ready
        }
    }

    /// Cancel in-flight proof searches and refuse new ones.
    pub fn shutdown(&self) {
        info!("node shutting down");
        self.shutdown.send_replace(true);
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> u64 {
        self.ledger.write().await.submit_transaction(tx)
    }

    pub async fn chain(&self) -> Chain {
        self.ledger.read().await.chain()
    }

    pub async fn len(&self) -> usize {
        self.ledger.read().await.len()
    }

    pub async fn pending(&self) -> Vec<Transaction> {
        self.ledger.read().await.pending().to_vec()
    }

    /// Run the chain validator over the current chain.
    pub async fn is_valid(&self) -> bool {
        self.ledger.read().await.is_valid()
    }

    pub fn register_peers<S: AsRef<str>>(&self, addresses: &[S]) -> Result<Vec<Peer>, ChainError> {
        self.peers.register_many(addresses)
    }

    /// Forge the next block.
    ///
    /// If another commit lands while the proof is being searched, the proof
    /// is stale; the search is retried against the new tip up to
    /// `miner.max_stale_retries` times before [`ChainError::StaleMine`] is
    /// returned. Transactions submitted during the search stay buffered and
    /// go into whichever block commits next.
    pub async fn mine(&self) -> Result<Block, ChainError> {
        let mut stale_retries = 0;
        loop {
            if self.state() == NodeState::ShuttingDown {
                return Err(ChainError::MiningCancelled);
            }

            let tip = self.ledger.read().await.tip();
            let proof = self.search_proof(tip.proof).await?;

            match self.ledger.write().await.commit_proof(&tip.hash, proof) {
                Ok(block) => return Ok(block),
                Err(ChainError::StaleMine) if stale_retries < self.config.miner.max_stale_retries => {
                    stale_retries += 1;
                    warn!(
                        tip_index = tip.index,
                        attempt = stale_retries,
                        "chain advanced during proof search, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn search_proof(&self, last_proof: u64) -> Result<u64, ChainError> {
        let cancel = Arc::new(AtomicBool::new(false));
        // Stops the blocking search on every exit, including this future being dropped.
        let _stop = CancelOnDrop::new(Arc::clone(&cancel));
        let search = self.pow.spawn_proof_search(last_proof, cancel);
        let mut shutdown = self.shutdown.subscribe();

        let found = tokio::select! {
            joined = search => match joined {
                Ok(found) => found,
                Err(e) => {
                    error!(error = %e, "proof search task failed");
                    None
                }
            },
            _ = shutdown.wait_for(|stopped| *stopped) => None,
            _ = deadline(self.config.miner.timeout()) => {
                warn!(last_proof, "proof search timed out");
                None
            }
        };

        found.ok_or(ChainError::MiningCancelled)
    }

    /// Ask every peer for its chain and adopt the longest valid one that is
    /// strictly longer than ours.
    pub async fn resolve(&self) -> Resolution {
        let peers = self.peers.list();
        let local_length = self.ledger.read().await.len();

        let Some((peer, candidate)) = self.resolver.find_longer_chain(&peers, local_length).await
        else {
            return Resolution {
                replaced: false,
                chain: self.chain().await,
            };
        };

        let mut ledger = self.ledger.write().await;
        // A local mine may have committed while peers were being fetched.
        if candidate.len() <= ledger.len() {
            info!(peer = %peer, "local chain caught up during resolution, keeping it");
            return Resolution {
                replaced: false,
                chain: ledger.chain(),
            };
        }

        info!(peer = %peer, length = candidate.len(), "chain replaced by peer chain");
        ledger.replace_chain(candidate.clone());
        Resolution {
            replaced: true,
            chain: candidate,
        }
    }
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}
