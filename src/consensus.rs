//! Longest-valid-chain consensus.
//!
//! Every known peer is asked for its chain. A peer's chain is adopted only if
//! it is strictly longer than the best seen so far (starting from the local
//! length) and passes full validation. Equal lengths never displace an
//! earlier candidate, so two equally long forks do not cause flapping.

use crate::blockchain::{is_valid_chain, Block, Chain};
use crate::error::ChainError;
use crate::miner::ProofOfWork;
use crate::network::{ChainFetcher, Peer, PeerChain};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Upper bound on a single peer fetch, measured once it starts.
    pub peer_timeout: Duration,
    /// Peers fetched at the same time.
    pub max_concurrent_fetches: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            peer_timeout: DEFAULT_PEER_TIMEOUT,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

/// Outcome of a resolution round.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub replaced: bool,
    /// The adopted chain when `replaced`, otherwise the local chain.
    pub chain: Chain,
}

/// Pick the first strictly-longer valid chain, scanning `candidates` in
/// order. Failed fetches and chains whose reported length disagrees with
/// their contents are skipped.
pub fn select_longest_valid<I>(
    candidates: I,
    local_length: usize,
    pow: &ProofOfWork,
) -> Option<(Peer, Chain)>
where
    I: IntoIterator<Item = (Peer, Result<PeerChain, ChainError>)>,
{
    let mut max_length = local_length;
    let mut winner = None;

    for (peer, outcome) in candidates {
        let PeerChain { length, chain } = match outcome {
            Ok(peer_chain) => peer_chain,
            Err(e) => {
                warn!(peer = %peer, error = %e, "skipping peer");
                continue;
            }
        };

        if length != chain.len() {
            debug!(peer = %peer, reported = length, actual = chain.len(), "length mismatch");
            continue;
        }

        if length > max_length && is_valid_chain(&chain, pow) {
            max_length = length;
            winner = Some((peer, chain));
        }
    }

    winner
}

pub struct ConsensusResolver<F> {
    fetcher: Arc<F>,
    pow: ProofOfWork,
    options: ResolveOptions,
}

impl<F: ChainFetcher> ConsensusResolver<F> {
    pub fn new(fetcher: Arc<F>, pow: ProofOfWork, options: ResolveOptions) -> Self {
        Self {
            fetcher,
            pow,
            options,
        }
    }

    pub fn options(&self) -> ResolveOptions {
        self.options
    }

    /// Fetch every peer's chain with bounded concurrency and a per-peer
    /// timeout. Results come back ordered by peer address, whatever order
    /// the fetches completed in.
    pub async fn fetch_all(&self, peers: &[Peer]) -> Vec<(Peer, Result<PeerChain, ChainError>)> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_fetches.max(1)));
        let mut join_set = JoinSet::new();

        for peer in peers.iter().cloned() {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.options.peer_timeout;

            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        match tokio::time::timeout(timeout, fetcher.fetch_chain(&peer)).await {
                            Ok(result) => result,
                            Err(_) => Err(ChainError::PeerUnreachable(format!(
                                "{} timed out after {:?}",
                                peer, timeout
                            ))),
                        }
                    }
                    Err(_) => Err(ChainError::PeerUnreachable(
                        "fetch pool closed".to_string(),
                    )),
                };
                (peer, result)
            });
        }

        let mut results = Vec::with_capacity(peers.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => warn!(error = %e, "peer fetch task failed"),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Query `peers` and return the winning peer and chain, if any peer holds
    /// a valid chain longer than `local_length`.
    pub async fn find_longer_chain(
        &self,
        peers: &[Peer],
        local_length: usize,
    ) -> Option<(Peer, Chain)> {
        let results = self.fetch_all(peers).await;
        select_longest_valid(results, local_length, &self.pow)
    }

    /// Run one resolution round against `local`.
    pub async fn resolve_conflicts(&self, peers: &[Peer], local: &[Block]) -> Resolution {
        match self.find_longer_chain(peers, local.len()).await {
            Some((peer, chain)) => {
                info!(peer = %peer, length = chain.len(), "adopting longer chain");
                Resolution {
                    replaced: true,
                    chain,
                }
            }
            None => Resolution {
                replaced: false,
                chain: local.to_vec(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Ledger;
    use crate::transaction::Transaction;
    use std::collections::HashMap;

    fn pow() -> ProofOfWork {
        ProofOfWork::new(2)
    }

    fn chain_of(length: usize, owner: &str) -> Chain {
        let mut ledger = Ledger::new(owner, pow());
        while ledger.len() < length {
            ledger.submit_transaction(Transaction::new(owner, "x", 1.0));
            ledger.mine();
        }
        ledger.chain()
    }

    fn answer(chain: Chain) -> Result<PeerChain, ChainError> {
        Ok(PeerChain {
            length: chain.len(),
            chain,
        })
    }

    struct MapFetcher {
        chains: HashMap<Peer, Chain>,
        delay: Duration,
    }

    impl ChainFetcher for MapFetcher {
        async fn fetch_chain(&self, peer: &Peer) -> Result<PeerChain, ChainError> {
            tokio::time::sleep(self.delay).await;
            match self.chains.get(peer) {
                Some(chain) => answer(chain.clone()),
                None => Err(ChainError::PeerUnreachable(peer.addr())),
            }
        }
    }

    #[test]
    fn test_equal_length_does_not_displace_first() {
        let first = chain_of(3, "first");
        let second = chain_of(3, "second");
        let winner = select_longest_valid(
            vec![
                (Peer::new("a", 1), answer(first.clone())),
                (Peer::new("b", 1), answer(second)),
            ],
            1,
            &pow(),
        )
        .unwrap();
        assert_eq!(winner.0, Peer::new("a", 1));
        assert_eq!(winner.1, first);
    }

    #[test]
    fn test_equal_to_local_is_not_adopted() {
        let chain = chain_of(3, "peer");
        assert!(select_longest_valid(vec![(Peer::new("a", 1), answer(chain))], 3, &pow()).is_none());
    }

    #[test]
    fn test_length_mismatch_is_ignored() {
        let chain = chain_of(2, "peer");
        let lying = Ok(PeerChain { length: 9, chain });
        assert!(select_longest_valid(vec![(Peer::new("a", 1), lying)], 1, &pow()).is_none());
    }

    #[test]
    fn test_longer_valid_beats_earlier_shorter() {
        let short = chain_of(2, "short");
        let long = chain_of(4, "long");
        let (_, chain) = select_longest_valid(
            vec![
                (Peer::new("a", 1), answer(short)),
                (Peer::new("b", 1), Err(ChainError::PeerUnreachable("b".into()))),
                (Peer::new("c", 1), answer(long.clone())),
            ],
            1,
            &pow(),
        )
        .unwrap();
        assert_eq!(chain, long);
    }

    #[tokio::test]
    async fn test_slow_peer_times_out_without_blocking_others() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let mut chains = HashMap::new();
            chains.insert(Peer::new("fast", 1), chain_of(3, "fast"));
            let fast = Arc::new(MapFetcher {
                chains,
                delay: Duration::from_millis(10),
            });

            struct Hung;
            impl ChainFetcher for Hung {
                async fn fetch_chain(&self, _peer: &Peer) -> Result<PeerChain, ChainError> {
                    std::future::pending().await
                }
            }

            let options = ResolveOptions {
                peer_timeout: Duration::from_millis(100),
                max_concurrent_fetches: 2,
            };

            let hung = ConsensusResolver::new(Arc::new(Hung), pow(), options);
            let results = hung.fetch_all(&[Peer::new("slow", 1)]).await;
            assert!(matches!(results[0].1, Err(ChainError::PeerUnreachable(_))));

            let resolver = ConsensusResolver::new(fast, pow(), options);
            let local = chain_of(1, "local");
            let resolution = resolver
                .resolve_conflicts(&[Peer::new("fast", 1), Peer::new("gone", 1)], &local)
                .await;
            assert!(resolution.replaced);
            assert_eq!(resolution.chain.len(), 3);
        })
        .await
        .expect("test_slow_peer_times_out_without_blocking_others timed out");
    }

    #[tokio::test]
    async fn test_fetch_all_orders_by_peer() {
        tokio::time::timeout(Duration::from_secs(10), async {
            let peers: Vec<Peer> = (0..5).rev().map(|i| Peer::new("p", 9000 + i)).collect();
            let chains = peers
                .iter()
                .map(|p| (p.clone(), chain_of(1, "g")))
                .collect();
            let resolver = ConsensusResolver::new(
                Arc::new(MapFetcher {
                    chains,
                    delay: Duration::from_millis(1),
                }),
                pow(),
                ResolveOptions {
                    max_concurrent_fetches: 1,
                    ..ResolveOptions::default()
                },
            );
            let results = resolver.fetch_all(&peers).await;
            let ports: Vec<u16> = results.iter().map(|(p, _)| p.port).collect();
            assert_eq!(ports, vec![9000, 9001, 9002, 9003, 9004]);
        })
        .await
        .expect("test_fetch_all_orders_by_peer timed out");
    }
}
