//! Peer identities, the peer set, and fetching chains from peers.
//!
//! Peers are identified by `host:port`. Addresses arrive URL-like
//! (`http://192.168.0.5:5000`) or bare (`192.168.0.5:5000`) and are
//! normalised before they enter the [`PeerSet`], which deduplicates them.

use crate::blockchain::Chain;
use crate::error::ChainError;
use parking_lot::RwLock;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// A remote ledger replica.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Reduce a URL-like address to its `host:port` identity.
///
/// Bare `host:port` is read as `http://host:port`. A URL without an explicit
/// port takes its scheme's default. Only `http` and `https` are accepted.
pub fn parse_peer_address(address: &str) -> Result<Peer, ChainError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(ChainError::InvalidPeerAddress(
            "address is empty".to_string(),
        ));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ChainError::InvalidPeerAddress(format!("{}: {}", address, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ChainError::InvalidPeerAddress(format!(
            "{}: unsupported scheme '{}'",
            address,
            url.scheme()
        )));
    }

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => {
            return Err(ChainError::InvalidPeerAddress(format!(
                "{}: missing host",
                address
            )))
        }
    };
    let port = url
        .port_or_known_default()
        .ok_or_else(|| ChainError::InvalidPeerAddress(format!("{}: missing port", address)))?;

    Ok(Peer::new(host, port))
}

/// Known peers, deduplicated by normalised address.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: RwLock<BTreeSet<Peer>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalise and add one address. Re-registering a known peer is a no-op.
    pub fn register(&self, address: &str) -> Result<Peer, ChainError> {
        let peer = parse_peer_address(address)?;
        if self.peers.write().insert(peer.clone()) {
            info!(peer = %peer, "peer registered");
        }
        Ok(peer)
    }

    /// Add a batch of addresses. Nothing is added unless every address
    /// parses.
    pub fn register_many<S: AsRef<str>>(&self, addresses: &[S]) -> Result<Vec<Peer>, ChainError> {
        let parsed = addresses
            .iter()
            .map(|a| parse_peer_address(a.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut peers = self.peers.write();
        for peer in &parsed {
            if peers.insert(peer.clone()) {
                info!(peer = %peer, "peer registered");
            }
        }
        Ok(parsed)
    }

    /// Snapshot of all peers, ordered by address.
    pub fn list(&self) -> Vec<Peer> {
        self.peers.read().iter().cloned().collect()
    }

    pub fn contains(&self, peer: &Peer) -> bool {
        self.peers.read().contains(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

/// A peer's answer to "what is your chain": the body of its `GET /chain`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerChain {
    pub length: usize,
    pub chain: Chain,
}

/// Source of peer chains for the consensus resolver.
pub trait ChainFetcher: Send + Sync + 'static {
    fn fetch_chain(
        &self,
        peer: &Peer,
    ) -> impl Future<Output = Result<PeerChain, ChainError>> + Send;
}

/// Fetches chains over HTTP from `GET http://{peer}/chain`.
#[derive(Debug, Clone)]
pub struct HttpChainFetcher {
    client: Client,
}

impl HttpChainFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl ChainFetcher for HttpChainFetcher {
    async fn fetch_chain(&self, peer: &Peer) -> Result<PeerChain, ChainError> {
        let url = format!("http://{}/chain", peer.addr());
        debug!(peer = %peer, "fetching chain");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::PeerUnreachable(format!(
                "{} answered {}",
                peer, status
            )));
        }

        response
            .json::<PeerChain>()
            .await
            .map_err(|e| ChainError::InvalidChain(format!("{} sent a malformed chain: {}", peer, e)))
    }
}
