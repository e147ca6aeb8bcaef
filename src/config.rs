//! Configuration management for Tallychain

use crate::consensus::ResolveOptions;
use crate::error::ChainError;
use crate::miner::{ProofOfWork, DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            bind: default_bind(),
            bootstrap_peers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    /// Recipient of mining rewards. Empty means a random id per process.
    #[serde(default)]
    pub identifier: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
    #[serde(default = "default_max_stale_retries")]
    pub max_stale_retries: u32,
    /// Zero disables the search timeout.
    #[serde(default)]
    pub timeout_ms: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            max_stale_retries: default_max_stale_retries(),
            timeout_ms: 0,
        }
    }
}

impl MinerConfig {
    pub fn pow(&self) -> ProofOfWork {
        ProofOfWork::new(self.difficulty)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            peer_timeout_ms: default_peer_timeout_ms(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

impl ConsensusConfig {
    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_timeout_ms)
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            peer_timeout: self.peer_timeout(),
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.miner.difficulty == 0 || self.miner.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::Config(format!(
                "miner.difficulty must be between 1 and {}",
                MAX_DIFFICULTY
            )));
        }
        if self.consensus.max_concurrent_fetches == 0 {
            return Err(ChainError::Config(
                "consensus.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }
        if self.consensus.peer_timeout_ms == 0 {
            return Err(ChainError::Config(
                "consensus.peer_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.network.bind.trim().is_empty() {
            return Err(ChainError::Config("network.bind must be set".to_string()));
        }
        Ok(())
    }
}

/// Load `config.toml` from the working directory.
pub fn load_config() -> Result<Config, ChainError> {
    load_config_from(DEFAULT_CONFIG_PATH)
}

/// Load and validate a config file. A missing or empty file yields defaults.
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let config_str = match fs::read_to_string(path.as_ref()) {
        Ok(s) => s,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let config: Config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)?
    };

    config.validate()?;
    Ok(config)
}

fn default_api_port() -> u16 {
    5000
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_difficulty() -> usize {
    DEFAULT_DIFFICULTY
}

fn default_max_stale_retries() -> u32 {
    3
}

fn default_peer_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrent_fetches() -> usize {
    8
}
