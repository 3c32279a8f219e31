//! Configuration management for the ledger node

use crate::blockchain::MAX_DIFFICULTY;
use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `ip:port` entries seeded into the known-peers set.
    #[serde(default = "default_bootstrap_peers")]
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_account")]
    pub bootstrap_account: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    /// Reward recipient for blocks mined by this node.
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_mining_enabled")]
    pub enabled: bool,
    /// Value of the reward tx appended to every mined block; 0 disables it.
    #[serde(default = "default_block_reward")]
    pub block_reward: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    /// Leading zero hex digits required of a block hash.
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_mining_interval")]
    pub mining_interval_secs: u64,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            bootstrap_peers: default_bootstrap_peers(),
            bootstrap_account: default_account(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            account: default_account(),
            enabled: default_mining_enabled(),
            block_reward: default_block_reward(),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            mining_interval_secs: default_mining_interval(),
            sync_interval_secs: default_sync_interval(),
            peer_timeout_secs: default_peer_timeout(),
        }
    }
}

impl Config {
    pub fn data_dir(&self) -> PathBuf {
        expand_path(&self.database.data_dir)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.ip, self.network.port)
    }

    pub fn mining_interval(&self) -> Duration {
        Duration::from_secs(self.consensus.mining_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.consensus.sync_interval_secs)
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.consensus.peer_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.data_dir.trim().is_empty() {
            return Err(ChainError::ConfigError("database.data_dir must be set".to_string()));
        }
        if self.miner.account.trim().is_empty() {
            return Err(ChainError::ConfigError("miner.account must be set".to_string()));
        }
        if self.consensus.difficulty == 0 || self.consensus.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::ConfigError(format!(
                "consensus.difficulty must be between 1 and {}",
                MAX_DIFFICULTY
            )));
        }
        if self.consensus.mining_interval_secs == 0 || self.consensus.sync_interval_secs == 0 {
            return Err(ChainError::ConfigError(
                "mining and sync intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads `path` if given, otherwise the built-in defaults, and validates the result.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config: Config = match path {
        Some(path) => {
            let config_str = fs::read_to_string(path).map_err(|e| {
                ChainError::ConfigError(format!("Failed to read config {:?}: {}", path, e))
            })?;
            toml::from_str(&config_str)
                .map_err(|e| ChainError::ConfigError(format!("Invalid config {:?}: {}", path, e)))?
        }
        None => Config::default(),
    };

    config.validate()?;
    Ok(config)
}

/// Replaces a leading `~/` with the home directory. Values with a scheme
/// or user prefix are left alone.
pub fn expand_path(p: &str) -> PathBuf {
    if p.contains("://") {
        return PathBuf::from(p);
    }
    if let Some(rest) = p.strip_prefix("~/").or_else(|| p.strip_prefix("~\\")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(p)
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_bootstrap_peers() -> Vec<String> {
    vec!["127.0.0.1:8080".to_string()]
}

fn default_account() -> String {
    "jrhodes".to_string()
}

fn default_data_dir() -> String {
    "~/.tbb".to_string()
}

fn default_mining_enabled() -> bool {
    true
}

fn default_block_reward() -> u64 {
    100
}

fn default_difficulty() -> u32 {
    4
}

fn default_mining_interval() -> u64 {
    10
}

fn default_sync_interval() -> u64 {
    45
}

fn default_peer_timeout() -> u64 {
    5
}
