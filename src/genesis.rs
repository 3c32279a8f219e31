//! Genesis file: chain identity and the initial balance map

use crate::blockchain::Balances;
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const DEFAULT_GENESIS_JSON: &str = r#"{
  "genesis_time": "2020-09-30T00:00:00.000000000Z",
  "chain_id": "the-blockchain-bar-ledger",
  "balances": {
    "jrhodes": 1000000
  }
}
"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genesis {
    #[serde(default)]
    pub genesis_time: String,
    pub chain_id: String,
    pub balances: Balances,
}

pub fn load(path: &Path) -> Result<Genesis> {
    let content = fs::read_to_string(path)
        .map_err(|e| ChainError::ConfigError(format!("Failed to read genesis {:?}: {}", path, e)))?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Genesis> {
    serde_json::from_str(content)
        .map_err(|e| ChainError::ConfigError(format!("Invalid genesis file: {}", e)))
}

pub fn write_default(path: &Path) -> Result<()> {
    fs::write(path, DEFAULT_GENESIS_JSON)?;
    Ok(())
}
