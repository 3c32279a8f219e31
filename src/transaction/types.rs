/// Transaction types for the ledger
use crate::blockchain::core::chain::write_field;
use crate::blockchain::Hash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Tag marking a transaction as a miner reward.
pub const REWARD_DATA: &str = "reward";

/// Opaque account identifier. Two accounts are the same iff their strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(String);

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Account(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Account {
    fn from(s: &str) -> Self {
        Account(s.to_string())
    }
}

impl From<String> for Account {
    fn from(s: String) -> Self {
        Account(s)
    }
}

/// A value transfer between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub from: Account,
    pub to: Account,
    pub value: u64,
    pub data: String,
    /// Unix timestamp in seconds.
    pub time: u64,
}

impl Tx {
    /// Creates a transaction stamped with the current wall-clock time.
    pub fn new(
        from: impl Into<Account>,
        to: impl Into<Account>,
        value: u64,
        data: impl Into<String>,
    ) -> Self {
        Self::with_time(from, to, value, data, chrono::Utc::now().timestamp() as u64)
    }

    pub fn with_time(
        from: impl Into<Account>,
        to: impl Into<Account>,
        value: u64,
        data: impl Into<String>,
        time: u64,
    ) -> Self {
        Tx {
            from: from.into(),
            to: to.into(),
            value,
            data: data.into(),
            time,
        }
    }

    /// A reward tx credits `to` without debiting anyone.
    pub fn is_reward(&self) -> bool {
        self.data == REWARD_DATA
    }

    /// Transaction identity: SHA-256 over the canonical field encoding.
    pub fn hash(&self) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(b"tx");
        write_field(&mut hasher, self.from.as_str().as_bytes());
        write_field(&mut hasher, self.to.as_str().as_bytes());
        hasher.update(self.value.to_le_bytes());
        write_field(&mut hasher, self.data.as_bytes());
        hasher.update(self.time.to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        Hash::from(digest)
    }

    pub fn hash_str(&self) -> String {
        self.hash().to_hex()
    }
}
