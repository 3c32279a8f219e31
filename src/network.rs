//! Peer bookkeeping, wire messages and the HTTP client for talking to peers
//!
//! Peers are addressed by `ip:port`. Entries in [`KnownPeers`] are only ever
//! added or flipped between active and inactive, never removed, so a peer
//! that drops off the network is picked up again once it answers.

use crate::blockchain::{Balances, Block, Hash};
use crate::error::{ChainError, Result};
use crate::transaction::{Account, Tx};
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const ENDPOINT_STATUS: &str = "/node/status";
pub const ENDPOINT_SYNC: &str = "/node/sync";
pub const ENDPOINT_SYNC_QUERY_KEY_FROM_BLOCK: &str = "fromBlock";
pub const ENDPOINT_GOSSIP_TX: &str = "/node/tx";
pub const ENDPOINT_ADD_PEER: &str = "/node/peer";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNode {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub is_bootstrap: bool,
    #[serde(default)]
    pub account: Account,
    /// Whether the last exchange with this peer succeeded.
    #[serde(default)]
    pub is_active: bool,
}

impl PeerNode {
    pub fn new(ip: impl Into<String>, port: u16, is_bootstrap: bool, account: Account, is_active: bool) -> Self {
        PeerNode {
            ip: ip.into(),
            port,
            is_bootstrap,
            account,
            is_active,
        }
    }

    /// Parses an `ip:port` string into an inactive peer.
    pub fn parse(addr: &str, account: Account, is_bootstrap: bool) -> Result<Self> {
        let (ip, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| ChainError::ConfigError(format!("Peer address {:?} is not ip:port", addr)))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| ChainError::ConfigError(format!("Invalid port in {:?}: {}", addr, e)))?;
        if ip.is_empty() {
            return Err(ChainError::ConfigError(format!("Peer address {:?} has no host", addr)));
        }
        Ok(PeerNode::new(ip, port, is_bootstrap, account, false))
    }

    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.tcp_address())
    }
}

/// Concurrency-safe set of peers keyed by `ip:port`.
#[derive(Debug, Default)]
pub struct KnownPeers {
    peers: RwLock<HashMap<String, PeerNode>>,
}

impl KnownPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `peer` unless its address is already known. Returns whether it was added.
    pub fn add_if_absent(&self, peer: PeerNode) -> bool {
        let mut peers = self.peers.write();
        let addr = peer.tcp_address();
        if peers.contains_key(&addr) {
            return false;
        }
        peers.insert(addr, peer);
        true
    }

    /// Flips the active flag of a known peer. Unknown addresses are ignored.
    pub fn set_active(&self, addr: &str, active: bool) {
        if let Some(peer) = self.peers.write().get_mut(addr) {
            peer.is_active = active;
        }
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers.read().contains_key(addr)
    }

    pub fn get(&self, addr: &str) -> Option<PeerNode> {
        self.peers.read().get(addr).cloned()
    }

    pub fn all(&self) -> Vec<PeerNode> {
        let mut peers: Vec<PeerNode> = self.peers.read().values().cloned().collect();
        peers.sort_by_key(|peer| peer.tcp_address());
        peers
    }

    pub fn active(&self) -> Vec<PeerNode> {
        self.all().into_iter().filter(|peer| peer.is_active).collect()
    }

    pub fn to_map(&self) -> HashMap<String, PeerNode> {
        self.peers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

// ============================================================================
// Wire messages
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRes {
    pub block_hash: Hash,
    pub block_number: u64,
    pub has_genesis: bool,
    pub peers_known: HashMap<String, PeerNode>,
    pub pending_txs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRes {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancesRes {
    pub block_hash: Hash,
    pub balances: Balances,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxAddReq {
    pub from: Account,
    pub to: Account,
    pub value: u64,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxAddRes {
    pub success: bool,
    pub hash: String,
}

/// A pending tx forwarded between nodes. `origin` is the sender's `ip:port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipTxReq {
    pub tx: Tx,
    #[serde(default)]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPeerRes {
    pub success: bool,
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for the peer endpoints. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(PeerClient { http })
    }

    pub async fn status(&self, peer: &PeerNode) -> Result<StatusRes> {
        let url = format!("{}{}", peer.base_url(), ENDPOINT_STATUS);
        let res = self.http.get(&url).send().await?.error_for_status()?;
        Ok(res.json::<StatusRes>().await?)
    }

    pub async fn blocks_from(&self, peer: &PeerNode, from: u64) -> Result<Vec<Block>> {
        let url = format!("{}{}", peer.base_url(), ENDPOINT_SYNC);
        let res = self
            .http
            .get(&url)
            .query(&[(ENDPOINT_SYNC_QUERY_KEY_FROM_BLOCK, from)])
            .send()
            .await?
            .error_for_status()?;
        let sync = res.json::<SyncRes>().await?;
        debug!("Fetched {} blocks from {} starting at {}", sync.blocks.len(), peer.tcp_address(), from);
        Ok(sync.blocks)
    }

    /// Forwards a pending tx. A peer that already holds it answers with a
    /// conflict, reported as [`ChainError::DuplicateTransaction`].
    pub async fn gossip_tx(&self, peer: &PeerNode, req: &GossipTxReq) -> Result<()> {
        let url = format!("{}{}", peer.base_url(), ENDPOINT_GOSSIP_TX);
        let res = self.http.post(&url).json(req).send().await?;
        if res.status() == StatusCode::CONFLICT {
            return Err(ChainError::DuplicateTransaction(req.tx.hash_str()));
        }
        res.error_for_status()?;
        Ok(())
    }

    /// Announces `me` to `peer`.
    pub async fn join(&self, peer: &PeerNode, me: &PeerNode) -> Result<()> {
        let url = format!("{}{}", peer.base_url(), ENDPOINT_ADD_PEER);
        let res = self.http.post(&url).json(me).send().await?.error_for_status()?;
        let body = res.json::<AddPeerRes>().await?;
        if !body.success {
            return Err(ChainError::NetworkError(format!(
                "Peer {} refused join",
                peer.tcp_address()
            )));
        }
        Ok(())
    }
}
