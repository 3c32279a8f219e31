//! Periodic synchronization with known peers
//!
//! Every interval the node asks each known peer for its status, pulls any
//! blocks it is missing, merges the peer's known-peers list into its own and
//! announces itself to peers that do not list it yet. A peer that answers
//! is marked active; one that fails is marked inactive and tried again on
//! the next interval.

use crate::error::{ChainError, Result};
use crate::network::{GossipTxReq, PeerClient, PeerNode, StatusRes};
use crate::node::{shutdown_signal, ChainTip, Node};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one pass over the known peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub peers_reached: usize,
    pub peers_failed: usize,
    pub blocks_committed: usize,
}

pub async fn run_sync_loop(node: Arc<Node>, shutdown: watch::Receiver<bool>) {
    let mut ticker = time::interval(node.config().sync_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_signal(shutdown.clone()) => break,
            _ = ticker.tick() => {
                let stats = sync_once(&node).await;
                debug!(
                    "Sync pass: {} peers reached, {} failed, {} blocks committed",
                    stats.peers_reached, stats.peers_failed, stats.blocks_committed
                );
            }
        }
    }
    debug!("Sync loop stopped");
}

/// Runs one exchange with every known peer, active or not.
pub async fn sync_once(node: &Node) -> SyncStats {
    let mut stats = SyncStats::default();
    let me = node.me().tcp_address();

    for peer in node.known_peers().all() {
        let addr = peer.tcp_address();
        if addr == me {
            continue;
        }

        match sync_with_peer(node, &peer).await {
            Ok(committed) => {
                if !peer.is_active {
                    info!("Peer {} is reachable", addr);
                }
                node.known_peers().set_active(&addr, true);
                stats.peers_reached += 1;
                stats.blocks_committed += committed;
            }
            Err(e) => {
                warn!("Sync with peer {} failed: {}", addr, e);
                node.known_peers().set_active(&addr, false);
                stats.peers_failed += 1;
            }
        }
    }

    stats
}

/// Returns the number of blocks committed from `peer`.
///
/// Blocks the ledger refuses are logged and do not fail the exchange.
/// Blocks before the refused one stay committed and are counted.
async fn sync_with_peer(node: &Node, peer: &PeerNode) -> Result<usize> {
    let status = node.client().status(peer).await?;

    let committed = if needs_blocks(&node.tip(), &status) {
        let from = node.tip().next_block_number;
        let blocks = node.client().blocks_from(peer, from).await?;
        let outcome = node.commit_synced_blocks(&blocks).await;
        match outcome.error {
            Some(e) if e.is_validation() => {
                warn!("Rejected blocks from peer {}: {}", peer.tcp_address(), e)
            }
            Some(e) => error!("Failed to commit blocks from peer {}: {}", peer.tcp_address(), e),
            None => {}
        }
        outcome.committed
    } else {
        0
    };

    merge_known_peers(node, &status);

    if !status.peers_known.contains_key(&node.me().tcp_address()) {
        join(node, peer).await?;
    }

    Ok(committed)
}

/// Whether the peer has blocks this node lacks.
///
/// A pre-genesis node pulls from any peer with a genesis; otherwise the
/// peer must be strictly ahead.
pub fn needs_blocks(local: &ChainTip, peer: &StatusRes) -> bool {
    peer.has_genesis && (!local.has_genesis || peer.block_number > local.block_number)
}

/// Adds the peer's unseen peers as inactive. Returns how many were new.
pub fn merge_known_peers(node: &Node, status: &StatusRes) -> usize {
    let me = node.me().tcp_address();
    let mut added = 0;
    for (addr, peer) in &status.peers_known {
        if *addr == me {
            continue;
        }
        let candidate = PeerNode {
            is_active: false,
            ..peer.clone()
        };
        if node.known_peers().add_if_absent(candidate) {
            info!("Found new peer {}", addr);
            added += 1;
        }
    }
    added
}

async fn join(node: &Node, peer: &PeerNode) -> Result<()> {
    node.client().join(peer, node.me()).await?;
    info!("Joined peer {}", peer.tcp_address());
    Ok(())
}

/// Forwards `req` to each of `targets`. Failures are logged only.
pub async fn gossip_tx(client: PeerClient, targets: Vec<PeerNode>, req: GossipTxReq) {
    for peer in targets {
        match client.gossip_tx(&peer, &req).await {
            Ok(()) => debug!("Gossiped tx {} to {}", req.tx.hash_str(), peer.tcp_address()),
            Err(ChainError::DuplicateTransaction(hash)) => {
                debug!("Peer {} already has tx {}", peer.tcp_address(), hash)
            }
            Err(e) => warn!("Failed to gossip tx to {}: {}", peer.tcp_address(), e),
        }
    }
}
