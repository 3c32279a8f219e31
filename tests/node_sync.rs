//! Two nodes talking over real HTTP on loopback

use std::sync::Arc;
use std::time::Duration;
use tbb::api;
use tbb::blockchain::{Balances, BlockRecord, Hash};
use tbb::config::Config;
use tbb::miner::{mine, CancellationSignal, PendingBlock};
use tbb::node::{shutdown_signal, Node};
use tbb::persistence::{BlockStore, InMemoryBlockStore};
use tbb::sync::sync_once;
use tbb::transaction::{Account, Tx};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

fn node(port: u16, bootstrap: Vec<String>) -> Arc<Node> {
    node_with_store(port, bootstrap, InMemoryBlockStore::new())
}

fn node_with_store(port: u16, bootstrap: Vec<String>, store: InMemoryBlockStore) -> Arc<Node> {
    let mut config = Config::default();
    config.network.port = port;
    config.network.bootstrap_peers = bootstrap;
    config.consensus.difficulty = 1;
    config.consensus.peer_timeout_secs = 2;

    let mut balances = Balances::new();
    balances.insert(Account::from("jrhodes"), 1_000_000);

    Arc::new(Node::with_store(config, balances, Box::new(store)).unwrap())
}

async fn serve(node: Arc<Node>) -> (String, watch::Sender<bool>, JoinHandle<tbb::error::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(api::serve(listener, node, shutdown_signal(stop_rx)));
    (addr, stop_tx, handle)
}

fn mine_block(parent: Hash, number: u64, txs: Vec<Tx>) -> tbb::blockchain::Block {
    let pending = PendingBlock::new(parent, number, Account::from("jrhodes"), txs);
    mine(&CancellationSignal::new(), &pending, 1).unwrap()
}

#[tokio::test]
async fn test_node_pulls_missing_blocks_and_joins_peer() {
    let a = node(18_080, vec![]);
    let genesis = mine_block(Hash::ZERO, 0, vec![Tx::with_time("jrhodes", "meads", 2000, "", 1)]);
    let child = mine_block(genesis.hash(), 1, vec![Tx::with_time("meads", "jrhodes", 500, "", 2)]);
    assert_eq!(a.commit_synced_blocks(&[genesis, child]).await.committed, 2);
    let (addr, stop, server) = serve(a.clone()).await;

    let b = node(18_081, vec![addr.clone()]);
    let stats = timeout(Duration::from_secs(10), sync_once(&b)).await.unwrap();

    assert_eq!(stats.peers_reached, 1);
    assert_eq!(stats.blocks_committed, 2);
    assert_eq!(b.tip(), a.tip());
    assert_eq!(b.balances().balances, a.balances().balances);
    assert!(b.known_peers().get(&addr).unwrap().is_active);
    assert!(a.known_peers().contains(&b.me().tcp_address()));

    // Already in sync: nothing more to pull.
    let stats = timeout(Duration::from_secs(10), sync_once(&b)).await.unwrap();
    assert_eq!(stats.blocks_committed, 0);

    stop.send(true).unwrap();
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_pending_tx_is_gossiped_to_active_peer() {
    let a = node(18_082, vec![]);
    let (addr, stop, server) = serve(a.clone()).await;

    let b = node(18_083, vec![addr.clone()]);
    timeout(Duration::from_secs(10), sync_once(&b)).await.unwrap();
    assert!(b.known_peers().get(&addr).unwrap().is_active);

    let tx = Tx::with_time("jrhodes", "meads", 7, "", 1);
    b.add_pending_tx(tx.clone(), None).await.unwrap();

    timeout(Duration::from_secs(10), async {
        while !a.mempool().contains(&tx.hash_str()) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("tx was not gossiped in time");

    stop.send(true).unwrap();
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn test_valid_prefix_of_refused_segment_is_counted() {
    let store = InMemoryBlockStore::new();
    let a = node_with_store(18_084, vec![], store.clone());
    let genesis = mine_block(Hash::ZERO, 0, vec![Tx::with_time("jrhodes", "meads", 2000, "", 1)]);
    assert_eq!(a.commit_synced_blocks(&[genesis.clone()]).await.committed, 1);

    // A record A never validated: it overspends, so B refuses it.
    let overspend = mine_block(genesis.hash(), 1, vec![Tx::with_time("meads", "jrhodes", 5000, "", 2)]);
    let mut raw = store.clone();
    raw.append(&BlockRecord::new(overspend)).unwrap();
    let (addr, stop, server) = serve(a.clone()).await;

    let b = node(18_085, vec![addr.clone()]);
    let stats = timeout(Duration::from_secs(10), sync_once(&b)).await.unwrap();

    assert_eq!(stats.peers_reached, 1);
    assert_eq!(stats.peers_failed, 0);
    assert_eq!(stats.blocks_committed, 1);
    assert_eq!(b.tip().block_hash, genesis.hash());
    assert!(b.known_peers().get(&addr).unwrap().is_active);

    stop.send(true).unwrap();
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
}
