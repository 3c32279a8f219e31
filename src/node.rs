//! Node coordinator
//!
//! [`Node`] owns the ledger, the mempool and the known-peer set and runs
//! three loops on top of them: mining, sync and the HTTP API.
//!
//! Every ledger mutation goes through the commit gate (`ledger`, an async
//! mutex). Committed txs are removed from the mempool while the gate is
//! held, so a tx is never pending and committed at the same time. Status
//! reads are served from a snapshot refreshed after each commit and never
//! wait on the gate.
//!
//! The mining loop is a two-state machine:
//!
//! ```text
//!   Idle --(tick, mempool non-empty)--> Mining
//!   Mining --(block found, committed)--> Idle
//!   Mining --(synced block, cancel + reconcile)--> Idle
//! ```
//!
//! Leaving `Mining` resets the tick, so the next attempt starts at once on
//! the new tip.

use crate::blockchain::{Balances, Block, Hash, LedgerState, SegmentCommit};
use crate::config::Config;
use crate::error::{ChainError, Result};
use crate::genesis;
use crate::mempool::Mempool;
use crate::miner::{self, CancellationSignal, PendingBlock};
use crate::network::{BalancesRes, GossipTxReq, KnownPeers, PeerClient, PeerNode, StatusRes};
use crate::persistence::{self, BlockStore, FileBlockStore};
use crate::transaction::{application_order, Account, Tx, REWARD_DATA};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::{self, JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningState {
    Idle,
    /// An attempt on block `number` is in flight.
    Mining { number: u64 },
}

/// Latest committed tip, cheap to copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTip {
    pub block_hash: Hash,
    pub block_number: u64,
    pub has_genesis: bool,
    pub next_block_number: u64,
}

#[derive(Debug, Clone)]
struct LedgerSnapshot {
    tip: ChainTip,
    balances: Balances,
}

impl LedgerSnapshot {
    fn of(ledger: &LedgerState) -> Self {
        LedgerSnapshot {
            tip: ChainTip {
                block_hash: ledger.latest_block_hash(),
                block_number: ledger.latest_block().map_or(0, |b| b.header.number),
                has_genesis: ledger.has_genesis(),
                next_block_number: ledger.next_block_number(),
            },
            balances: ledger.balances().clone(),
        }
    }
}

struct MiningAttempt {
    signal: CancellationSignal,
    handle: JoinHandle<Result<Block>>,
    number: u64,
}

pub struct Node {
    config: Config,
    miner: Account,
    me: PeerNode,
    ledger: Mutex<LedgerState>,
    snapshot: RwLock<LedgerSnapshot>,
    mempool: Mempool,
    known_peers: KnownPeers,
    client: PeerClient,
    synced_tx: watch::Sender<Hash>,
    mining: RwLock<Option<u64>>,
    /// Target for locally mined blocks.
    mining_difficulty: u32,
}

impl Node {
    /// Opens the node's data directory, creating the default genesis and an
    /// empty block log on first run, and replays the log.
    pub fn open(config: Config) -> Result<Self> {
        let data_dir = config.data_dir();
        persistence::init_data_dir(&data_dir)?;

        let genesis = genesis::load(&persistence::genesis_path(&data_dir))?;
        info!("Loaded genesis for chain {}", genesis.chain_id);

        let store = FileBlockStore::open(persistence::blocks_db_path(&data_dir))?;
        Self::with_store(config, genesis.balances, Box::new(store))
    }

    pub fn with_store(
        config: Config,
        initial_balances: Balances,
        store: Box<dyn BlockStore>,
    ) -> Result<Self> {
        let difficulty = config.consensus.difficulty;
        let ledger = LedgerState::open(initial_balances, store, difficulty)?;
        let snapshot = LedgerSnapshot::of(&ledger);

        let miner = Account::new(config.miner.account.clone());
        let me = PeerNode::new(
            config.network.ip.clone(),
            config.network.port,
            false,
            miner.clone(),
            true,
        );

        let known_peers = KnownPeers::new();
        let bootstrap_account = Account::new(config.network.bootstrap_account.clone());
        for addr in &config.network.bootstrap_peers {
            let peer = PeerNode::parse(addr, bootstrap_account.clone(), true)?;
            if peer.tcp_address() != me.tcp_address() {
                known_peers.add_if_absent(peer);
            }
        }

        let client = PeerClient::new(config.peer_timeout())?;
        let (synced_tx, _) = watch::channel(snapshot.tip.block_hash);

        info!(
            "Ledger open at block {} ({}), {} known peers",
            snapshot.tip.block_number,
            snapshot.tip.block_hash,
            known_peers.len()
        );

        Ok(Node {
            config,
            miner,
            me,
            ledger: Mutex::new(ledger),
            snapshot: RwLock::new(snapshot),
            mempool: Mempool::new(),
            known_peers,
            client,
            synced_tx,
            mining: RwLock::new(None),
            mining_difficulty: difficulty,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn me(&self) -> &PeerNode {
        &self.me
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn known_peers(&self) -> &KnownPeers {
        &self.known_peers
    }

    pub fn client(&self) -> &PeerClient {
        &self.client
    }

    pub fn tip(&self) -> ChainTip {
        self.snapshot.read().tip
    }

    pub fn mining_state(&self) -> MiningState {
        match *self.mining.read() {
            Some(number) => MiningState::Mining { number },
            None => MiningState::Idle,
        }
    }

    pub fn status(&self) -> StatusRes {
        let tip = self.tip();
        StatusRes {
            block_hash: tip.block_hash,
            block_number: tip.block_number,
            has_genesis: tip.has_genesis,
            peers_known: self.known_peers.to_map(),
            pending_txs: self.mempool.len(),
        }
    }

    pub fn balances(&self) -> BalancesRes {
        let snapshot = self.snapshot.read();
        BalancesRes {
            block_hash: snapshot.tip.block_hash,
            balances: snapshot.balances.clone(),
        }
    }

    /// Committed blocks with `number >= from`.
    ///
    /// The gate is held only to fix the view; the log is read after it is
    /// released, so serving peers never stalls commits.
    pub async fn blocks_from(&self, from: u64) -> Result<Vec<Block>> {
        let snapshot = self.ledger.lock().await.block_snapshot()?;
        task::spawn_blocking(move || snapshot.blocks_from(from))
            .await
            .map_err(|e| ChainError::IoError(format!("Block read task failed: {}", e)))?
    }

    /// Admits a tx into the mempool and gossips it to active peers other
    /// than `origin`.
    ///
    /// Fails with [`ChainError::DuplicateTransaction`] if the tx is already
    /// pending or already committed, and with a validation error if the
    /// committed balances cannot fund it once the pending txs ahead of it
    /// are applied.
    pub async fn add_pending_tx(&self, tx: Tx, origin: Option<String>) -> Result<String> {
        let hash = {
            let ledger = self.ledger.lock().await;
            let tx_hash = tx.hash_str();
            if ledger.is_committed(&tx.hash()) || self.mempool.contains(&tx_hash) {
                return Err(ChainError::DuplicateTransaction(tx_hash));
            }
            self.check_funding(ledger.balances(), &tx)?;
            self.mempool.add_transaction(tx.clone())?
        };
        info!("Added pending tx {} ({} -> {}, {})", hash, tx.from, tx.to, tx.value);

        let targets: Vec<PeerNode> = self
            .known_peers
            .active()
            .into_iter()
            .filter(|peer| {
                let addr = peer.tcp_address();
                addr != self.me.tcp_address() && origin.as_deref() != Some(addr.as_str())
            })
            .collect();
        if !targets.is_empty() {
            let req = GossipTxReq {
                tx,
                origin: Some(self.me.tcp_address()),
            };
            tokio::spawn(crate::sync::gossip_tx(self.client.clone(), targets, req));
        }

        Ok(hash)
    }

    /// Replays the mempool plus `tx` on `committed` in application order.
    /// Pending txs that no longer apply are skipped; only a failure of `tx`
    /// itself is returned.
    fn check_funding(&self, committed: &Balances, tx: &Tx) -> Result<()> {
        let mut pending = self.mempool.snapshot();
        pending.push(tx.clone());

        let mut balances = committed.clone();
        let candidate = tx.hash();
        for pending_tx in application_order(&pending) {
            if let Err(e) = pending_tx.apply(&mut balances) {
                if pending_tx.hash() == candidate {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Registers a peer that announced itself. Returns whether it was new.
    pub fn add_peer(&self, peer: PeerNode) -> bool {
        let addr = peer.tcp_address();
        if addr == self.me.tcp_address() {
            return false;
        }
        if self.known_peers.add_if_absent(PeerNode {
            is_active: true,
            ..peer
        }) {
            info!("Peer {} joined", addr);
            true
        } else {
            self.known_peers.set_active(&addr, true);
            false
        }
    }

    /// Commits blocks fetched from a peer, in order, through the commit gate.
    ///
    /// Blocks before the first invalid one stay committed and are counted
    /// in the outcome. Any commit wakes the mining loop so an in-flight
    /// attempt is cancelled.
    pub async fn commit_synced_blocks(&self, blocks: &[Block]) -> SegmentCommit {
        let mut ledger = self.ledger.lock().await;
        let outcome = ledger.add_blocks(blocks);
        let committed = outcome.committed;

        if committed > 0 {
            for block in &blocks[..committed] {
                for tx in &block.transactions {
                    self.mempool.remove_transaction(&tx.hash_str());
                }
            }
            self.refresh_snapshot(&ledger);
            info!(
                "Committed {} synced blocks, tip now {} ({})",
                committed,
                ledger.next_block_number() - 1,
                ledger.latest_block_hash()
            );
            self.synced_tx.send_replace(ledger.latest_block_hash());
        }

        outcome
    }

    async fn commit_mined_block(&self, block: Block) -> Result<Hash> {
        let mut ledger = self.ledger.lock().await;
        let number = block.header.number;
        let hash = ledger.add_block(block)?;

        if let Some(latest) = ledger.latest_block() {
            for tx in &latest.transactions {
                self.mempool.remove_transaction(&tx.hash_str());
            }
        }
        self.refresh_snapshot(&ledger);
        info!("Committed mined block {} ({})", number, hash);
        Ok(hash)
    }

    /// Drops every pending tx that is already part of the chain.
    async fn reconcile_mempool(&self) -> usize {
        let ledger = self.ledger.lock().await;
        let mut removed = 0;
        for tx in self.mempool.snapshot() {
            if ledger.is_committed(&tx.hash()) && self.mempool.remove_transaction(&tx.hash_str()).is_some() {
                removed += 1;
            }
        }
        removed
    }

    fn refresh_snapshot(&self, ledger: &LedgerState) {
        *self.snapshot.write() = LedgerSnapshot::of(ledger);
    }

    // ========================================================================
    // Mining state machine
    // ========================================================================

    /// Runs the mining loop until `shutdown` flips to true.
    pub async fn run_mining_loop(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut synced = self.synced_tx.subscribe();
        let mut ticker = time::interval(self.config.mining_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempt: Option<MiningAttempt> = None;

        loop {
            tokio::select! {
                _ = shutdown_signal(shutdown.clone()) => {
                    if let Some(active) = attempt.take() {
                        active.signal.cancel();
                        let _ = active.handle.await;
                    }
                    *self.mining.write() = None;
                    break;
                }
                _ = ticker.tick(), if attempt.is_none() => {
                    attempt = self.start_mining();
                }
                joined = wait_attempt(&mut attempt) => {
                    attempt = None;
                    *self.mining.write() = None;
                    self.finish_mining(joined).await;
                    ticker.reset_immediately();
                }
                changed = synced.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(active) = attempt.take() {
                        self.cancel_and_reconcile(active).await;
                        ticker.reset_immediately();
                    }
                }
            }
        }
        debug!("Mining loop stopped");
    }

    /// Idle -> Mining. Returns `None` when there is nothing to mine.
    ///
    /// Pending txs the current balances cannot fund are evicted first.
    fn start_mining(&self) -> Option<MiningAttempt> {
        if self.mempool.is_empty() {
            return None;
        }

        let (tip, mut balances) = {
            let snapshot = self.snapshot.read();
            (snapshot.tip, snapshot.balances.clone())
        };

        let pending_txs = self.mempool.snapshot();
        let mut txs = Vec::with_capacity(pending_txs.len() + 1);
        for tx in application_order(&pending_txs) {
            match tx.apply(&mut balances) {
                Ok(()) => txs.push(tx.clone()),
                Err(e) => {
                    warn!("Evicting pending tx {}: {}", tx.hash_str(), e);
                    self.mempool.remove_transaction(&tx.hash_str());
                }
            }
        }
        if txs.is_empty() {
            return None;
        }

        let block_reward = self.config.miner.block_reward;
        if block_reward > 0 {
            txs.push(Tx::new(
                self.miner.clone(),
                self.miner.clone(),
                block_reward,
                REWARD_DATA,
            ));
        }

        let number = tip.next_block_number;
        info!("Mining block {} with {} txs", number, txs.len());
        let pending = PendingBlock::new(tip.block_hash, number, self.miner.clone(), txs);
        let difficulty = self.mining_difficulty;
        let signal = CancellationSignal::new();
        let worker_signal = signal.clone();
        let handle = task::spawn_blocking(move || miner::mine(&worker_signal, &pending, difficulty));

        *self.mining.write() = Some(number);
        Some(MiningAttempt {
            signal,
            handle,
            number,
        })
    }

    /// Mining -> Idle after the attempt returned on its own.
    async fn finish_mining(&self, joined: std::result::Result<Result<Block>, JoinError>) {
        match joined {
            Ok(Ok(block)) => match self.commit_mined_block(block).await {
                Ok(_) => {}
                Err(e) if e.is_validation() => warn!("Mined block rejected: {}", e),
                Err(e) => error!("Failed to commit mined block: {}", e),
            },
            Ok(Err(ChainError::MiningCancelled)) => debug!("Mining attempt cancelled"),
            Ok(Err(e)) => warn!("Mining failed: {}", e),
            Err(e) => error!("Mining task failed: {}", e),
        }
    }

    /// Mining -> Idle after a synced block landed while mining.
    async fn cancel_and_reconcile(&self, attempt: MiningAttempt) -> usize {
        attempt.signal.cancel();
        match attempt.handle.await {
            Ok(Err(ChainError::MiningCancelled)) => {
                debug!("Mining of block {} cancelled by a synced block", attempt.number)
            }
            Ok(Ok(block)) => debug!(
                "Discarding block {} ({}) mined alongside a synced block",
                attempt.number,
                block.hash()
            ),
            Ok(Err(e)) => warn!("Mining failed: {}", e),
            Err(e) => error!("Mining task failed: {}", e),
        }
        *self.mining.write() = None;

        let removed = self.reconcile_mempool().await;
        if removed > 0 {
            info!("Removed {} pending txs already committed by a synced block", removed);
        }
        removed
    }

    // ========================================================================
    // Run
    // ========================================================================

    /// Serves the API and runs the sync and mining loops until `shutdown`
    /// resolves, then closes the ledger.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.config.listen_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Listening on http://{}", addr);

        let (stop_tx, stop_rx) = watch::channel(false);
        let sync_task = tokio::spawn(crate::sync::run_sync_loop(self.clone(), stop_rx.clone()));
        let mining_task = if self.config.miner.enabled {
            Some(tokio::spawn(self.clone().run_mining_loop(stop_rx.clone())))
        } else {
            info!("Mining disabled");
            None
        };

        let served = crate::api::serve(listener, self.clone(), shutdown).await;
        info!("Shutting down");
        let _ = stop_tx.send(true);

        if let Err(e) = sync_task.await {
            warn!("Sync loop ended abnormally: {}", e);
        }
        if let Some(mining_task) = mining_task {
            if let Err(e) = mining_task.await {
                warn!("Mining loop ended abnormally: {}", e);
            }
        }

        self.ledger.lock().await.close()?;
        served
    }
}

/// Resolves once the watched flag is true or its sender is gone.
pub async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn wait_attempt(
    attempt: &mut Option<MiningAttempt>,
) -> std::result::Result<Result<Block>, JoinError> {
    match attempt {
        Some(active) => (&mut active.handle).await,
        None => std::future::pending().await,
    }
}
