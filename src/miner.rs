//! Proof-of-work mining
//!
//! [`mine`] searches nonces for a [`PendingBlock`] until the block hash
//! satisfies the difficulty predicate. It is CPU-bound and synchronous; the
//! node runs it on a blocking thread and stops it through a
//! [`CancellationSignal`], which is polled before every hash attempt.

use crate::blockchain::{is_block_hash_valid, Block, Hash, MAX_DIFFICULTY};
use crate::error::{ChainError, Result};
use crate::transaction::{Account, Tx};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const PROGRESS_LOG_INTERVAL: u64 = 1_000_000;

/// Cooperative interrupt flag for a mining attempt, with an optional deadline.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also trips once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        CancellationSignal {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Everything needed to mine a block except the nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlock {
    pub parent: Hash,
    pub number: u64,
    pub miner: Account,
    pub transactions: Vec<Tx>,
    pub time: u64,
}

impl PendingBlock {
    pub fn new(parent: Hash, number: u64, miner: Account, transactions: Vec<Tx>) -> Self {
        PendingBlock {
            parent,
            number,
            miner,
            transactions,
            time: now_secs(),
        }
    }
}

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

/// Mines `pending` at `difficulty` leading zero hex digits.
///
/// Fails with [`ChainError::MiningCancelled`] as soon as `signal` trips.
pub fn mine(signal: &CancellationSignal, pending: &PendingBlock, difficulty: u32) -> Result<Block> {
    let mut attempts = 0;
    mine_counted(signal, pending, difficulty, &mut attempts)
}

fn mine_counted(
    signal: &CancellationSignal,
    pending: &PendingBlock,
    difficulty: u32,
    attempts: &mut u64,
) -> Result<Block> {
    if difficulty > MAX_DIFFICULTY {
        return Err(ChainError::ConfigError(format!(
            "Difficulty {} exceeds the maximum of {}",
            difficulty, MAX_DIFFICULTY
        )));
    }

    let started = Instant::now();
    let mut block = Block::new(
        pending.parent,
        pending.number,
        pending.time,
        pending.miner.clone(),
        0,
        pending.transactions.clone(),
    );

    loop {
        if signal.is_cancelled() {
            debug!(
                "Mining of block {} cancelled after {} attempts",
                pending.number, attempts
            );
            return Err(ChainError::MiningCancelled);
        }

        block.header.time = now_secs();
        let hash = block.hash();
        *attempts += 1;

        if is_block_hash_valid(&hash, difficulty) {
            info!(
                "Mined block {} ({}) with nonce {} after {} attempts in {:?}",
                pending.number,
                hash,
                block.header.nonce,
                attempts,
                started.elapsed()
            );
            return Ok(block);
        }

        if *attempts % PROGRESS_LOG_INTERVAL == 0 {
            debug!(
                "Mining {} pending txs, attempt {}",
                pending.transactions.len(),
                attempts
            );
        }

        block.header.nonce = block.header.nonce.wrapping_add(1);
    }
}
