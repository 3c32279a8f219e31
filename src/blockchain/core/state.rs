use crate::blockchain::core::chain::{Block, BlockRecord, Hash};
use crate::blockchain::core::validation::{validate_block_linkage, validate_proof_of_work};
use crate::error::{ChainError, Result};
use crate::persistence::{BlockSnapshot, BlockStore};
use crate::transaction::{application_order, Account};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub type Balances = HashMap<Account, u64>;

/// Outcome of [`LedgerState::add_blocks`].
#[derive(Debug)]
pub struct SegmentCommit {
    /// Blocks committed before the first failure.
    pub committed: usize,
    /// The error that stopped the segment, if any.
    pub error: Option<ChainError>,
}

/// Account balances and chain tip derived from the block log.
///
/// Every mutation goes through [`LedgerState::add_block`], which validates
/// against a copy of the balances, appends to the log, and only then swaps
/// the copy in.
pub struct LedgerState {
    balances: Balances,
    latest_block: Option<Block>,
    latest_hash: Hash,
    committed_txs: HashSet<Hash>,
    difficulty: u32,
    store: Box<dyn BlockStore>,
}

impl LedgerState {
    /// Rebuilds state by replaying every record in `store` on top of `initial_balances`.
    pub fn open(
        initial_balances: Balances,
        mut store: Box<dyn BlockStore>,
        difficulty: u32,
    ) -> Result<Self> {
        let records = store.load()?;

        let mut state = LedgerState {
            balances: initial_balances,
            latest_block: None,
            latest_hash: Hash::ZERO,
            committed_txs: HashSet::new(),
            difficulty,
            store,
        };

        for (index, record) in records.into_iter().enumerate() {
            let corrupt = |reason: String| ChainError::LogCorrupt {
                line: index + 1,
                reason,
            };
            let (hash, balances) = state.validate(&record.block).map_err(|e| corrupt(e.to_string()))?;
            if hash != record.hash {
                return Err(corrupt(format!(
                    "stored hash {} does not match block hash {}",
                    record.hash, hash
                )));
            }
            state.commit(record.block, hash, balances);
        }

        debug!(
            "Replayed block log: next block {}, {} accounts",
            state.next_block_number(),
            state.balances.len()
        );
        Ok(state)
    }

    /// Validates `block`, appends it to the log and makes it the new tip.
    ///
    /// On any error the state is left exactly as it was.
    pub fn add_block(&mut self, block: Block) -> Result<Hash> {
        let (hash, balances) = self.validate(&block)?;

        let record = BlockRecord { hash, block };
        self.store.append(&record)?;

        self.commit(record.block, hash, balances);
        Ok(hash)
    }

    /// Applies blocks in order, stopping at the first failure.
    ///
    /// Blocks before the failing one stay committed and are counted in the
    /// outcome alongside the error.
    pub fn add_blocks(&mut self, blocks: &[Block]) -> SegmentCommit {
        for (committed, block) in blocks.iter().enumerate() {
            if let Err(error) = self.add_block(block.clone()) {
                return SegmentCommit {
                    committed,
                    error: Some(error),
                };
            }
        }
        SegmentCommit {
            committed: blocks.len(),
            error: None,
        }
    }

    fn validate(&self, block: &Block) -> Result<(Hash, Balances)> {
        validate_block_linkage(block, self.tip())?;
        let hash = validate_proof_of_work(block, self.difficulty)?;

        let mut pending = self.balances.clone();
        for tx in application_order(&block.transactions) {
            tx.apply(&mut pending)?;
        }
        Ok((hash, pending))
    }

    fn commit(&mut self, block: Block, hash: Hash, balances: Balances) {
        self.committed_txs
            .extend(block.transactions.iter().map(|tx| tx.hash()));
        self.balances = balances;
        self.latest_block = Some(block);
        self.latest_hash = hash;
    }

    fn tip(&self) -> Option<(u64, Hash)> {
        self.latest_block
            .as_ref()
            .map(|block| (block.header.number, self.latest_hash))
    }

    pub fn balances(&self) -> &Balances {
        &self.balances
    }

    pub fn balance(&self, account: &Account) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn latest_block(&self) -> Option<&Block> {
        self.latest_block.as_ref()
    }

    /// Zero hash until a genesis block exists.
    pub fn latest_block_hash(&self) -> Hash {
        self.latest_hash
    }

    pub fn has_genesis(&self) -> bool {
        self.latest_block.is_some()
    }

    pub fn next_block_number(&self) -> u64 {
        self.tip().map_or(0, |(number, _)| number + 1)
    }

    /// Whether a transaction with this hash is already part of the chain.
    pub fn is_committed(&self, tx_hash: &Hash) -> bool {
        self.committed_txs.contains(tx_hash)
    }

    /// View of the committed blocks that can be read after the ledger is
    /// released.
    pub fn block_snapshot(&self) -> Result<Box<dyn BlockSnapshot>> {
        self.store.snapshot()
    }

    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }
}
