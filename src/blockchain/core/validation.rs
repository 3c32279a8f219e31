use crate::blockchain::core::chain::{is_block_hash_valid, Block, Hash};
use crate::error::ChainError;

/// Checks number continuity and parent linkage against the current tip.
///
/// `latest` is `None` until a genesis block has been committed; the first
/// block must be number 0 and its parent is not checked.
pub fn validate_block_linkage(block: &Block, latest: Option<(u64, Hash)>) -> Result<(), ChainError> {
    let expected = latest.map_or(0, |(number, _)| number + 1);
    if block.header.number != expected {
        return Err(ChainError::InvalidBlockNumber {
            expected,
            got: block.header.number,
        });
    }

    if let Some((_, latest_hash)) = latest {
        if block.header.parent != latest_hash {
            return Err(ChainError::InvalidParent {
                expected: latest_hash,
                got: block.header.parent,
            });
        }
    }

    Ok(())
}

/// Recomputes the block hash and checks it against the difficulty target.
pub fn validate_proof_of_work(block: &Block, difficulty: u32) -> Result<Hash, ChainError> {
    let hash = block.hash();
    if !is_block_hash_valid(&hash, difficulty) {
        return Err(ChainError::InvalidProofOfWork(hash));
    }
    Ok(hash)
}
