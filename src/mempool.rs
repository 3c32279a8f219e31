//! Pending transaction pool keyed by hex transaction hash

use crate::error::{ChainError, Result};
use crate::transaction::Tx;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Mempool {
    transactions: RwLock<HashMap<String, Tx>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `tx`, returning its hash. A tx already present is rejected.
    pub fn add_transaction(&self, tx: Tx) -> Result<String> {
        let hash = tx.hash_str();
        let mut transactions = self.transactions.write();
        if transactions.contains_key(&hash) {
            return Err(ChainError::DuplicateTransaction(hash));
        }
        transactions.insert(hash.clone(), tx);
        Ok(hash)
    }

    pub fn remove_transaction(&self, hash: &str) -> Option<Tx> {
        self.transactions.write().remove(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.transactions.read().contains_key(hash)
    }

    /// Point-in-time copy ordered by time, then hash.
    pub fn snapshot(&self) -> Vec<Tx> {
        let transactions = self.transactions.read();
        let mut entries: Vec<(&String, &Tx)> = transactions.iter().collect();
        entries.sort_by(|a, b| a.1.time.cmp(&b.1.time).then_with(|| a.0.cmp(b.0)));
        entries.into_iter().map(|(_, tx)| tx.clone()).collect()
    }

    pub fn hashes(&self) -> Vec<String> {
        self.transactions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_add_and_duplicate() {
        let mempool = Mempool::new();
        let tx = Tx::with_time("jrhodes", "meads", 1, "", 10);

        let hash = mempool.add_transaction(tx.clone()).unwrap();
        assert_eq!(hash, tx.hash_str());
        assert!(matches!(
            mempool.add_transaction(tx),
            Err(ChainError::DuplicateTransaction(h)) if h == hash
        ));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mempool = Mempool::new();
        let hash = mempool
            .add_transaction(Tx::with_time("jrhodes", "meads", 1, "", 10))
            .unwrap();

        assert!(mempool.remove_transaction(&hash).is_some());
        assert!(mempool.remove_transaction(&hash).is_none());
        assert!(mempool.is_empty());
    }

    #[test]
    fn test_snapshot_is_ordered_and_detached() {
        let mempool = Mempool::new();
        mempool
            .add_transaction(Tx::with_time("jrhodes", "meads", 2, "", 20))
            .unwrap();
        mempool
            .add_transaction(Tx::with_time("jrhodes", "meads", 1, "", 10))
            .unwrap();

        let snapshot = mempool.snapshot();
        mempool
            .add_transaction(Tx::with_time("jrhodes", "meads", 3, "", 5))
            .unwrap();

        let values: Vec<u64> = snapshot.iter().map(|tx| tx.value).collect();
        assert_eq!(values, vec![1, 2]);
        assert_eq!(mempool.len(), 3);
    }

    #[test]
    fn test_concurrent_adds_of_same_tx_count_once() {
        let mempool = Arc::new(Mempool::new());
        let tx = Tx::with_time("jrhodes", "meads", 1, "", 10);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mempool = mempool.clone();
                let tx = tx.clone();
                std::thread::spawn(move || mempool.add_transaction(tx).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 1);
        assert_eq!(mempool.len(), 1);
    }
}
