/// Balance rules for applying transactions, separated from type definitions
use crate::blockchain::Balances;
use crate::error::ChainError;
use crate::transaction::types::Tx;

impl Tx {
    /// Applies this transaction to `balances`.
    ///
    /// Reward transactions only credit `to`. Any other transaction requires
    /// `balances[from] >= value`. A credit that would overflow `u64` is
    /// rejected. On failure `balances` is left untouched.
    pub fn apply(&self, balances: &mut Balances) -> Result<(), ChainError> {
        if self.is_reward() {
            let credited = self.credit(balances.get(&self.to).copied().unwrap_or(0))?;
            balances.insert(self.to.clone(), credited);
            return Ok(());
        }

        let balance = balances.get(&self.from).copied().unwrap_or(0);
        if self.value > balance {
            return Err(ChainError::InsufficientBalance {
                tx: self.hash_str(),
                from: self.from.to_string(),
                balance,
                value: self.value,
            });
        }
        if self.from == self.to {
            return Ok(());
        }

        let credited = self.credit(balances.get(&self.to).copied().unwrap_or(0))?;
        balances.insert(self.from.clone(), balance - self.value);
        balances.insert(self.to.clone(), credited);

        Ok(())
    }

    fn credit(&self, balance: u64) -> Result<u64, ChainError> {
        balance
            .checked_add(self.value)
            .ok_or_else(|| ChainError::BalanceOverflow {
                tx: self.hash_str(),
                to: self.to.to_string(),
                balance,
                value: self.value,
            })
    }
}

/// Returns the transactions in application order: ascending `time`, with
/// equal times keeping their serialized order.
pub fn application_order(txs: &[Tx]) -> Vec<&Tx> {
    let mut ordered: Vec<&Tx> = txs.iter().collect();
    ordered.sort_by_key(|tx| tx.time);
    ordered
}
