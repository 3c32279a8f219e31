//! Transaction module split into types and validation for better modularity

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::application_order;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Balances;
    use crate::error::ChainError;

    fn balances(entries: &[(&str, u64)]) -> Balances {
        entries
            .iter()
            .map(|(account, value)| (Account::from(*account), *value))
            .collect()
    }

    #[test]
    fn test_transfer_conserves_value() {
        let mut state = balances(&[("jrhodes", 1_000), ("meads", 5)]);
        let tx = Tx::new("jrhodes", "meads", 300, "");

        tx.apply(&mut state).unwrap();

        assert_eq!(state[&Account::from("jrhodes")] + 300, 1_000);
        assert_eq!(state[&Account::from("meads")], 305);
    }

    #[test]
    fn test_credit_overflow_is_rejected_and_leaves_state_unchanged() {
        let mut state = balances(&[("jrhodes", 100), ("meads", u64::MAX)]);
        let before = state.clone();

        let transfer = Tx::new("jrhodes", "meads", 100, "");
        match transfer.apply(&mut state) {
            Err(e @ ChainError::BalanceOverflow { .. }) => assert!(e.is_validation()),
            other => panic!("expected BalanceOverflow, got {:?}", other),
        }
        assert_eq!(state, before);

        let reward = Tx::new("nobody", "meads", 1, REWARD_DATA);
        assert!(matches!(reward.apply(&mut state), Err(ChainError::BalanceOverflow { .. })));
        assert_eq!(state, before);
    }

    #[test]
    fn test_self_transfer_keeps_balance() {
        let mut state = balances(&[("jrhodes", u64::MAX)]);
        Tx::new("jrhodes", "jrhodes", 10, "").apply(&mut state).unwrap();
        assert_eq!(state[&Account::from("jrhodes")], u64::MAX);
        assert!(Tx::new("jrhodes", "jrhodes", 1, "").apply(&mut balances(&[])).is_err());
    }

    #[test]
    fn test_reward_only_credits_recipient() {
        let mut state = balances(&[("jrhodes", 10)]);
        let tx = Tx::new("nobody", "jrhodes", 700, REWARD_DATA);

        tx.apply(&mut state).unwrap();

        assert_eq!(state[&Account::from("jrhodes")], 710);
        assert!(!state.contains_key(&Account::from("nobody")));
    }

    #[test]
    fn test_insufficient_balance_leaves_state_unchanged() {
        let mut state = balances(&[("jrhodes", 10)]);
        let before = state.clone();
        let tx = Tx::new("jrhodes", "meads", 11, "");

        let result = tx.apply(&mut state);

        match result {
            Err(ChainError::InsufficientBalance {
                tx: hash,
                balance,
                value,
                ..
            }) => {
                assert_eq!(hash, tx.hash_str());
                assert_eq!(balance, 10);
                assert_eq!(value, 11);
            }
            other => panic!("expected InsufficientBalance, got {:?}", other),
        }
        assert_eq!(state, before);
    }

    #[test]
    fn test_unknown_sender_has_zero_balance() {
        let mut state = Balances::new();
        assert!(Tx::new("ghost", "meads", 1, "").apply(&mut state).is_err());
        assert!(Tx::new("ghost", "meads", 0, "").apply(&mut state).is_ok());
    }

    #[test]
    fn test_concrete_transfer_then_reward() {
        let mut state = balances(&[("jrhodes", 1_000_000)]);

        Tx::new("jrhodes", "meads", 2_000, "").apply(&mut state).unwrap();
        Tx::new("jrhodes", "jrhodes", 700, "reward")
            .apply(&mut state)
            .unwrap();

        assert_eq!(state, balances(&[("jrhodes", 998_700), ("meads", 2_000)]));
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let base = Tx::with_time("a", "b", 1, "", 100);
        let variants = [
            Tx::with_time("a2", "b", 1, "", 100),
            Tx::with_time("a", "b2", 1, "", 100),
            Tx::with_time("a", "b", 2, "", 100),
            Tx::with_time("a", "b", 1, "reward", 100),
            Tx::with_time("a", "b", 1, "", 101),
        ];
        for variant in &variants {
            assert_ne!(base.hash(), variant.hash());
        }
        assert_eq!(base.hash(), base.clone().hash());
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let left = Tx::with_time("ab", "c", 1, "", 0);
        let right = Tx::with_time("a", "bc", 1, "", 0);
        assert_ne!(left.hash(), right.hash());
    }

    #[test]
    fn test_application_order_sorts_by_time_and_is_stable() {
        let txs = vec![
            Tx::with_time("a", "b", 1, "", 30),
            Tx::with_time("a", "b", 2, "", 10),
            Tx::with_time("a", "b", 3, "", 10),
        ];
        let values: Vec<u64> = application_order(&txs).iter().map(|tx| tx.value).collect();
        assert_eq!(values, vec![2, 3, 1]);
    }

    #[test]
    fn test_tx_json_field_names() {
        let tx = Tx::with_time("jrhodes", "meads", 5, "", 42);
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["from"], "jrhodes");
        assert_eq!(json["to"], "meads");
        assert_eq!(json["value"], 5);
        assert_eq!(json["time"], 42);
    }
}
