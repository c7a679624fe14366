//! A nomination/ballot `Value`: an unordered set of transactions identified
//! by the hash of that set. See `Node.py`/`Value.py`'s `Value.combine` for
//! the union semantics this mirrors.

use super::transaction::{Transaction, TxHash};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

pub type ValueHash = [u8; 32];

/// Informational lifecycle tag. Never participates in equality or hashing;
/// two `Value`s with the same transaction set are the same value regardless
/// of which phase last touched them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueState {
    Init,
    Nominated,
    Accepted,
    Confirmed,
}

#[derive(Clone, Debug)]
pub struct Value {
    transactions: BTreeSet<Transaction>,
    hash: ValueHash,
    state: ValueState,
}

impl Value {
    pub fn new(transactions: impl IntoIterator<Item = Transaction>) -> Self {
        let transactions: BTreeSet<Transaction> = transactions.into_iter().collect();
        let hash = Self::hash_of(&transactions);
        Self {
            transactions,
            hash,
            state: ValueState::Init,
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    fn hash_of(transactions: &BTreeSet<Transaction>) -> ValueHash {
        // BTreeSet already iterates in ascending tx-hash order, so this is
        // order-independent with respect to insertion order, satisfying the
        // "hash(the set, order-independent)" requirement.
        let mut hasher = Sha256::new();
        for tx in transactions {
            hasher.update(tx.hash());
        }
        hasher.finalize().into()
    }

    /// Union of all transactions across `values`. `combine([v]) == v`.
    pub fn combine<'a>(values: impl IntoIterator<Item = &'a Value>) -> Value {
        let mut merged = BTreeSet::new();
        for v in values {
            merged.extend(v.transactions.iter().cloned());
        }
        Value::new(merged)
    }

    /// Returns a Value retaining only the first `max` transactions in
    /// ascending hash order, per the MAX_SLOT_TXS boundary behaviour.
    pub fn capped(&self, max: usize) -> Value {
        if self.transactions.len() <= max {
            return self.clone();
        }
        Value::new(self.transactions.iter().take(max).cloned())
    }

    /// Returns a Value with every transaction whose hash is in `exclude`
    /// removed, or `None` if nothing would remain.
    pub fn pruned(&self, exclude: &std::collections::HashSet<TxHash>) -> Option<Value> {
        let kept: BTreeSet<Transaction> = self
            .transactions
            .iter()
            .filter(|tx| !exclude.contains(&tx.hash()))
            .cloned()
            .collect();
        if kept.is_empty() {
            None
        } else {
            Some(Value::new(kept))
        }
    }

    pub fn hash(&self) -> ValueHash {
        self.hash
    }

    pub fn transactions(&self) -> &BTreeSet<Transaction> {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn state(&self) -> ValueState {
        self.state
    }

    pub fn with_state(mut self, state: ValueState) -> Value {
        self.state = state;
        self
    }

    /// True if every transaction in this Value's set is in `finalised`.
    pub fn fully_contained_in(&self, finalised: &std::collections::HashSet<TxHash>) -> bool {
        self.transactions.iter().all(|tx| finalised.contains(&tx.hash()))
    }

    /// True if this Value shares any transaction with `other`.
    pub fn overlaps(&self, other_hashes: &std::collections::HashSet<TxHash>) -> bool {
        self.transactions.iter().any(|tx| other_hashes.contains(&tx.hash()))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.hash.cmp(&other.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u8) -> Transaction {
        Transaction::from_hash([n; 32])
    }

    #[test]
    fn combine_single_is_identity() {
        let v = Value::new([tx(1), tx(2)]);
        let combined = Value::combine([&v]);
        assert_eq!(v, combined);
    }

    #[test]
    fn combine_is_union_and_dedups() {
        let a = Value::new([tx(1), tx(2)]);
        let b = Value::new([tx(2), tx(3)]);
        let combined = Value::combine([&a, &b]);
        assert_eq!(combined.len(), 3);
    }

    #[test]
    fn equality_is_set_based_not_order_based() {
        let a = Value::new([tx(1), tx(2)]);
        let b = Value::new([tx(2), tx(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn cap_keeps_lowest_hashes() {
        let v = Value::new((0u8..=200).map(tx));
        assert_eq!(v.len(), 201);
        let capped = v.capped(200);
        assert_eq!(capped.len(), 200);
        assert!(capped.transactions().iter().all(|t| t.hash()[0] <= 199));
    }
}
