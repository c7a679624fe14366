//! A node's append-only record of externalized ballots, one per slot.
//! Write-once per slot: once a slot is recorded nothing may overwrite it,
//! mirroring the finality guarantee `process_externalize_msg` relies on
//! when deciding whether a slot has already been closed.

use std::collections::BTreeMap;

use crate::scp::Ballot;

#[derive(Debug, Default)]
pub struct Ledger {
    slots: BTreeMap<u64, Ballot>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, slot: &u64) -> bool {
        self.slots.contains_key(slot)
    }

    /// Records `ballot` for `slot`. No-op, returning `false`, if the slot
    /// is already recorded.
    pub fn insert(&mut self, slot: u64, ballot: Ballot) -> bool {
        if self.slots.contains_key(&slot) {
            return false;
        }
        self.slots.insert(slot, ballot);
        true
    }

    pub fn get(&self, slot: u64) -> Option<&Ballot> {
        self.slots.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn latest_slot(&self) -> Option<u64> {
        self.slots.keys().next_back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &Ballot)> {
        self.slots.iter()
    }
}

impl std::ops::Index<&u64> for Ledger {
    type Output = Ballot;
    fn index(&self, slot: &u64) -> &Ballot {
        &self.slots[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scp::transaction::Transaction;
    use crate::scp::value::Value;

    fn ballot(n: u32) -> Ballot {
        Ballot::new(n, Value::new([Transaction::new(&n.to_be_bytes())]))
    }

    #[test]
    fn write_once_per_slot() {
        let mut ledger = Ledger::new();
        assert!(ledger.insert(1, ballot(1)));
        assert!(!ledger.insert(1, ballot(2)));
        assert_eq!(ledger.get(1).unwrap().counter, 1);
    }

    #[test]
    fn latest_slot_tracks_highest_recorded() {
        let mut ledger = Ledger::new();
        ledger.insert(1, ballot(1));
        ledger.insert(5, ballot(5));
        assert_eq!(ledger.latest_slot(), Some(5));
    }
}
