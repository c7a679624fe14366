//! Per-value and per-ballot statement counters: which peers have voted,
//! accepted, confirmed, or aborted a given value/ballot. Grounded on
//! `Node.py`'s `statement_counter` / `ballot_statement_counter` /
//! `commit_ballot_statement_counter` dictionaries-of-sets.

use std::collections::BTreeSet;

use super::quorum::NodeId;

/// The four buckets a peer's stance on a value or ballot can fall into.
/// Not every phase uses every bucket (nomination has no `confirmed`/
/// `aborted` bucket of its own at this granularity, but the fields are
/// shared so `NodeEngine` can key all three phases off the same type).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatementCounter {
    pub voted: BTreeSet<NodeId>,
    pub accepted: BTreeSet<NodeId>,
    pub confirmed: BTreeSet<NodeId>,
    pub aborted: BTreeSet<NodeId>,
}

impl StatementCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union of `voted` and `accepted`, the set nomination/ballot quorum
    /// checks draw their "has signed" test from.
    pub fn signed(&self) -> BTreeSet<NodeId> {
        self.voted.union(&self.accepted).cloned().collect()
    }

    pub fn record_vote(&mut self, peer: NodeId) {
        self.voted.insert(peer);
    }

    pub fn record_accept(&mut self, peer: NodeId) {
        self.accepted.insert(peer);
    }

    pub fn record_confirm(&mut self, peer: NodeId) {
        self.confirmed.insert(peer);
    }

    pub fn record_abort(&mut self, peer: NodeId) {
        self.aborted.insert(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_is_union_of_voted_and_accepted() {
        let mut c = StatementCounter::new();
        c.record_vote("a".into());
        c.record_accept("b".into());
        let signed = c.signed();
        assert!(signed.contains("a"));
        assert!(signed.contains("b"));
        assert_eq!(signed.len(), 2);
    }

    #[test]
    fn recording_same_peer_twice_is_idempotent() {
        let mut c = StatementCounter::new();
        c.record_vote("a".into());
        c.record_vote("a".into());
        assert_eq!(c.voted.len(), 1);
    }
}
