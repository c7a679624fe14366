//! Commit-ballot phase: mirrors the prepare phase's quorum/blocking
//! machinery over a value-hash-keyed set of commit ballots, per
//! `prepare_SCPCommit_msg` / `simple_process_commit_ballot_message` /
//! `check_Commit_Quorum_threshold` / `receive_commit_message` /
//! `_is_v_blocking_commit` in `Node.py`. Reaching quorum on acceptance
//! attempts externalize in the same tick, as the source does.

use std::collections::HashSet;

use log::{debug, info};
use rand::Rng;

use super::ballot::Ballot;
use super::messages::{Commit, Envelope};
use super::node::NodeEngine;
use super::quorum::NodeId;
use super::statement::StatementCounter;
use super::transaction::TxHash;
use super::value::ValueHash;

pub trait CommitSource {
    fn latest_commit(&self, peer: &str) -> Option<Envelope<Commit>>;
}

impl NodeEngine {
    /// Starts the commit phase for a freshly prepare-confirmed ballot:
    /// installs it in `commit_voted`, seeds its counter with self, and
    /// broadcasts `Commit(ballot, preparedCounter)`. A no-op if this value
    /// is already tracked by any commit bucket. Mirrors
    /// `prepare_SCPCommit_msg` steps 2-3.
    pub(super) fn begin_commit_phase(&mut self, ballot: Ballot) {
        let val_hash = ballot.value.hash();
        if self.commit_voted.contains_key(&val_hash)
            || self.commit_accepted.contains_key(&val_hash)
            || self.commit_confirmed.contains_key(&val_hash)
        {
            return;
        }
        self.commit_voted.insert(val_hash, ballot.clone());
        let id = self.id.clone();
        self.commit_counter(ballot.clone()).record_vote(id);
        self.commit_broadcast = Some(Commit {
            ballot: ballot.clone(),
            prepared_counter: ballot.counter,
        });
        self.check_commit_quorum_for(&ballot);
    }

    /// Re-invoked every tick, independent of the one-shot call in
    /// `prepare_accepted_to_confirmed`: re-announces the commit ballot for
    /// whatever value is currently prepare-confirmed. Mirrors
    /// `prepare_SCPCommit_msg` being callable on its own rather than only as
    /// a prepare-confirm side effect. `begin_commit_phase`'s own bucket
    /// check makes this a no-op once the value already has a tracked commit
    /// ballot, so repeated calls don't duplicate self-votes.
    pub fn prepare_commit(&mut self) {
        if let Some(ballot) = self.prepare_confirmed.values().next().cloned() {
            self.begin_commit_phase(ballot);
        }
    }

    fn commit_counter(&mut self, ballot: Ballot) -> &mut StatementCounter {
        self.commit_counters.entry(ballot).or_insert_with(StatementCounter::new)
    }

    /// Applies an incoming commit vote for `ballot` from `from`.
    pub fn process_commit_message(&mut self, from: NodeId, ballot: Ballot) {
        if ballot.value.fully_contained_in(&self.finalised_transactions) {
            debug!("{}: ignoring commit ballot for already-finalized value, purging stale state", self.id);
            let finalised_hashes: HashSet<TxHash> = ballot.value.transactions().iter().map(|tx| tx.hash()).collect();
            self.reset_commit_phase_state(&finalised_hashes);
            return;
        }
        self.commit_counter(ballot.clone()).record_vote(from);
        self.check_commit_quorum_for(&ballot);
        self.apply_commit_vblocking_sweep(&ballot);
    }

    /// Promotes `ballot`'s value by one level -- voted->accepted or
    /// accepted->confirmed -- per call, the same one-level-per-call
    /// discipline as `check_prepare_quorum_for`. Reaching accepted or
    /// confirmed attempts `prepare_externalize` immediately, per
    /// spec.md §4.4.
    fn check_commit_quorum_for(&mut self, ballot: &Ballot) {
        let val_hash = ballot.value.hash();
        if !self.commit_voted.contains_key(&val_hash) && !self.commit_accepted.contains_key(&val_hash) {
            return;
        }
        let signed = self.commit_counters.get(ballot).map(StatementCounter::signed).unwrap_or_default();
        let self_signed = signed.contains(&self.id);
        if !self.quorum_set.quorum_threshold_met(&self.id, self_signed, &signed) {
            if self.quorum_set.blocking_threshold_met(&self.id, &signed) {
                debug!("{}: commit ballot is v-blocked, not force-accepting", self.id);
            }
            return;
        }
        if self.commit_voted.contains_key(&val_hash) {
            self.commit_voted_to_accepted(val_hash);
        } else if self.commit_accepted.contains_key(&val_hash) {
            self.commit_accepted_to_confirmed(val_hash);
        }
    }

    fn commit_voted_to_accepted(&mut self, val_hash: ValueHash) {
        if self.commit_accepted.contains_key(&val_hash) {
            return;
        }
        if let Some(ballot) = self.commit_voted.remove(&val_hash) {
            info!("{}: ballot counter {} commit-accepted", self.id, ballot.counter);
            self.commit_accepted.insert(val_hash, ballot);
            self.try_externalize();
        }
    }

    fn commit_accepted_to_confirmed(&mut self, val_hash: ValueHash) {
        if self.commit_confirmed.contains_key(&val_hash) {
            return;
        }
        if let Some(ballot) = self.commit_accepted.remove(&val_hash) {
            info!("{}: ballot counter {} commit-confirmed, externalizing", self.id, ballot.counter);
            self.commit_confirmed.insert(val_hash, ballot);
            self.try_externalize();
        }
    }

    /// Unconditional forced abort-and-adopt, mirroring `_is_v_blocking_commit`:
    /// any other currently voted commit ballot is dropped and `received`
    /// installed as voted the moment enough peers have signed it to make it
    /// v-blocking, independent of whether quorum was also reached above.
    /// The commit phase has no `aborted` bucket of its own (spec.md §3), so
    /// the superseded ballot is simply purged rather than relocated.
    fn apply_commit_vblocking_sweep(&mut self, received: &Ballot) {
        let val_hash = received.value.hash();
        let signed = self.commit_counters.get(received).map(StatementCounter::signed).unwrap_or_default();
        if !self.quorum_set.blocking_threshold_met(&self.id, &signed) {
            return;
        }
        let other_voted: Vec<ValueHash> = self.commit_voted.keys().copied().filter(|h| *h != val_hash).collect();
        if other_voted.is_empty() {
            return;
        }
        info!("{}: {:?} v-blocks other voted commit ballots, purging them", self.id, received);
        for hash in other_voted {
            self.commit_voted.remove(&hash);
        }
        self.commit_voted.insert(val_hash, received.clone());
        self.commit_broadcast = Some(Commit {
            ballot: received.clone(),
            prepared_counter: received.counter,
        });
    }

    /// Samples a confirmed commit ballot (deterministically, the first by
    /// value-hash order, since at most one is tracked in practice -- see
    /// the nomination phase's equivalent "at most one merged Value" note)
    /// and hands it to `prepare_externalize`. A no-op if nothing is
    /// commit-confirmed yet.
    fn try_externalize(&mut self) {
        if let Some(ballot) = self.commit_confirmed.values().next().cloned() {
            self.prepare_externalize(ballot);
        }
    }

    /// Pulls one unseen `Commit` envelope from a randomly chosen quorum
    /// peer and applies it. Mirrors `receive_commit_message`.
    pub fn receive_commit<R: Rng>(&mut self, peers: &dyn CommitSource, rng: &mut R) {
        let candidates: Vec<NodeId> = self
            .quorum_set
            .distinct_peers_excluding(&self.id)
            .into_iter()
            .filter(|p| {
                peers
                    .latest_commit(p)
                    .map_or(false, |e| self.seen_commit.get(p) != Some(&e.statement.ballot))
            })
            .collect();
        let Some(peer) = super::node::pick_peer(&candidates, rng) else {
            return;
        };
        let Some(envelope) = peers.latest_commit(&peer) else {
            return;
        };
        self.seen_commit.insert(peer.clone(), envelope.statement.ballot.clone());
        let ballot = envelope.statement.ballot;
        if ballot.value.fully_contained_in(&self.finalised_transactions) {
            debug!("{}: ignoring pulled commit ballot for already-finalized value, purging stale state", self.id);
            let finalised_hashes: HashSet<TxHash> = ballot.value.transactions().iter().map(|tx| tx.hash()).collect();
            self.reset_commit_phase_state(&finalised_hashes);
            return;
        }
        self.process_commit_message(envelope.from, ballot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scp::quorum::{QuorumSet, ThresholdFraction};
    use crate::scp::transaction::Transaction;
    use crate::scp::value::Value;

    fn engine(id: &str, validators: &[&str], pct: u8) -> NodeEngine {
        let q = QuorumSet::flat(ThresholdFraction(pct), validators.iter().map(|s| s.to_string()).collect());
        NodeEngine::new(id.to_string(), q)
    }

    fn val(n: u8) -> Value {
        Value::new([Transaction::from_hash([n; 32])])
    }

    #[test]
    fn begin_commit_phase_seeds_self_and_broadcasts() {
        let mut n = engine("a", &["a", "b", "c"], 67);
        let ballot = Ballot::new(1, val(1));
        n.begin_commit_phase(ballot.clone());
        assert!(n.commit_voted.contains_key(&val(1).hash()));
        assert_eq!(n.commit_broadcast.unwrap().ballot, ballot);
    }

    #[test]
    fn reaching_commit_quorum_chains_into_externalize() {
        // 3 validators, 67% threshold -> minimum_quorum = ceil(3*0.67) = 3,
        // so all three (self + b + c) must sign before anything promotes.
        let mut n = engine("a", &["a", "b", "c"], 67);
        let ballot = Ballot::new(1, val(1));
        n.begin_commit_phase(ballot.clone());
        n.process_commit_message("b".into(), ballot.clone());
        assert!(n.commit_voted.contains_key(&val(1).hash()), "quorum not yet met with only 2/3 signed");

        n.process_commit_message("c".into(), ballot.clone());
        // signed = {a,b,c} now clears quorum: voted -> accepted (one level
        // per call), ledger still empty.
        assert!(n.commit_accepted.contains_key(&val(1).hash()));
        assert!(n.ledger.is_empty());

        // Re-checking the same (already-sufficient) signed set promotes
        // accepted -> confirmed and externalizes in the same call.
        n.process_commit_message("c".into(), ballot.clone());
        assert_eq!(n.ledger.len(), 1);
        assert!(n.externalize_broadcast.is_some());
    }

    #[test]
    fn v_blocking_commit_purges_other_voted_ballots() {
        let mut n = engine("a", &["a", "b", "c", "d"], 100);
        n.begin_commit_phase(Ballot::new(1, val(1)));
        n.process_commit_message("b".into(), Ballot::new(1, val(2)));
        assert!(n.commit_voted.contains_key(&val(2).hash()));
        assert!(!n.commit_voted.contains_key(&val(1).hash()));
    }

    #[test]
    fn process_commit_message_for_finalized_value_purges_instead_of_applying() {
        let mut n = engine("a", &["a", "b", "c"], 67);
        let ballot = Ballot::new(1, val(1));
        n.begin_commit_phase(ballot.clone());
        n.finalised_transactions.insert(Transaction::from_hash([1; 32]).hash());

        n.process_commit_message("b".into(), ballot);

        assert!(
            !n.commit_voted.contains_key(&val(1).hash()),
            "a ballot for an already-finalized value must be purged, not voted on"
        );
        assert!(n.commit_broadcast.is_none());
    }
}
