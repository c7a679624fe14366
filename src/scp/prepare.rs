//! Prepare-ballot phase: `NodeEngine` methods handling incoming `Prepare`
//! statements. Grounded on `prepare_ballot_msg` / `process_prepare_ballot_message`
//! / `abort_ballots` / `check_Prepare_Quorum_threshold` / `receive_prepare_message`
//! / `is_v_blocking` in `Node.py`.

use log::{debug, info};
use rand::Rng;

use super::ballot::Ballot;
use super::messages::{Envelope, Prepare};
use super::node::NodeEngine;
use super::quorum::NodeId;
use super::statement::StatementCounter;
use super::value::{Value, ValueHash};

/// aCounter/cCounter/hCounter bookkeeping for a single value's prepare
/// record, carried across Prepare broadcasts for that value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrepareRecord {
    pub a_counter: u32,
    pub c_counter: u32,
    pub h_counter: u32,
}

/// What `receive_prepare` needs from the overlay.
pub trait PrepareSource {
    fn latest_prepare(&self, peer: &str) -> Option<Envelope<Prepare>>;
}

impl NodeEngine {
    fn prep_counter(&mut self, ballot: Ballot) -> &mut StatementCounter {
        self.prep_counters.entry(ballot).or_insert_with(StatementCounter::new)
    }

    /// Starts (or bumps) the prepare ballot for a newly confirmed
    /// nomination value. If the value was already locally aborted, the
    /// preparation itself is abandoned. Otherwise the existing voted
    /// ballot's counter is incremented, or a fresh Ballot(1, value) is
    /// created; both voted and accepted are seeded with self. Mirrors
    /// `prepare_ballot_msg` steps 2-7.
    pub(crate) fn start_prepare(&mut self, value: Value) {
        let val_hash = value.hash();
        if self.prepare_aborted.contains_key(&val_hash) {
            return;
        }
        let counter = self.prepare_voted.get(&val_hash).map(|b| b.counter + 1).unwrap_or(1);
        let ballot = Ballot::new(counter, value);
        self.prepare_voted.insert(val_hash, ballot.clone());
        let id = self.id.clone();
        let counter = self.prep_counter(ballot.clone());
        counter.record_vote(id.clone());
        counter.record_accept(id);
        self.refresh_prepare_broadcast(&ballot);
        self.check_prepare_quorum_for(&ballot);
    }

    /// Re-invoked every tick, independent of the one-shot nomination-confirm
    /// call in `promote_if_threshold_met`: as long as the confirmed value's
    /// ballot is still sitting at `voted` (no quorum progress yet),
    /// `start_prepare` bumps its counter by one, the same liveness push
    /// `prepare_ballot_msg` makes on every re-invocation while the ballot
    /// remains in `balloting_state['voted']`. A no-op once the value has
    /// moved on to `accepted`/`confirmed`, or if nothing is nomination-
    /// confirmed yet.
    pub fn prepare_ballot(&mut self) {
        if self.nom_confirmed.is_empty() {
            return;
        }
        let val_hash = self.nom_confirmed.hash();
        if self.prepare_accepted.contains_key(&val_hash) || self.prepare_confirmed.contains_key(&val_hash) {
            return;
        }
        self.start_prepare(self.nom_confirmed.clone());
    }

    /// Applies an incoming `Prepare(ballot)` from `from` against whatever
    /// this node currently has in `prepare_voted`/`prepare_accepted`.
    /// Mirrors `process_prepare_ballot_message`'s four cases:
    ///   1. same value already voted, higher counter -> adopt, record
    ///      voter+accepter.
    ///   2. different value, higher counter than some locally voted ballot
    ///      -> abort stale ballots, adopt.
    ///   3. same value already voted, lower/equal counter -> record sender
    ///      only, against the still-active local ballot.
    ///   4. different value, not higher than any locally voted ballot ->
    ///      mark the incoming ballot locally aborted.
    pub fn process_prepare_message(&mut self, from: NodeId, incoming: Ballot) {
        let val_hash = incoming.value.hash();

        if incoming.value.fully_contained_in(&self.finalised_transactions) {
            debug!("{}: ignoring prepare ballot for already-finalized value, purging stale state", self.id);
            self.reset_prepare_phase_state(val_hash);
            return;
        }

        if let Some(current) = self.prepare_voted.get(&val_hash).cloned() {
            if incoming.counter > current.counter {
                self.prepare_voted.insert(val_hash, incoming.clone());
                let counter = self.prep_counter(incoming.clone());
                counter.record_vote(from.clone());
                counter.record_accept(from);
                self.refresh_prepare_broadcast(&incoming);
            } else {
                let counter = self.prep_counter(current.clone());
                counter.record_vote(from.clone());
                counter.record_accept(from);
            }
        } else {
            let any_lower = self.prepare_voted.values().any(|v| incoming.counter > v.counter);
            if any_lower {
                self.abort_ballots(&incoming);
                self.prepare_voted.insert(val_hash, incoming.clone());
                let counter = self.prep_counter(incoming.clone());
                counter.record_vote(from.clone());
                counter.record_accept(from);
                self.refresh_prepare_broadcast(&incoming);
            } else {
                self.prepare_aborted.insert(val_hash, incoming.clone());
                self.prep_counter(incoming.clone()).record_abort(from);
            }
        }

        self.check_prepare_quorum_for(&incoming);
        self.apply_prepare_vblocking_sweep(&incoming);
    }

    /// Moves every tracked ballot in `voted`/`accepted` with a lower
    /// counter than `received` AND a different value into `aborted`.
    /// Mirrors `abort_ballots`.
    fn abort_ballots(&mut self, received: &Ballot) {
        let voted_stale: Vec<ValueHash> = self
            .prepare_voted
            .iter()
            .filter(|(hash, b)| **hash != received.value.hash() && b.counter < received.counter)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in voted_stale {
            if let Some(ballot) = self.prepare_voted.remove(&hash) {
                self.prepare_aborted.insert(hash, ballot);
            }
        }

        let accepted_stale: Vec<ValueHash> = self
            .prepare_accepted
            .iter()
            .filter(|(hash, b)| **hash != received.value.hash() && b.counter < received.counter)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in accepted_stale {
            if let Some(ballot) = self.prepare_accepted.remove(&hash) {
                self.prepare_aborted.insert(hash, ballot);
            }
        }
    }

    /// Unconditional forced abort-and-adopt: independent of whether
    /// `received` also cleared the quorum-threshold promotion above, any
    /// other currently voted ballot is aborted and `received` installed as
    /// voted the moment enough peers have signed it to make it v-blocking.
    fn apply_prepare_vblocking_sweep(&mut self, received: &Ballot) {
        let val_hash = received.value.hash();
        let signed = self.prep_counters.get(received).map(StatementCounter::signed).unwrap_or_default();
        if !self.quorum_set.blocking_threshold_met(&self.id, &signed) {
            return;
        }
        let has_other_voted = self.prepare_voted.keys().any(|h| *h != val_hash);
        if !has_other_voted {
            return;
        }
        info!("{}: {:?} v-blocks other voted ballots, aborting them", self.id, received);
        self.abort_ballots(received);
        self.prepare_voted.entry(val_hash).or_insert_with(|| received.clone());
        self.refresh_prepare_broadcast(received);
    }

    fn prepare_voted_to_accepted(&mut self, val_hash: ValueHash) {
        if self.prepare_accepted.contains_key(&val_hash) {
            return;
        }
        if let Some(ballot) = self.prepare_voted.remove(&val_hash) {
            info!("{}: ballot counter {} prepare-accepted", self.id, ballot.counter);
            self.prepare_accepted.insert(val_hash, ballot);
        }
    }

    fn prepare_accepted_to_confirmed(&mut self, val_hash: ValueHash) {
        if self.prepare_confirmed.contains_key(&val_hash) {
            return;
        }
        if let Some(ballot) = self.prepare_accepted.remove(&val_hash) {
            let record = self.prepared_records.entry(val_hash).or_default();
            record.c_counter = ballot.counter;
            record.h_counter = ballot.counter;
            info!("{}: ballot counter {} prepare-confirmed", self.id, ballot.counter);
            self.prepare_confirmed.insert(val_hash, ballot.clone());
            self.begin_commit_phase(ballot);
        }
    }

    pub(crate) fn check_prepare_quorum_for(&mut self, ballot: &Ballot) {
        let val_hash = ballot.value.hash();
        if !self.prepare_voted.contains_key(&val_hash) && !self.prepare_accepted.contains_key(&val_hash) {
            return;
        }
        let signed = self.prep_counters.get(ballot).map(StatementCounter::signed).unwrap_or_default();
        let self_signed = signed.contains(&self.id);
        if self.quorum_set.quorum_threshold_met(&self.id, self_signed, &signed) {
            if self.prepare_voted.contains_key(&val_hash) {
                self.prepare_voted_to_accepted(val_hash);
            } else if self.prepare_accepted.contains_key(&val_hash) {
                self.prepare_accepted_to_confirmed(val_hash);
            }
        }
    }

    fn refresh_prepare_broadcast(&mut self, ballot: &Ballot) {
        let val_hash = ballot.value.hash();
        let record = self.prepared_records.entry(val_hash).or_default();
        record.a_counter = ballot.counter;
        let record = *record;
        self.prepare_broadcast = Some(Prepare {
            ballot: ballot.clone(),
            a_counter: record.a_counter,
            c_counter: record.c_counter,
            h_counter: record.h_counter,
        });
    }

    /// Pulls one unseen `Prepare` envelope from a randomly chosen quorum
    /// peer and applies it. "Unseen" means the peer's latest broadcast
    /// ballot differs from what was last pulled from it. Mirrors
    /// `receive_prepare_message`.
    pub fn receive_prepare<R: Rng>(&mut self, peers: &dyn PrepareSource, rng: &mut R) {
        let candidates: Vec<NodeId> = self
            .quorum_set
            .distinct_peers_excluding(&self.id)
            .into_iter()
            .filter(|p| {
                peers
                    .latest_prepare(p)
                    .map_or(false, |e| self.seen_prepare.get(p) != Some(&e.statement.ballot))
            })
            .collect();
        let Some(peer) = super::node::pick_peer(&candidates, rng) else {
            return;
        };
        let Some(envelope) = peers.latest_prepare(&peer) else {
            return;
        };
        self.seen_prepare.insert(peer.clone(), envelope.statement.ballot.clone());
        let incoming = envelope.statement.ballot;
        if incoming.value.fully_contained_in(&self.finalised_transactions) {
            debug!("{}: ignoring pulled prepare ballot for already-finalized value, purging stale state", self.id);
            self.reset_prepare_phase_state(incoming.value.hash());
            return;
        }
        self.process_prepare_message(envelope.from, incoming);
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
    fn higher_counter_same_value_adopts() {
        let mut n = engine("a", &["a", "b", "c"], 67);
        n.start_prepare(val(1));
        n.process_prepare_message("b".into(), Ballot::new(2, val(1)));
        assert_eq!(n.prepare_voted[&val(1).hash()].counter, 2);
    }

    #[test]
    fn different_value_higher_counter_aborts_then_adopts() {
        let mut n = engine("a", &["a", "b", "c"], 67);
        n.start_prepare(val(1));
        n.process_prepare_message("b".into(), Ballot::new(2, val(2)));
        assert!(n.prepare_voted.contains_key(&val(2).hash()));
        assert!(n.prepare_aborted.contains_key(&val(1).hash()));
    }

    #[test]
    fn different_value_lower_counter_is_locally_aborted_only() {
        let mut n = engine("a", &["a", "b", "c"], 67);
        n.start_prepare(val(1));
        // bump to counter 3 so the incoming counter-1 ballot is strictly lower
        n.process_prepare_message("a".into(), Ballot::new(3, val(1)));
        n.process_prepare_message("b".into(), Ballot::new(1, val(2)));
        assert!(n.prepare_voted.contains_key(&val(1).hash()));
        assert!(n.prepare_aborted[&val(2).hash()] == Ballot::new(1, val(2)));
    }

    #[test]
    fn v_blocking_prepare_forces_abort_and_adopt_independent_of_quorum() {
        // 4 validators, 75% threshold: quorum needs all 4 signed, but
        // v-blocking only needs more than n-k = 0 signers beyond self, i.e.
        // a single other signer already blocks.
        let mut n = engine("a", &["a", "b", "c", "d"], 100);
        n.start_prepare(val(1));
        // A single peer voting for a different, higher-counter ballot is
        // enough to v-block without ever reaching full quorum.
        n.process_prepare_message("b".into(), Ballot::new(2, val(2)));
        assert!(n.prepare_voted.contains_key(&val(2).hash()));
        assert!(!n.prepare_voted.contains_key(&val(1).hash()));
        assert!(n.prepare_aborted.contains_key(&val(1).hash()));
    }

    #[test]
    fn process_prepare_message_for_finalized_value_purges_instead_of_applying() {
        let mut n = engine("a", &["a", "b", "c"], 67);
        n.start_prepare(val(1));
        n.finalised_transactions.insert(Transaction::from_hash([1; 32]).hash());

        n.process_prepare_message("b".into(), Ballot::new(9, val(1)));

        assert!(
            !n.prepare_voted.contains_key(&val(1).hash()),
            "a ballot for an already-finalized value must be purged, not adopted"
        );
        assert!(n.prepare_broadcast.is_none());
    }
}
