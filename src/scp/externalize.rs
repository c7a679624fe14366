//! Externalize phase: finalizing a ballot for the current slot, appending
//! it to the ledger, and resetting all per-slot state for the next one.
//! Grounded on `prepare_Externalize_msg` / `receive_Externalize_msg` /
//! `process_externalize_msg` in `Node.py`.

use std::collections::HashSet;

use rand::Rng;

use super::ballot::Ballot;
use super::messages::{Envelope, Externalize};
use super::node::NodeEngine;
use super::quorum::NodeId;
use super::transaction::TxHash;
use super::value::Value;

pub trait ExternalizeSource {
    fn latest_externalize(&self, peer: &str) -> Option<Envelope<Externalize>>;
}

impl NodeEngine {
    /// Finalizes `ballot` for the current slot: writes it to the ledger
    /// (write-once per slot -- a no-op if this slot is already recorded),
    /// broadcasts the Externalize statement, and resets nomination/prepare/
    /// commit state for the next slot. Mirrors `prepare_Externalize_msg`.
    pub(super) fn prepare_externalize(&mut self, ballot: Ballot) {
        if !self.ledger.insert(self.slot, ballot.clone()) {
            return;
        }
        self.externalize_broadcast = Some(Envelope::new(
            self.id.clone(),
            Externalize {
                slot: self.slot,
                ballot: ballot.clone(),
                h_counter: ballot.counter,
                timestamp: self.now,
            },
        ));
        self.externalized_slot_counter
            .entry(self.slot)
            .or_default()
            .insert(self.id.clone());
        self.finalize_and_advance(ballot);
    }

    /// Pulls one unseen `(slot, Externalize)` envelope from a random peer.
    /// Discards it if the slot is already in our ledger, or (no catch-up,
    /// an observed simplification of the source this was distilled from)
    /// if it names a slot other than the one we are currently working.
    pub fn receive_externalize<R: Rng>(&mut self, peers: &dyn ExternalizeSource, rng: &mut R) {
        let candidates: Vec<NodeId> = self
            .quorum_set
            .distinct_peers_excluding(&self.id)
            .into_iter()
            .filter(|p| {
                peers
                    .latest_externalize(p)
                    .map_or(false, |e| self.seen_externalize.get(p) != Some(&e.statement))
            })
            .collect();
        let Some(peer) = super::node::pick_peer(&candidates, rng) else {
            return;
        };
        let Some(envelope) = peers.latest_externalize(&peer) else {
            return;
        };
        self.seen_externalize.insert(peer.clone(), envelope.statement.clone());

        let Externalize { slot, ballot, .. } = envelope.statement;
        if self.ledger.contains_key(&slot) {
            return;
        }
        if slot != self.slot {
            return;
        }
        self.externalized_slot_counter.entry(slot).or_default().insert(envelope.from);
        if !self.ledger.insert(slot, ballot.clone()) {
            return;
        }
        self.finalize_and_advance(ballot);
    }

    /// Full per-phase purge and slot advancement, run once a ballot has
    /// actually been recorded in the ledger (either by us, in
    /// `prepare_externalize`, or adopted from a peer in
    /// `receive_externalize`). Mirrors `process_externalize_msg`'s
    /// `reset_nomination_state` / `reset_prepare_ballot_phase` /
    /// `reset_commit_phase_state` / `remove_txs_from_mempool` sequence.
    fn finalize_and_advance(&mut self, ballot: Ballot) {
        let finalised_hashes: HashSet<TxHash> = ballot.value.transactions().iter().map(|tx| tx.hash()).collect();
        self.finalised_transactions.extend(finalised_hashes.iter().copied());
        self.pending_mempool_removals.extend(ballot.value.transactions().iter().cloned());

        self.reset_nomination_state();
        self.reset_prepare_phase_state(ballot.value.hash());
        self.reset_commit_phase_state(&finalised_hashes);

        self.slot += 1;
        self.nomination_round = 1;
        self.last_nomination_start_time = 0;
    }

    fn reset_nomination_state(&mut self) {
        self.nom_voted = Value::empty();
        self.nom_accepted = Value::empty();
        self.nom_confirmed = Value::empty();
        self.nom_counters.clear();
        self.nominate_broadcast = None;
    }

    /// Purges every prepare-phase entry (voted/accepted/confirmed/aborted
    /// buckets, statement counters, the carried aCounter/cCounter/hCounter
    /// record, the outbound broadcast, and per-peer "seen" bookkeeping)
    /// whose value hash matches the finalized ballot's value exactly.
    /// Mirrors `reset_prepare_ballot_phase`'s `value.hash == b_f.value.hash`
    /// condition.
    pub(super) fn reset_prepare_phase_state(&mut self, finalised_hash: super::value::ValueHash) {
        self.prepare_voted.remove(&finalised_hash);
        self.prepare_accepted.remove(&finalised_hash);
        self.prepare_confirmed.remove(&finalised_hash);
        self.prepare_aborted.remove(&finalised_hash);
        self.prep_counters.retain(|ballot, _| ballot.value.hash() != finalised_hash);
        self.prepared_records.remove(&finalised_hash);
        self.prepare_broadcast = None;
        self.seen_prepare.retain(|_, ballot| ballot.value.hash() != finalised_hash);
    }

    /// Purges every commit-phase entry or statement counter whose ballot's
    /// value shares any transaction with the finalized value. Overlap-based
    /// rather than exact-match, matching `reset_commit_phase_state`.
    pub(super) fn reset_commit_phase_state(&mut self, finalised_hashes: &HashSet<TxHash>) {
        self.commit_voted.retain(|_, b| !b.value.overlaps(finalised_hashes));
        self.commit_accepted.retain(|_, b| !b.value.overlaps(finalised_hashes));
        self.commit_confirmed.retain(|_, b| !b.value.overlaps(finalised_hashes));
        self.commit_counters.retain(|ballot, _| !ballot.value.overlaps(finalised_hashes));
        self.commit_broadcast = None;
        self.seen_commit.retain(|_, ballot| !ballot.value.overlaps(finalised_hashes));
    }
}
