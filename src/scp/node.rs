//! `NodeEngine`: the per-node SCP state machine. Holds everything a single
//! validator needs to run nomination, ballot (prepare/commit), and
//! externalize for its current slot. Grounded on the `Node` class in
//! `Node.py`, with peer lookups taken through a `PeerRegistry` by stable
//! name instead of cyclic `Arc<Mutex<..>>` references, and the simulation
//! clock taken as an explicit parameter rather than read off global state.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use log::{debug, info};
use rand::Rng;

use super::ballot::Ballot;
use super::messages::{Commit, Envelope, Externalize, Nominate, Prepare};
use super::prepare::PrepareRecord;
use super::quorum::{NodeId, QuorumSet};
use super::statement::StatementCounter;
use super::transaction::{Transaction, TxHash};
use super::value::{Value, ValueHash, ValueState};

/// Upper bound on transactions pulled into a single nomination value per
/// call to `nominate`.
pub const MAX_SLOT_TXS: usize = 200;

pub struct NodeEngine {
    pub id: NodeId,
    pub quorum_set: QuorumSet,

    pub slot: u64,
    pub nomination_round: u64,
    pub last_nomination_start_time: u64,
    /// Current simulated time, set by `tick_round`; stamped onto
    /// Externalize envelopes.
    pub now: u64,

    // --- nomination phase ---
    pub nom_voted: Value,
    pub nom_accepted: Value,
    pub nom_confirmed: Value,
    pub nom_counters: BTreeMap<ValueHash, StatementCounter>,
    pub nominate_broadcast: Option<Nominate>,
    tx_queue: VecDeque<Transaction>,
    queued_hashes: HashSet<TxHash>,

    // --- ballot (prepare) phase: a value can be voted, accepted, confirmed
    // or aborted concurrently with other values, so each bucket is its own
    // value-hash-keyed map rather than a single active ballot.
    pub prepare_voted: BTreeMap<ValueHash, Ballot>,
    pub prepare_accepted: BTreeMap<ValueHash, Ballot>,
    pub prepare_confirmed: BTreeMap<ValueHash, Ballot>,
    pub prepare_aborted: BTreeMap<ValueHash, Ballot>,
    pub prep_counters: BTreeMap<Ballot, StatementCounter>,
    /// aCounter/cCounter/hCounter bookkeeping per value, carried across
    /// Prepare broadcasts for that value.
    pub prepared_records: BTreeMap<ValueHash, PrepareRecord>,
    pub prepare_broadcast: Option<Prepare>,

    // --- commit phase ---
    pub commit_voted: BTreeMap<ValueHash, Ballot>,
    pub commit_accepted: BTreeMap<ValueHash, Ballot>,
    pub commit_confirmed: BTreeMap<ValueHash, Ballot>,
    pub commit_counters: BTreeMap<Ballot, StatementCounter>,
    pub commit_broadcast: Option<Commit>,

    // --- externalize phase ---
    pub externalize_broadcast: Option<Envelope<Externalize>>,
    pub externalized_slot_counter: BTreeMap<u64, BTreeSet<NodeId>>,
    pub finalised_transactions: HashSet<TxHash>,
    // Transactions finalized since the last drain, waiting for the driver
    // to remove them from the shared mempool. `NodeEngine` has no handle
    // to the mempool itself, so finalization only queues the removal here;
    // `Driver::tick` is what actually calls `Mempool::remove`.
    pub(crate) pending_mempool_removals: Vec<Transaction>,

    pub ledger: crate::ledger::Ledger,

    // Per-peer last-pulled statement, keyed by peer name, so a repeat pull
    // of unchanged content is a no-op but a peer's updated broadcast is
    // still picked up. `pub(crate)` so the sibling `prepare`/`commit`/
    // `externalize` modules can maintain their own phase's map.
    seen_nominate: BTreeMap<NodeId, Nominate>,
    pub(crate) seen_prepare: BTreeMap<NodeId, Ballot>,
    pub(crate) seen_commit: BTreeMap<NodeId, Ballot>,
    pub(crate) seen_externalize: BTreeMap<NodeId, Externalize>,
}

impl NodeEngine {
    pub fn new(id: NodeId, quorum_set: QuorumSet) -> Self {
        Self {
            id,
            quorum_set,
            slot: 1,
            nomination_round: 1,
            last_nomination_start_time: 0,
            now: 0,
            nom_voted: Value::empty(),
            nom_accepted: Value::empty(),
            nom_confirmed: Value::empty(),
            nom_counters: BTreeMap::new(),
            nominate_broadcast: None,
            tx_queue: VecDeque::new(),
            queued_hashes: HashSet::new(),
            prepare_voted: BTreeMap::new(),
            prepare_accepted: BTreeMap::new(),
            prepare_confirmed: BTreeMap::new(),
            prepare_aborted: BTreeMap::new(),
            prep_counters: BTreeMap::new(),
            prepared_records: BTreeMap::new(),
            prepare_broadcast: None,
            commit_voted: BTreeMap::new(),
            commit_accepted: BTreeMap::new(),
            commit_confirmed: BTreeMap::new(),
            commit_counters: BTreeMap::new(),
            commit_broadcast: None,
            externalize_broadcast: None,
            externalized_slot_counter: BTreeMap::new(),
            finalised_transactions: HashSet::new(),
            pending_mempool_removals: Vec::new(),
            ledger: crate::ledger::Ledger::new(),
            seen_nominate: BTreeMap::new(),
            seen_prepare: BTreeMap::new(),
            seen_commit: BTreeMap::new(),
            seen_externalize: BTreeMap::new(),
        }
    }

    /// Enqueues a transaction pulled from the mempool, deduping against
    /// transactions already queued or already finalised.
    pub fn enqueue_transaction(&mut self, tx: Transaction) {
        if self.finalised_transactions.contains(&tx.hash()) || self.queued_hashes.contains(&tx.hash()) {
            return;
        }
        self.queued_hashes.insert(tx.hash());
        self.tx_queue.push_back(tx);
    }

    fn drain_queue(&mut self, max: usize) -> Vec<Transaction> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.tx_queue.pop_front() {
                Some(tx) => {
                    self.queued_hashes.remove(&tx.hash());
                    if !self.finalised_transactions.contains(&tx.hash()) {
                        out.push(tx);
                    }
                }
                None => break,
            }
        }
        out
    }

    /// Advances the nomination round if the current one has timed out.
    /// Round `r` lasts `1 + r` seconds from `last_nomination_start_time`.
    pub fn tick_round(&mut self, now: u64) {
        self.now = now;
        if self.last_nomination_start_time == 0 {
            self.last_nomination_start_time = now;
            return;
        }
        let round_len = 1 + self.nomination_round;
        if now > self.last_nomination_start_time + round_len {
            self.nomination_round += 1;
            self.last_nomination_start_time = now;
        }
    }

    pub fn priority_weight(&self, candidate: &str, round: u64) -> f64 {
        let hash = super::hash::g(self.slot, 2, round, candidate);
        super::hash::unit_interval(&hash)
    }

    /// `v` is a neighbor of this node for `round` iff
    /// `G(1, round, v) < 2^256 * weight(v)`. Self is always a neighbor,
    /// since `weight(self) == 1.0`.
    fn is_neighbor(&self, peer: &str, round: u64) -> bool {
        if peer == self.id {
            return true;
        }
        let weight = self.quorum_set.weight(peer, &self.id);
        let neighbor_hash = super::hash::g(self.slot, 1, round, peer);
        super::hash::below_weight(&neighbor_hash, weight)
    }

    /// This node's priority list for `round`: itself, plus every quorum
    /// member that is currently a neighbor. Mirrors `Node.py`'s
    /// `set_priority_list`.
    pub fn priority_list(&self, round: u64) -> BTreeSet<NodeId> {
        let mut list: BTreeSet<NodeId> = BTreeSet::new();
        list.insert(self.id.clone());
        for peer in self.quorum_set.distinct_peers_excluding(&self.id) {
            if self.is_neighbor(&peer, round) {
                list.insert(peer);
            }
        }
        list
    }

    /// Highest-priority peer, among this node and its quorum slice members,
    /// that is also a neighbor for `round`.
    pub fn highest_priority_neighbor(&self, round: u64) -> Option<NodeId> {
        self.priority_list(round)
            .into_iter()
            .filter(|peer| peer != &self.id)
            .map(|peer| {
                let priority = self.priority_weight(&peer, round);
                (peer, priority)
            })
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(peer, _)| peer)
    }

    fn counter_for_value(&mut self, hash: ValueHash) -> &mut StatementCounter {
        self.nom_counters.entry(hash).or_insert_with(StatementCounter::new)
    }

    /// Pulls any newly queued transactions into `nom_voted`, then re-checks
    /// whether the current `nom_voted`/`nom_accepted` contents clear the
    /// next promotion gate. The pull step is a no-op with nothing new
    /// queued, but the promotion check still runs against whatever is
    /// already held — since `promote_if_threshold_met` only ever advances
    /// one level per call, reaching `confirmed` for a value that was
    /// promoted to `accepted` on a prior call takes one further `nominate()`
    /// call with no new transactions required. Mirrors
    /// `nominate`/`prepare_nomination_msg`.
    pub fn nominate(&mut self) {
        if !self.priority_list(self.nomination_round).contains(&self.id) {
            // Never actually reachable: weight(self) == 1.0 always makes
            // self a neighbor of itself. Kept as the explicit gate the
            // priority-list invariant describes.
            return;
        }
        let pulled = self.drain_queue(MAX_SLOT_TXS);
        let pulled: Vec<Transaction> = pulled
            .into_iter()
            .filter(|tx| !self.finalised_transactions.contains(&tx.hash()))
            .collect();
        if !pulled.is_empty() {
            let candidate = Value::new(pulled);
            let already_tracked =
                candidate == self.nom_voted || candidate == self.nom_accepted || candidate == self.nom_confirmed;
            if !already_tracked {
                let merged = Value::combine([&self.nom_voted, &candidate]).capped(MAX_SLOT_TXS);
                self.nom_voted = merged;
                self.counter_for_value(self.nom_voted.hash()).record_vote(self.id.clone());
            }
        }
        if self.nom_voted.is_empty() {
            return;
        }
        self.promote_if_threshold_met(self.nom_voted.hash());
        self.refresh_nominate_broadcast();
        debug!("{}: nominated value {}", self.id, hex(&self.nom_voted.hash()));
    }

    /// Promotes `value_hash` by one level — voted->accepted or
    /// accepted->confirmed — per call. Both gates are checked against the
    /// bucket contents as they stood at the start of the call, so promoting
    /// voted->accepted here does not also let the now-equal accepted bucket
    /// immediately clear the confirm gate in the same call: the accepted
    /// side of that gate is read from `accepted_before`, not from
    /// `self.nom_accepted` after the mutation above it. Mirrors
    /// `nominate()`'s two independent `update_nomination_state` calls
    /// against one `prepare_nomination_msg()` snapshot.
    fn promote_if_threshold_met(&mut self, value_hash: ValueHash) {
        let signed = self.nom_counters.get(&value_hash).map(|c| c.signed()).unwrap_or_default();
        let self_signed = signed.contains(&self.id);
        if !self.quorum_set.quorum_threshold_met(&self.id, self_signed, &signed) {
            if self.quorum_set.blocking_threshold_met(&self.id, &signed) {
                debug!("{}: nomination value is v-blocked, not force-promoting", self.id);
            }
            return;
        }

        let accepted_before = self.nom_accepted.clone();
        if self.nom_voted.hash() == value_hash && self.nom_accepted != self.nom_voted {
            self.nom_accepted = self.nom_voted.clone().with_state(ValueState::Accepted);
            info!("{}: value accepted in nomination", self.id);
        }
        if accepted_before.hash() == value_hash && self.nom_confirmed != accepted_before {
            self.nom_confirmed = accepted_before.with_state(ValueState::Confirmed);
            info!("{}: value confirmed in nomination", self.id);
            self.start_prepare(self.nom_confirmed.clone());
        }
    }

    fn refresh_nominate_broadcast(&mut self) {
        self.nominate_broadcast = Some(Nominate {
            voted: self.nom_voted.clone(),
            accepted: self.nom_accepted.clone(),
            confirmed: self.nom_confirmed.clone(),
        });
    }

    /// Pulls one unseen `Nominate` statement from a uniformly sampled peer
    /// drawn from the current round's priority list (not the whole quorum
    /// set), mirroring `receive_nomination_message`'s iteration over
    /// `self.priority_list`. "Unseen" means the peer's latest broadcast
    /// differs from what was last pulled from it, not merely that the peer
    /// has never been pulled from before.
    pub fn receive_nomination<R: Rng>(&mut self, peers: &dyn NominationSource, rng: &mut R) {
        let candidates: Vec<NodeId> = self
            .priority_list(self.nomination_round)
            .into_iter()
            .filter(|p| p != &self.id)
            .filter(|p| peers.latest_nominate(p).map_or(false, |n| self.seen_nominate.get(p) != Some(&n)))
            .collect();
        let Some(peer) = pick_peer(&candidates, rng) else {
            return;
        };
        let Some(nominate) = peers.latest_nominate(&peer) else {
            return;
        };
        self.seen_nominate.insert(peer.clone(), nominate.clone());

        for (value, bucket) in [
            (&nominate.voted, Bucket::Voted),
            (&nominate.accepted, Bucket::Accepted),
        ] {
            if value.is_empty() {
                continue;
            }
            let pruned = match value.pruned(&self.finalised_transactions) {
                Some(v) => v,
                None => continue,
            };
            match bucket {
                Bucket::Voted => {
                    let merged = Value::combine([&self.nom_voted, &pruned]).capped(MAX_SLOT_TXS);
                    if merged != self.nom_voted {
                        self.nom_voted = merged;
                    }
                }
                Bucket::Accepted => {
                    let merged = Value::combine([&self.nom_accepted, &pruned]).capped(MAX_SLOT_TXS);
                    if merged != self.nom_accepted {
                        self.nom_accepted = merged;
                    }
                }
            }
            let counter = self.counter_for_value(pruned.hash());
            match bucket {
                Bucket::Voted => counter.record_vote(peer.clone()),
                Bucket::Accepted => counter.record_accept(peer.clone()),
            }
            self.promote_if_threshold_met(pruned.hash());
        }
        self.refresh_nominate_broadcast();
    }

    /// Drains the transactions finalized since the last drain, for the
    /// driver to remove from the shared mempool.
    pub fn drain_pending_mempool_removals(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.pending_mempool_removals)
    }
}

#[derive(PartialEq, Eq)]
enum Bucket {
    Voted,
    Accepted,
}

/// What `receive_nomination` needs from the overlay: the latest broadcast
/// statement of a peer, pull-style.
pub trait NominationSource {
    fn latest_nominate(&self, peer: &str) -> Option<Nominate>;
}

pub(crate) fn pick_peer<R: Rng>(candidates: &[NodeId], rng: &mut R) -> Option<NodeId> {
    if candidates.is_empty() {
        return None;
    }
    let idx = rng.gen_range(0..candidates.len());
    Some(candidates[idx].clone())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::quorum::ThresholdFraction;

    fn engine(id: &str, validators: &[&str]) -> NodeEngine {
        let q = QuorumSet::flat(ThresholdFraction(67), validators.iter().map(|s| s.to_string()).collect());
        NodeEngine::new(id.to_string(), q)
    }

    #[test]
    fn nominate_with_empty_queue_is_noop() {
        let mut n = engine("a", &["a", "b", "c"]);
        n.nominate();
        assert!(n.nom_voted.is_empty());
        assert!(n.nominate_broadcast.is_none());
    }

    #[test]
    fn nominate_builds_voted_value_from_queue() {
        let mut n = engine("a", &["a", "b", "c"]);
        n.enqueue_transaction(Transaction::new(b"tx-1"));
        n.nominate();
        assert_eq!(n.nom_voted.len(), 1);
        assert!(n.nominate_broadcast.is_some());
    }

    #[test]
    fn single_node_quorum_accepts_but_does_not_confirm_in_one_call() {
        // A quorum set containing only the owner: self-signed is enough to
        // clear the first gate, but a single call only promotes one level.
        let q = QuorumSet::flat(ThresholdFraction(100), vec!["a".to_string()]);
        let mut n = NodeEngine::new("a".to_string(), q);
        n.enqueue_transaction(Transaction::new(b"solo"));
        n.nominate();
        assert_eq!(n.nom_accepted, n.nom_voted);
        assert!(n.nom_confirmed.is_empty());
        assert!(n.prepare_voted.is_empty());
    }

    #[test]
    fn single_node_quorum_confirms_on_second_call() {
        let q = QuorumSet::flat(ThresholdFraction(100), vec!["a".to_string()]);
        let mut n = NodeEngine::new("a".to_string(), q);
        n.enqueue_transaction(Transaction::new(b"solo"));
        n.nominate();
        n.nominate();
        assert_eq!(n.nom_confirmed, n.nom_accepted);
        assert!(
            !n.prepare_voted.is_empty(),
            "confirming a value should kick off the ballot protocol"
        );
    }

    #[test]
    fn priority_list_always_contains_self() {
        let n = engine("a", &["a", "b", "c"]);
        for round in 1..10 {
            assert!(n.priority_list(round).contains("a"));
        }
    }

    #[test]
    fn highest_priority_neighbor_never_returns_self() {
        let n = engine("a", &["a", "b", "c"]);
        for round in 1..10 {
            if let Some(peer) = n.highest_priority_neighbor(round) {
                assert_ne!(peer, "a");
            }
        }
    }

    struct StubRegistry(std::collections::BTreeMap<NodeId, Nominate>);

    impl NominationSource for StubRegistry {
        fn latest_nominate(&self, peer: &str) -> Option<Nominate> {
            self.0.get(peer).cloned()
        }
    }

    #[test]
    fn receive_nomination_skips_peers_with_unchanged_broadcast() {
        // "b" named as the sole member of a lone inner set gives it
        // weight 1.0 (one top-level slice out of one), so it is always a
        // neighbor regardless of round, isolating the "seen" dedup
        // behaviour from priority-list hash luck.
        let q = QuorumSet::new(
            ThresholdFraction(100),
            Vec::new(),
            vec![QuorumSet::flat(ThresholdFraction(100), vec!["b".to_string()])],
        );
        let mut n = NodeEngine::new("a".to_string(), q);
        let nominate = Nominate {
            voted: Value::new([Transaction::new(b"tx-1")]),
            accepted: Value::empty(),
            confirmed: Value::empty(),
        };
        let mut registry = StubRegistry(std::collections::BTreeMap::new());
        registry.0.insert("b".to_string(), nominate.clone());

        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        n.receive_nomination(&registry, &mut rng);
        assert_eq!(n.nom_voted, nominate.voted);

        // Same content again: peer "b" must not be picked a second time,
        // since nothing changed since it was last pulled.
        n.nom_voted = Value::empty();
        n.receive_nomination(&registry, &mut rng);
        assert!(n.nom_voted.is_empty(), "unchanged broadcast should not be re-pulled");

        // An updated broadcast from "b" is pulled again.
        let updated = Nominate {
            voted: Value::new([Transaction::new(b"tx-1"), Transaction::new(b"tx-2")]),
            accepted: Value::empty(),
            confirmed: Value::empty(),
        };
        registry.0.insert("b".to_string(), updated.clone());
        n.receive_nomination(&registry, &mut rng);
        assert_eq!(n.nom_voted, updated.voted);
    }

    #[test]
    fn receive_nomination_accepted_only_merges_into_local_accepted_bucket() {
        // Regression: the Accepted branch of the per-bucket loop used to
        // fall through to the Voted merge unconditionally, so a peer's
        // accepted-only statement never reached `nom_accepted` and could
        // never clear the confirm gate on its own.
        let q = QuorumSet::new(
            ThresholdFraction(100),
            Vec::new(),
            vec![QuorumSet::flat(ThresholdFraction(100), vec!["b".to_string()])],
        );
        let mut n = NodeEngine::new("a".to_string(), q);
        let value = Value::new([Transaction::new(b"tx-1")]);
        let nominate = Nominate {
            voted: Value::empty(),
            accepted: value.clone(),
            confirmed: Value::empty(),
        };
        let mut registry = StubRegistry(std::collections::BTreeMap::new());
        registry.0.insert("b".to_string(), nominate);
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);

        n.receive_nomination(&registry, &mut rng);

        assert_eq!(n.nom_accepted, value, "peer's accepted-only value must merge into nom_accepted");
        assert!(n.nom_voted.is_empty(), "an accepted-only statement must not also populate nom_voted");
    }
}
