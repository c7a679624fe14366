//! The single-threaded cooperative simulation driver. Each tick advances
//! the clock, lets every node pull fresh mempool transactions, run one
//! round of nominate/prepare/commit/externalize message exchange, and
//! publish whatever it produced back to the shared `PeerRegistry`. Spec.md
//! §5 rules out a multi-threaded/async driver in favor of this
//! deterministic, single-stepped model.

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::application::{InMemoryMempool, Mempool, SimClock};
use crate::overlay::{PeerRegistry, Topology};
use crate::scp::node::NodeEngine;
use crate::scp::transaction::Transaction;

pub struct Driver {
    pub nodes: Vec<NodeEngine>,
    pub registry: PeerRegistry,
    pub clock: SimClock,
    pub mempool: Box<dyn Mempool>,
    rng: StdRng,
}

impl Driver {
    pub fn new(topology: &Topology, seed: u64) -> Self {
        let nodes = topology
            .nodes
            .iter()
            .map(|spec| NodeEngine::new(spec.id.clone(), Topology::quorum_set(spec)))
            .collect();
        Self {
            nodes,
            registry: PeerRegistry::new(),
            clock: SimClock::new(),
            mempool: Box::new(InMemoryMempool::new()),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn submit_transaction(&mut self, payload: &[u8]) {
        self.mempool.submit(Transaction::new(payload));
    }

    /// Advances the simulation by one tick: pull new transactions into
    /// every node's queue, then run one round of each phase's
    /// nominate/receive step per node.
    pub fn tick(&mut self) {
        self.clock.tick();
        let now = self.clock.now();

        let fresh = self.mempool.drain_new();
        for node in &mut self.nodes {
            for tx in &fresh {
                node.enqueue_transaction(tx.clone());
            }
        }

        for node in &mut self.nodes {
            node.tick_round(now);
            node.nominate();
            // Re-invoked every tick, not just as one-shot promotion side
            // effects, so a ballot stuck without quorum still gets its
            // liveness counter bump / re-announcement.
            node.prepare_ballot();
            node.prepare_commit();
            if let Some(statement) = node.nominate_broadcast.clone() {
                self.registry.publish_nominate(node.id.clone(), statement);
            }
        }

        for node in &mut self.nodes {
            node.receive_nomination(&self.registry, &mut self.rng);
            node.receive_prepare(&self.registry, &mut self.rng);
            node.receive_commit(&self.registry, &mut self.rng);
            node.receive_externalize(&self.registry, &mut self.rng);

            if let Some(prepare) = node.prepare_broadcast.clone() {
                self.registry.publish_prepare(node.id.clone(), prepare);
            }
            if let Some(commit) = node.commit_broadcast.clone() {
                self.registry.publish_commit(node.id.clone(), commit);
            }
            if let Some(externalize) = node.externalize_broadcast.clone() {
                self.registry.publish_externalize(externalize);
            }
            for tx in node.drain_pending_mempool_removals() {
                self.mempool.remove(&tx);
            }
        }
    }

    /// Runs up to `ticks` ticks, stopping early once every node has
    /// externalized at least one slot.
    pub fn run(&mut self, ticks: u64) {
        let mut elapsed = 0;
        for _ in 0..ticks {
            self.tick();
            elapsed += 1;
            if self.nodes.iter().all(|n| !n.ledger.is_empty()) {
                break;
            }
        }
        info!(
            "driver finished after {} of {} ticks: {} nodes at slot(s) {:?}",
            elapsed,
            ticks,
            self.nodes.len(),
            self.nodes.iter().map(|n| (n.id.clone(), n.slot)).collect::<Vec<_>>()
        );
    }
}
