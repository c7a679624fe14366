//! `PeerRegistry`: looks peers up by stable name instead of the teacher's
//! cyclic `Arc<Mutex<Weak<Node>>>` references (spec.md §9 Design Notes,
//! "Cyclic peer references"). Every node's latest broadcast statement per
//! phase lives here, which is what makes the pull model
//! (`NominationSource`/`PrepareSource`/`CommitSource`/`ExternalizeSource`)
//! possible without nodes holding references to each other at all.

use std::collections::BTreeMap;

use crate::scp::messages::{Commit, Envelope, Externalize, Nominate, Prepare};
use crate::scp::node::NominationSource;
use crate::scp::quorum::NodeId;
use crate::scp::{commit::CommitSource, externalize::ExternalizeSource, prepare::PrepareSource};

/// The set of every node's latest broadcast, addressed by name. The driver
/// writes into this once per node per tick; nodes only ever read from it
/// through the `*Source` traits below.
#[derive(Default)]
pub struct PeerRegistry {
    nominate: BTreeMap<NodeId, Nominate>,
    prepare: BTreeMap<NodeId, Envelope<Prepare>>,
    commit: BTreeMap<NodeId, Envelope<Commit>>,
    externalize: BTreeMap<NodeId, Envelope<Externalize>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_nominate(&mut self, from: NodeId, statement: Nominate) {
        self.nominate.insert(from, statement);
    }

    pub fn publish_prepare(&mut self, from: NodeId, statement: Prepare) {
        self.prepare.insert(from.clone(), Envelope::new(from, statement));
    }

    pub fn publish_commit(&mut self, from: NodeId, statement: Commit) {
        self.commit.insert(from.clone(), Envelope::new(from, statement));
    }

    pub fn publish_externalize(&mut self, envelope: Envelope<Externalize>) {
        self.externalize.insert(envelope.from.clone(), envelope);
    }
}

impl NominationSource for PeerRegistry {
    fn latest_nominate(&self, peer: &str) -> Option<Nominate> {
        self.nominate.get(peer).cloned()
    }
}

impl PrepareSource for PeerRegistry {
    fn latest_prepare(&self, peer: &str) -> Option<Envelope<Prepare>> {
        self.prepare.get(peer).cloned()
    }
}

impl CommitSource for PeerRegistry {
    fn latest_commit(&self, peer: &str) -> Option<Envelope<Commit>> {
        self.commit.get(peer).cloned()
    }
}

impl ExternalizeSource for PeerRegistry {
    fn latest_externalize(&self, peer: &str) -> Option<Envelope<Externalize>> {
        self.externalize.get(peer).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scp::transaction::Transaction;
    use crate::scp::value::Value;

    #[test]
    fn publish_then_pull_round_trips() {
        let mut reg = PeerRegistry::new();
        let nominate = Nominate {
            voted: Value::new([Transaction::new(b"tx-1")]),
            accepted: Value::empty(),
            confirmed: Value::empty(),
        };
        reg.publish_nominate("node-a".to_string(), nominate.clone());
        assert_eq!(reg.latest_nominate("node-a"), Some(nominate));
        assert!(reg.latest_nominate("node-b").is_none());
    }
}
