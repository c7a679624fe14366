//! Network topology: which nodes exist and what quorum set each one runs.
//! The teacher's scratch `main.rs` hardwired a handful of nodes; here a
//! `Topology` can be built programmatically (a full mesh) or loaded from a
//! JSON config file for custom quorum arrangements (see `config.rs`).

use serde::{Deserialize, Serialize};

use crate::scp::quorum::{NodeId, QuorumSet, ThresholdFraction};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    pub threshold: u8,
    pub validators: Vec<NodeId>,
    #[serde(default)]
    pub inner_sets: Vec<InnerSetSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InnerSetSpec {
    pub threshold: u8,
    pub validators: Vec<NodeId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Topology {
    pub nodes: Vec<NodeSpec>,
}

impl Topology {
    /// A fully connected mesh of `n` nodes named `node-0..node-{n-1}`, each
    /// quorum set containing every other node at `threshold_pct`.
    pub fn full_mesh(n: usize, threshold_pct: u8) -> Self {
        let names: Vec<NodeId> = (0..n).map(|i| format!("node-{i}")).collect();
        let nodes = names
            .iter()
            .map(|id| NodeSpec {
                id: id.clone(),
                threshold: threshold_pct,
                validators: names.clone(),
                inner_sets: Vec::new(),
            })
            .collect();
        Self { nodes }
    }

    pub fn quorum_set(spec: &NodeSpec) -> QuorumSet {
        let inner_sets = spec
            .inner_sets
            .iter()
            .map(|inner| QuorumSet::flat(ThresholdFraction(inner.threshold), inner.validators.clone()))
            .collect();
        QuorumSet::new(ThresholdFraction(spec.threshold), spec.validators.clone(), inner_sets)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mesh_includes_every_peer_in_every_quorum_set() {
        let topo = Topology::full_mesh(4, 67);
        assert_eq!(topo.nodes.len(), 4);
        for spec in &topo.nodes {
            assert_eq!(spec.validators.len(), 4);
            assert!(spec.validators.contains(&spec.id));
        }
    }

    #[test]
    fn deserializes_from_json() {
        let json = r#"{
            "nodes": [
                {"id": "a", "threshold": 67, "validators": ["a", "b", "c"]},
                {"id": "b", "threshold": 67, "validators": ["a", "b", "c"]},
                {"id": "c", "threshold": 67, "validators": ["a", "b", "c"]}
            ]
        }"#;
        let topo: Topology = serde_json::from_str(json).unwrap();
        assert_eq!(topo.nodes.len(), 3);
        assert!(topo.nodes[0].inner_sets.is_empty());
    }
}
