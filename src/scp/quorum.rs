//! `QuorumSet`: the recursive validator/threshold structure each node uses
//! to decide whether enough peers agree on a statement. Grounded on
//! `QuorumSet.py`'s `weight`/`minimum_quorum`/`size` (kept faithful) and
//! on `Node.py`'s inline `check_Quorum_threshold`/`check_Blocking_threshold`
//! family, which is centralized here instead of duplicated per call site
//! (see DESIGN.md, "REDESIGN: quorum threshold checks").

use rand::seq::IteratorRandom;
use rand::Rng;
use std::collections::BTreeSet;

pub type NodeId = String;

/// A federated quorum slice: a flat list of validators plus nested
/// sub-slices, together with the fraction of members that must agree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuorumSet {
    pub threshold: ThresholdFraction,
    pub validators: Vec<NodeId>,
    pub inner_sets: Vec<QuorumSet>,
}

/// A threshold expressed as a percentage in `[1, 100]`, e.g. `67` for 2/3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThresholdFraction(pub u8);

impl ThresholdFraction {
    pub fn as_fraction(self) -> f64 {
        self.0 as f64 / 100.0
    }
}

impl QuorumSet {
    pub fn new(threshold: ThresholdFraction, validators: Vec<NodeId>, inner_sets: Vec<QuorumSet>) -> Self {
        Self {
            threshold,
            validators,
            inner_sets,
        }
    }

    /// A simple flat quorum set over `validators` with no nesting.
    pub fn flat(threshold: ThresholdFraction, validators: Vec<NodeId>) -> Self {
        Self::new(threshold, validators, Vec::new())
    }

    /// All validators this slice names, at any nesting depth. Deliberately
    /// not deduplicated: `QuorumSet.py`'s `size` property sums flattened
    /// inner sets without deduping, and `minimum_quorum` is derived from
    /// that same un-deduped count, so this preserves the original's
    /// (slightly inflated, for overlapping quorums) slice sizes.
    pub fn flatten(&self) -> Vec<NodeId> {
        let mut out = self.validators.clone();
        for inner in &self.inner_sets {
            out.extend(inner.flatten());
        }
        out
    }

    /// Distinct member count: `validators.len() + inner_sets.len()`, the
    /// denominator `weight()` uses.
    fn member_count(&self) -> usize {
        self.validators.len() + self.inner_sets.len()
    }

    /// Un-deduplicated total slice size, the basis for `minimum_quorum`.
    fn size(&self) -> usize {
        self.validators.len() + self.inner_sets.iter().map(QuorumSet::size).sum::<usize>()
    }

    /// Minimum number of (possibly duplicated) signers needed for this
    /// slice to be satisfied.
    pub fn minimum_quorum(&self) -> usize {
        (self.size() as f64 * self.threshold.as_fraction()).ceil() as usize
    }

    /// Fractional voting weight of `node` within this slice: counts direct
    /// occurrences among `validators` plus one per inner set that directly
    /// names it, over `member_count()`. A node is implicitly a full member
    /// of its own slices, so `owner == node` always returns `1.0` (resolves
    /// the spec's weight() vs. constant-1 Open Question in favor of
    /// `QuorumSet`'s fractional definition, owner-cased).
    pub fn weight(&self, node: &str, owner: &str) -> f64 {
        if node == owner {
            return 1.0;
        }
        let denom = self.member_count();
        if denom == 0 {
            return 0.0;
        }
        let direct = self.validators.iter().filter(|v| v.as_str() == node).count();
        let via_inner = self.inner_sets.iter().filter(|s| s.validators.iter().any(|v| v == node)).count();
        (direct + via_inner) as f64 / denom as f64
    }

    /// Distinct peers named anywhere in this slice, excluding `exclude`.
    pub fn distinct_peers_excluding(&self, exclude: &str) -> BTreeSet<NodeId> {
        self.flatten().into_iter().filter(|v| v != exclude).collect()
    }

    /// `signed >= minimum_quorum` where `signed` is 1 (if `self_signed`)
    /// plus the count of distinct peers (excluding `owner`) present in
    /// `signers`. Mirrors `check_Quorum_threshold`.
    pub fn quorum_threshold_met(&self, owner: &str, self_signed: bool, signers: &BTreeSet<NodeId>) -> bool {
        let peers = self.distinct_peers_excluding(owner);
        let signed = usize::from(self_signed) + peers.iter().filter(|p| signers.contains(*p)).count();
        signed >= self.minimum_quorum()
    }

    /// `(signed_count + inner_set_count) > (n - k)` where `n` excludes
    /// `owner`, mirrors `check_Blocking_threshold`. This deliberately
    /// double-counts inner-set members also present in the flat peer list,
    /// matching an observed quirk of the source this was distilled from
    /// (see DESIGN.md, "Open Question: blocking double-count").
    pub fn blocking_threshold_met(&self, owner: &str, signers: &BTreeSet<NodeId>) -> bool {
        let n = self.distinct_peers_excluding(owner).len();
        let k = self.minimum_quorum();

        let mut signed_count = 1usize; // owner always counts itself
        for peer in self.distinct_peers_excluding(owner) {
            if signers.contains(&peer) {
                signed_count += 1;
            }
        }
        let inner_set_count: usize = self
            .inner_sets
            .iter()
            .map(|inner| inner.distinct_peers_excluding(owner).iter().filter(|p| signers.contains(*p)).count())
            .sum();

        (signed_count + inner_set_count) as isize > (n as isize - k as isize)
    }

    /// Picks a uniformly random validator from the flattened slice,
    /// excluding `owner`. Grounded on `Node.py`'s `retrieve_random_peer`.
    pub fn retrieve_random_peer<R: Rng>(&self, owner: &str, rng: &mut R) -> Option<NodeId> {
        self.distinct_peers_excluding(owner).into_iter().choose(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(validators: &[&str], pct: u8) -> QuorumSet {
        QuorumSet::flat(ThresholdFraction(pct), validators.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn minimum_quorum_rounds_up() {
        let q = flat(&["a", "b", "c"], 67);
        assert_eq!(q.minimum_quorum(), 3); // ceil(3 * 0.67) = 3
    }

    #[test]
    fn owner_weight_is_always_one() {
        let q = flat(&["a", "b", "c"], 67);
        assert_eq!(q.weight("a", "a"), 1.0);
    }

    #[test]
    fn weight_counts_direct_and_inner_membership() {
        let inner = flat(&["x"], 100);
        let q = QuorumSet::new(ThresholdFraction(67), vec!["a".into(), "b".into()], vec![inner]);
        // member_count = 2 validators + 1 inner set = 3
        assert_eq!(q.weight("a", "owner"), 1.0 / 3.0);
        assert_eq!(q.weight("x", "owner"), 1.0 / 3.0);
        assert_eq!(q.weight("zzz", "owner"), 0.0);
    }

    #[test]
    fn quorum_threshold_needs_enough_distinct_signers() {
        let q = flat(&["a", "b", "c"], 67);
        let mut signers = BTreeSet::new();
        signers.insert("a".to_string());
        assert!(!q.quorum_threshold_met("self", true, &signers));
        signers.insert("b".to_string());
        assert!(q.quorum_threshold_met("self", true, &signers));
    }

    #[test]
    fn blocking_threshold_uses_n_minus_k() {
        let q = flat(&["a", "b", "c", "d"], 75); // n=4 excl owner, k=ceil(4*0.75)=3 -> n-k=1
        let mut signers = BTreeSet::new();
        assert!(!q.blocking_threshold_met("self", &signers)); // signed_count=1 > 1? no
        signers.insert("a".to_string());
        assert!(q.blocking_threshold_met("self", &signers)); // signed_count=2 > 1
    }
}
