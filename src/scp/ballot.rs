//! `SCPBallot`: a (counter, value) pair ordered lexicographically by
//! counter then by the value's hash.

use super::value::Value;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ballot {
    pub counter: u32,
    pub value: Value,
}

impl Ballot {
    pub fn new(counter: u32, value: Value) -> Self {
        debug_assert!(counter >= 1, "ballot counters are positive integers");
        Self { counter, value }
    }

    /// Same value as `other`, regardless of counter.
    pub fn compatible(&self, other: &Ballot) -> bool {
        self.value == other.value
    }
}
