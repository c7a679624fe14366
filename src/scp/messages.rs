//! Wire-level SCP statements. The simulator exchanges these through a
//! pull model (see `overlay::registry::PeerRegistry`): a sender only ever
//! holds its *latest* statement per phase, and receivers decide when to
//! pull it, rather than statements being pushed and queued.

use super::ballot::Ballot;
use super::quorum::NodeId;
use super::value::Value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nominate {
    pub voted: Value,
    pub accepted: Value,
    pub confirmed: Value,
}

/// `aCounter`/`cCounter`/`hCounter` track, respectively: the counter of the
/// ballot currently being voted on, and the low/high bounds of whatever
/// value this node has a confirmed-prepared record for (0 if none yet).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prepare {
    pub ballot: Ballot,
    pub a_counter: u32,
    pub c_counter: u32,
    pub h_counter: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub ballot: Ballot,
    /// The prepare ballot's counter at the moment the commit phase started.
    pub prepared_counter: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Externalize {
    pub slot: u64,
    pub ballot: Ballot,
    pub h_counter: u32,
    pub timestamp: u64,
}

/// An envelope pairs a statement with the node that issued it, which is
/// what receivers actually pull and record against their statement
/// counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope<T> {
    pub from: NodeId,
    pub statement: T,
}

impl<T> Envelope<T> {
    pub fn new(from: NodeId, statement: T) -> Self {
        Self { from, statement }
    }
}
