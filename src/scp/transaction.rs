//! Opaque transactions. The simulator never looks inside a transaction's
//! payload; only its content hash (its identity) matters to the protocol.

use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

pub type TxHash = [u8; 32];

/// An immutable transaction identified by a stable, content-derived hash.
#[derive(Clone, Debug)]
pub struct Transaction {
    hash: TxHash,
}

impl Transaction {
    /// Builds a transaction whose identity hash is derived from `payload`.
    pub fn new(payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        Self {
            hash: hasher.finalize().into(),
        }
    }

    /// Builds a transaction directly from a precomputed hash, e.g. for tests
    /// that need deterministic, readable transaction identities.
    pub fn from_hash(hash: TxHash) -> Self {
        Self { hash }
    }

    pub fn hash(&self) -> TxHash {
        self.hash
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}
impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for Transaction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Transaction {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash.cmp(&other.hash)
    }
}
