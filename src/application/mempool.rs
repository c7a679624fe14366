//! The shared transaction mempool every node pulls new transactions from.
//! Grounded on `Node.py`'s `retrieve_transaction_from_mempool`, which polls
//! a shared pool and dedupes against each node's own `tx_queue`.

use crate::scp::transaction::Transaction;

/// A source of new transactions for nodes to pull from. Kept as a trait so
/// the driver can swap in a scripted/deterministic feed for tests without
/// touching `NodeEngine`.
pub trait Mempool {
    /// Returns every transaction submitted since the last call.
    fn drain_new(&mut self) -> Vec<Transaction>;

    fn submit(&mut self, tx: Transaction);

    /// Removes `tx` from the shared pool, if still present. Idempotent:
    /// removing an already-absent transaction is a no-op, not an error.
    fn remove(&mut self, tx: &Transaction);
}

/// A simple FIFO mempool backed by a `Vec`, fed by `submit` and drained
/// wholesale once per tick by the driver, which then hands the batch to
/// every node's `enqueue_transaction`.
#[derive(Default)]
pub struct InMemoryMempool {
    pending: Vec<Transaction>,
}

impl InMemoryMempool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mempool for InMemoryMempool {
    fn drain_new(&mut self) -> Vec<Transaction> {
        std::mem::take(&mut self.pending)
    }

    fn submit(&mut self, tx: Transaction) {
        self.pending.push(tx);
    }

    fn remove(&mut self, tx: &Transaction) {
        self.pending.retain(|t| t.hash() != tx.hash());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_and_returns_submitted() {
        let mut pool = InMemoryMempool::new();
        pool.submit(Transaction::new(b"tx-1"));
        pool.submit(Transaction::new(b"tx-2"));
        let drained = pool.drain_new();
        assert_eq!(drained.len(), 2);
        assert!(pool.drain_new().is_empty());
    }

    #[test]
    fn remove_drops_matching_transaction_before_it_drains() {
        let mut pool = InMemoryMempool::new();
        let tx = Transaction::new(b"tx-1");
        pool.submit(tx.clone());
        pool.submit(Transaction::new(b"tx-2"));
        pool.remove(&tx);
        let drained = pool.drain_new();
        assert_eq!(drained.len(), 1);
        assert_ne!(drained[0].hash(), tx.hash());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut pool = InMemoryMempool::new();
        let tx = Transaction::new(b"tx-1");
        pool.remove(&tx);
        pool.submit(tx.clone());
        pool.remove(&tx);
        pool.remove(&tx);
        assert!(pool.drain_new().is_empty());
    }
}
