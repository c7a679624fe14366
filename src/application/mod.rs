//! Ambient services the driver wires together around the SCP engine:
//! simulated time and the shared transaction mempool.

pub mod clock;
pub mod mempool;

pub use clock::SimClock;
pub use mempool::{InMemoryMempool, Mempool};
