//! The overlay network: peer lookup by name and topology construction.

pub mod registry;
pub mod topology;

pub use registry::PeerRegistry;
pub use topology::{NodeSpec, Topology};
