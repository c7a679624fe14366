//! A single-threaded Stellar Consensus Protocol node simulator: nomination,
//! ballot (prepare/commit), and externalize, run across an in-process
//! network of `NodeEngine`s driven by `Driver`.

pub mod application;
pub mod config;
pub mod driver;
pub mod ledger;
pub mod overlay;
pub mod scp;
