//! Command-line configuration: `scp-sim run --nodes N --topology full
//! --ticks T --seed S --log-level LEVEL`, with an optional JSON topology
//! file for custom quorum arrangements. Grounded on the teacher's `clap`
//! derive usage in its `application/app_config.rs`.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::overlay::Topology;

#[derive(Parser, Debug)]
#[command(name = "scp-sim", about = "Stellar Consensus Protocol node simulator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a simulated SCP network for a fixed number of ticks.
    Run(RunArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyKind {
    Full,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Number of nodes in a generated full-mesh topology. Ignored if
    /// `--topology-file` is given.
    #[arg(long, default_value_t = 4)]
    pub nodes: usize,

    #[arg(long, value_enum, default_value_t = TopologyKind::Full)]
    pub topology: TopologyKind,

    /// Path to a JSON `Topology` description, overriding `--nodes`/`--topology`.
    #[arg(long)]
    pub topology_file: Option<PathBuf>,

    /// Quorum threshold percentage used for a generated topology.
    #[arg(long, default_value_t = 55)]
    pub threshold: u8,

    #[arg(long, default_value_t = 50)]
    pub ticks: u64,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read topology file: {e}"),
            ConfigError::Json(e) => write!(f, "failed to parse topology file: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RunArgs {
    pub fn resolve_topology(&self) -> Result<Topology, ConfigError> {
        if let Some(path) = &self.topology_file {
            let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
            let topology: Topology = serde_json::from_str(&contents).map_err(ConfigError::Json)?;
            return Ok(topology);
        }
        match self.topology {
            TopologyKind::Full => Ok(Topology::full_mesh(self.nodes, self.threshold)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build_a_full_mesh() {
        let args = RunArgs {
            nodes: 5,
            topology: TopologyKind::Full,
            topology_file: None,
            threshold: 60,
            ticks: 10,
            seed: 1,
            log_level: "info".to_string(),
        };
        let topo = args.resolve_topology().unwrap();
        assert_eq!(topo.nodes.len(), 5);
    }
}
