use clap::Parser;
use log::info;

use scp_sim::config::{Cli, Command};
use scp_sim::driver::Driver;

fn main() {
    let cli = Cli::parse();
    let Command::Run(args) = cli.command;

    env_logger::Builder::new().parse_filters(&args.log_level).init();

    let topology = match args.resolve_topology() {
        Ok(topology) => topology,
        Err(err) => {
            eprintln!("scp-sim: {err}");
            std::process::exit(1);
        }
    };

    info!("starting {} node(s) for {} ticks (seed {})", topology.nodes.len(), args.ticks, args.seed);

    let mut driver = Driver::new(&topology, args.seed);
    driver.run(args.ticks);

    for node in &driver.nodes {
        println!(
            "{:<12} slot={:<4} externalized_slots={}",
            node.id,
            node.slot,
            node.ledger.len()
        );
    }
}
