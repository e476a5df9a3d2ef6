#![warn(missing_docs)]

//! `aft-sim`: watch adaptive fault tolerance react to a grey provider.

use anyhow::Result;
use clap::Parser;
use sofarpc_aft_sim::{Cli, CycleOutcome, Simulation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let ft_config = cli.fault_tolerance_config()?;
    let mut simulation = Simulation::new(cli.simulation_config()?, ft_config)?;

    tracing::info!(
        providers = cli.providers,
        grey = cli.grey,
        cycles = cli.cycles,
        "aft-sim starting"
    );

    if !cli.json {
        let header: Vec<String> = simulation
            .providers()
            .iter()
            .map(|dim| dim.provider_ip().to_string())
            .collect();
        println!("{:>5} {:>5} {:>7} {:>6}  {}", "cycle", "grey", "calls", "faults", header.join(" "));
    }

    for _ in 0..cli.cycles {
        let outcome = simulation.step();
        if cli.json {
            println!("{}", serde_json::to_string(&outcome)?);
        } else {
            print_row(&outcome);
        }
    }

    let metrics = simulation.engine().metrics();
    tracing::info!(
        degrades = metrics.degrades,
        restore_steps = metrics.restore_steps,
        recoveries = metrics.recoveries,
        cap_blocks = metrics.cap_blocks,
        "aft-sim finished"
    );
    Ok(())
}

fn print_row(outcome: &CycleOutcome) {
    let weights: Vec<String> = outcome
        .weights
        .iter()
        .map(|w| format!("{w:>8}"))
        .collect();
    println!(
        "{:>5} {:>5} {:>7} {:>6}  {}",
        outcome.cycle,
        if outcome.grey_failing { "fail" } else { "ok" },
        outcome.invocations,
        outcome.faults,
        weights.join(" ")
    );
}
