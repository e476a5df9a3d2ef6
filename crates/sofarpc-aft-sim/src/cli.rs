//! Command line of `aft-sim`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sofarpc_aft::{FaultToleranceConfig, FaultToleranceConfigManager, FaultToleranceConfigProvider};

use crate::simulation::{SimulationConfig, DEFAULT_BASE_FAULT_RATE};

/// Flags of one simulation run.
#[derive(Parser, Debug)]
#[command(name = "aft-sim")]
#[command(about = "Drive synthetic RPC traffic through adaptive fault tolerance", long_about = None)]
pub struct Cli {
    /// Providers of the simulated service.
    #[arg(short, long, default_value_t = 10)]
    pub providers: usize,

    /// How many of them fail abnormally.
    #[arg(short, long, default_value_t = 1)]
    pub grey: usize,

    /// Timeout probability of a grey provider while it is failing.
    #[arg(short = 'f', long, default_value_t = 0.5)]
    pub fault_rate: f64,

    /// Timeout probability of every provider.
    #[arg(long, default_value_t = DEFAULT_BASE_FAULT_RATE)]
    pub base_fault_rate: f64,

    /// Regulation cycles to run. Grey providers heal halfway through.
    #[arg(short, long, default_value_t = 20)]
    pub cycles: usize,

    /// Invocations per simulated second.
    #[arg(short, long, default_value_t = 200)]
    pub rps: u64,

    /// RNG seed, for repeatable runs.
    #[arg(long, env = "AFT_SIM_SEED")]
    pub seed: Option<u64>,

    /// Fault tolerance config (.toml or .json). Without one, regulation and
    /// degrading are switched on with default thresholds.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print one JSON object per cycle instead of a table.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Loads the fault tolerance config the run uses.
    pub fn fault_tolerance_config(&self) -> Result<Arc<dyn FaultToleranceConfigProvider>> {
        let manager = match &self.config {
            Some(path) => FaultToleranceConfigManager::from_file(path)
                .with_context(|| format!("loading fault tolerance config {}", path.display()))?,
            None => {
                let mut config = FaultToleranceConfig::default();
                config.regulation_effective = true;
                config.degrade_effective = true;
                FaultToleranceConfigManager::new(config)?
            }
        };
        Ok(Arc::new(manager))
    }

    /// Simulation parameters from the flags.
    pub fn simulation_config(&self) -> Result<SimulationConfig> {
        let config = SimulationConfig {
            providers: self.providers,
            grey: self.grey,
            fault_rate: self.fault_rate,
            base_fault_rate: self.base_fault_rate,
            cycles: self.cycles,
            rps: self.rps,
            seed: self.seed,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["aft-sim"]);
        assert_eq!(cli.providers, 10);
        assert_eq!(cli.grey, 1);
        assert_eq!(cli.cycles, 20);
        assert_eq!(cli.rps, 200);
        assert!(cli.config.is_none());

        let config = cli.fault_tolerance_config().unwrap();
        assert!(config.is_regulation_effective("sim-app"));
        assert!(config.is_degrade_effective("sim-app"));
    }

    #[test]
    fn test_rejects_more_grey_than_providers() {
        let cli = Cli::parse_from(["aft-sim", "--providers", "3", "--grey", "4"]);
        assert!(cli.simulation_config().is_err());
    }

    #[test]
    fn test_loads_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[global]\nregulation_effective = true\ndegrade_effective = false\ntime_window_secs = 5"
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cli = Cli::parse_from(["aft-sim", "--config", path.as_str()]);
        let config = cli.fault_tolerance_config().unwrap();
        assert!(!config.is_degrade_effective("sim-app"));
        assert_eq!(config.time_window("sim-app").as_secs(), 5);
    }
}
