//! Weighted synthetic traffic against one simulated service.

use std::sync::Arc;

use anyhow::{bail, Result};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::Serialize;
use sofarpc_aft::{
    CycleReport, FaultToleranceConfigProvider, FaultToleranceEngine, InvocationError,
    InvocationStatDimension, RegulatorConfig, TimeWindowRegulator,
};
use tracing::{debug, info};

/// App every simulated provider belongs to.
pub const SIM_APP: &str = "sim-app";
/// Service every simulated provider exposes.
pub const SIM_SERVICE: &str = "com.example.EchoService:1.0";
/// Registry weight of a simulated provider.
pub const SIM_ORIGIN_WEIGHT: u32 = 100;
/// Background timeout probability of every provider.
pub const DEFAULT_BASE_FAULT_RATE: f64 = 0.005;

/// Parameters of one run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Providers of the service.
    pub providers: usize,
    /// Leading providers that fail abnormally.
    pub grey: usize,
    /// Timeout probability of a failing grey provider.
    pub fault_rate: f64,
    /// Timeout probability of everyone else.
    pub base_fault_rate: f64,
    /// Regulation cycles to run.
    pub cycles: usize,
    /// Invocations per simulated second.
    pub rps: u64,
    /// Fixed RNG seed.
    pub seed: Option<u64>,
}

impl SimulationConfig {
    /// Rejects parameters that cannot describe a run.
    pub fn validate(&self) -> Result<()> {
        if self.providers == 0 {
            bail!("at least one provider is required");
        }
        if self.grey > self.providers {
            bail!("{} grey providers requested but only {} exist", self.grey, self.providers);
        }
        for (name, rate) in [("fault rate", self.fault_rate), ("base fault rate", self.base_fault_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                bail!("{name} must be within [0, 1], got {rate}");
            }
        }
        Ok(())
    }
}

/// Weights and counts after one regulation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutcome {
    /// 1-based cycle number.
    pub cycle: usize,
    /// Whether the grey providers were still failing.
    pub grey_failing: bool,
    /// Invocations sent this cycle.
    pub invocations: u64,
    /// Timeouts among them.
    pub faults: u64,
    /// Effective weight of every provider, in provider order.
    pub weights: Vec<u32>,
    /// What the regulator did.
    pub report: CycleReport,
}

/// A simulated service and the engine regulating it.
pub struct Simulation {
    config: SimulationConfig,
    engine: FaultToleranceEngine,
    regulator: TimeWindowRegulator,
    providers: Vec<InvocationStatDimension>,
    window_secs: u64,
    rng: StdRng,
    cycle: usize,
}

impl Simulation {
    /// Builds a simulation over a fresh engine.
    pub fn new(config: SimulationConfig, ft_config: Arc<dyn FaultToleranceConfigProvider>) -> Result<Self> {
        config.validate()?;
        let window_secs = ft_config.time_window(SIM_APP).as_secs().max(1);
        let engine = FaultToleranceEngine::new(ft_config);
        let regulator = engine.regulator(RegulatorConfig::default());
        let providers = (0..config.providers)
            .map(|i| {
                InvocationStatDimension::new(
                    SIM_APP,
                    SIM_SERVICE,
                    format!("10.1.0.{}", i + 1),
                    SIM_ORIGIN_WEIGHT,
                )
            })
            .collect();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            engine,
            regulator,
            providers,
            window_secs,
            rng,
            cycle: 0,
        })
    }

    /// Simulated providers, in order.
    pub fn providers(&self) -> &[InvocationStatDimension] {
        &self.providers
    }

    /// Engine under simulation.
    pub fn engine(&self) -> &FaultToleranceEngine {
        &self.engine
    }

    /// Whether the grey providers fail during `cycle` (1-based).
    pub fn grey_failing(&self, cycle: usize) -> bool {
        cycle <= self.config.cycles / 2
    }

    /// Current effective weights, in provider order.
    pub fn weights(&self) -> Vec<u32> {
        self.providers
            .iter()
            .map(|dim| self.engine.effective_weight(dim))
            .collect()
    }

    /// Sends one window of traffic and runs a regulation cycle.
    pub fn step(&mut self) -> CycleOutcome {
        self.cycle += 1;
        let grey_failing = self.grey_failing(self.cycle);
        let weights = self.weights();
        let invocations = self.config.rps * self.window_secs;
        let mut faults = 0;

        match WeightedIndex::new(&weights) {
            Ok(picker) => {
                for _ in 0..invocations {
                    let index = picker.sample(&mut self.rng);
                    let fault_rate = if grey_failing && index < self.config.grey {
                        self.config.fault_rate
                    } else {
                        self.config.base_fault_rate
                    };
                    let outcome = if self.rng.gen_bool(fault_rate) {
                        faults += 1;
                        Err(InvocationError::Timeout { timeout_ms: 3000 })
                    } else {
                        Ok(())
                    };
                    self.engine.record(&self.providers[index], &outcome);
                }
            }
            Err(e) => debug!(error = %e, "no provider takes traffic this cycle"),
        }

        let report = self.regulator.measure_all();
        let outcome = CycleOutcome {
            cycle: self.cycle,
            grey_failing,
            invocations,
            faults,
            weights: self.weights(),
            report,
        };
        info!(
            cycle = outcome.cycle,
            invocations,
            faults,
            degraded = outcome.report.degraded,
            recovered = outcome.report.recovered,
            "simulation cycle finished"
        );
        outcome
    }

    /// Runs every configured cycle.
    pub fn run(&mut self) -> Vec<CycleOutcome> {
        (0..self.config.cycles).map(|_| self.step()).collect()
    }
}
