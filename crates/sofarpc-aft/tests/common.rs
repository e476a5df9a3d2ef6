//! Shared fixtures for the fault tolerance integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use sofarpc_aft::{
    FaultToleranceConfig, FaultToleranceConfigManager, FaultToleranceEngine, InvocationError,
    InvocationStatDimension, RegulatorConfig, TimeWindowRegulator,
};

pub const APP: &str = "order-app";
pub const SERVICE: &str = "com.example.OrderService:1.0";
pub const ORIGIN_WEIGHT: u32 = 100;

/// Config with regulation and degrading switched on and a fast window.
pub fn enabled_config() -> FaultToleranceConfig {
    let mut config = FaultToleranceConfig::default();
    config.regulation_effective = true;
    config.degrade_effective = true;
    config.time_window_secs = 1;
    config
}

/// One service with `providers` replicas behind an engine.
pub struct TestService {
    pub engine: FaultToleranceEngine,
    pub providers: Vec<InvocationStatDimension>,
}

impl TestService {
    pub fn new(providers: usize) -> Self {
        Self::with_config(providers, enabled_config())
    }

    pub fn with_config(providers: usize, config: FaultToleranceConfig) -> Self {
        let manager = FaultToleranceConfigManager::new(config).expect("valid test config");
        Self::with_engine(providers, FaultToleranceEngine::new(Arc::new(manager)))
    }

    pub fn with_engine(providers: usize, engine: FaultToleranceEngine) -> Self {
        let providers = (0..providers)
            .map(|i| provider(SERVICE, i))
            .collect();
        Self { engine, providers }
    }

    pub fn regulator(&self) -> TimeWindowRegulator {
        self.engine.regulator(RegulatorConfig::default())
    }

    /// Sends `calls` invocations to provider `index`, `faults` of which time out.
    pub fn traffic(&self, index: usize, calls: u64, faults: u64) {
        let dim = &self.providers[index];
        for i in 0..calls {
            let outcome = if i < faults {
                Err(InvocationError::Timeout { timeout_ms: 3000 })
            } else {
                Ok(())
            };
            self.engine.record(dim, &outcome);
        }
    }

    /// Healthy traffic on every provider.
    pub fn healthy_round(&self, calls: u64) {
        for index in 0..self.providers.len() {
            self.traffic(index, calls, 0);
        }
    }

    /// `calls` invocations on every provider; those in `grey` time out
    /// `faults` times.
    pub fn grey_round(&self, grey: &[usize], calls: u64, faults: u64) {
        for index in 0..self.providers.len() {
            let faults = if grey.contains(&index) { faults } else { 0 };
            self.traffic(index, calls, faults);
        }
    }

    pub fn weight(&self, index: usize) -> u32 {
        self.engine.effective_weight(&self.providers[index])
    }
}

pub fn provider(service: &str, index: usize) -> InvocationStatDimension {
    InvocationStatDimension::new(APP, service, format!("10.0.0.{}", index + 1), ORIGIN_WEIGHT)
}
