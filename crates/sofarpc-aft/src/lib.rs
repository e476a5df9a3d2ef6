#![warn(missing_docs)]

//! SOFA-RPC adaptive fault tolerance: per-provider invocation statistics,
//! peer-relative fault measurement and capped weight regulation.
//!
//! The invocation path records outcomes through
//! [`FaultToleranceEngine::record`]. A [`TimeWindowRegulator`] periodically
//! snapshots each service's stats, compares every provider's fault rate
//! with its peers' average, degrades the weight of outliers and restores
//! them step by step once they behave.

pub mod classifier;
pub mod config;
pub mod dimension;
pub mod engine;
pub mod error;
pub mod measure;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod regulation;
pub mod regulator;
pub mod stat;
pub mod weight;

pub use classifier::{DefaultFaultClassifier, FaultClassifier, InvocationError};
pub use config::{
    FaultToleranceConfig, FaultToleranceConfigManager, FaultToleranceConfigProvider,
    FaultToleranceSettings, RegulationMode,
};
pub use dimension::{DimensionKey, InvocationStatDimension};
pub use engine::{FaultToleranceEngine, FaultToleranceEngineBuilder};
pub use error::{AftError, Result};
pub use measure::{
    MeasureResult, MeasureResultDetail, MeasureState, MeasureStrategy,
    ServiceHorizontalMeasureStrategy, NEVER_QUALIFIES,
};
pub use metrics::{RegulationMetrics, RegulationMetricsSnapshot};
pub use model::{MeasureModel, ModelSnapshot};
pub use registry::StatRegistry;
pub use regulation::{RegulationStrategy, ServiceHorizontalRegulationStrategy};
pub use regulator::{CycleReport, RegulatorConfig, RegulatorHandle, TimeWindowRegulator};
pub use stat::{InvocationStat, InvocationStatSnapshot};
pub use weight::{CurrentWeight, InMemoryWeightStore, ProviderStatus, WeightStore};
