//! Engine facade: one independent set of registry, strategies and weights.
//!
//! The invocation path calls [`FaultToleranceEngine::record`]; the load
//! balancer reads [`FaultToleranceEngine::effective_weight`]; a
//! [`TimeWindowRegulator`] built from the engine closes the loop.

use std::sync::Arc;

use tracing::info;

use crate::classifier::{DefaultFaultClassifier, FaultClassifier, InvocationError};
use crate::config::FaultToleranceConfigProvider;
use crate::dimension::InvocationStatDimension;
use crate::measure::{MeasureStrategy, ServiceHorizontalMeasureStrategy};
use crate::metrics::{RegulationMetrics, RegulationMetricsSnapshot};
use crate::registry::StatRegistry;
use crate::regulation::{RegulationStrategy, ServiceHorizontalRegulationStrategy};
use crate::regulator::{RegulatorConfig, TimeWindowRegulator};
use crate::weight::{InMemoryWeightStore, WeightStore};

/// Wired fault tolerance services for one host.
pub struct FaultToleranceEngine {
    config: Arc<dyn FaultToleranceConfigProvider>,
    registry: Arc<StatRegistry>,
    weights: Arc<dyn WeightStore>,
    classifier: Arc<dyn FaultClassifier>,
    measure: Arc<dyn MeasureStrategy>,
    regulation: Arc<dyn RegulationStrategy>,
    metrics: Arc<RegulationMetrics>,
}

/// Builder for [`FaultToleranceEngine`]; unset parts get the shipped defaults.
pub struct FaultToleranceEngineBuilder {
    config: Arc<dyn FaultToleranceConfigProvider>,
    weights: Option<Arc<dyn WeightStore>>,
    classifier: Option<Arc<dyn FaultClassifier>>,
    measure: Option<Arc<dyn MeasureStrategy>>,
    regulation: Option<Arc<dyn RegulationStrategy>>,
}

impl FaultToleranceEngineBuilder {
    /// Uses `weights` instead of an [`InMemoryWeightStore`].
    pub fn weight_store(mut self, weights: Arc<dyn WeightStore>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Uses `classifier` instead of [`DefaultFaultClassifier`].
    pub fn classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Replaces the peer-relative measure strategy.
    pub fn measure_strategy(mut self, measure: Arc<dyn MeasureStrategy>) -> Self {
        self.measure = Some(measure);
        self
    }

    /// Replaces the capped degrade-list strategy.
    pub fn regulation_strategy(mut self, regulation: Arc<dyn RegulationStrategy>) -> Self {
        self.regulation = Some(regulation);
        self
    }

    /// Wires the engine.
    pub fn build(self) -> FaultToleranceEngine {
        let config = self.config;
        let weights: Arc<dyn WeightStore> = match self.weights {
            Some(weights) => weights,
            None => Arc::new(InMemoryWeightStore::new(Arc::clone(&config))),
        };
        let measure: Arc<dyn MeasureStrategy> = match self.measure {
            Some(measure) => measure,
            None => Arc::new(ServiceHorizontalMeasureStrategy::new(
                Arc::clone(&config),
                Arc::clone(&weights),
            )),
        };
        let regulation: Arc<dyn RegulationStrategy> = match self.regulation {
            Some(regulation) => regulation,
            None => Arc::new(ServiceHorizontalRegulationStrategy::new(Arc::clone(&config))),
        };
        let classifier: Arc<dyn FaultClassifier> = match self.classifier {
            Some(classifier) => classifier,
            None => Arc::new(DefaultFaultClassifier),
        };

        FaultToleranceEngine {
            config,
            registry: Arc::new(StatRegistry::new()),
            weights,
            classifier,
            measure,
            regulation,
            metrics: Arc::new(RegulationMetrics::new()),
        }
    }
}

impl FaultToleranceEngine {
    /// Starts a builder around `config`.
    pub fn builder(config: Arc<dyn FaultToleranceConfigProvider>) -> FaultToleranceEngineBuilder {
        FaultToleranceEngineBuilder {
            config,
            weights: None,
            classifier: None,
            measure: None,
            regulation: None,
        }
    }

    /// Engine with every default collaborator.
    pub fn new(config: Arc<dyn FaultToleranceConfigProvider>) -> Self {
        Self::builder(config).build()
    }

    /// Records the outcome of one invocation.
    ///
    /// A no-op while regulation is off for the provider's app. Errors the
    /// classifier rejects count as plain invocations.
    pub fn record(&self, dimension: &InvocationStatDimension, outcome: &Result<(), InvocationError>) {
        if !self.config.is_regulation_effective(dimension.app_name()) {
            return;
        }
        let stat = self.registry.get_or_register(dimension);
        match outcome {
            Ok(()) => stat.record_invocation(),
            Err(error) => stat.record_fault(self.classifier.is_fault(error)),
        }
    }

    /// Registers `dimension` ahead of traffic.
    ///
    /// Outcomes must still go through [`record`](Self::record), which finds
    /// the live stat even after an idle one was evicted.
    pub fn register(&self, dimension: &InvocationStatDimension) {
        self.registry.get_or_register(dimension);
    }

    /// Weight the load balancer should use for `dimension`.
    pub fn effective_weight(&self, dimension: &InvocationStatDimension) -> u32 {
        self.weights.effective_weight(dimension)
    }

    /// Drops every trace of a provider that left the address list.
    pub fn on_provider_removed(&self, dimension: &InvocationStatDimension) {
        let registered = self.registry.unregister(dimension);
        self.weights.forget(dimension);
        self.regulation.forget(dimension);
        if registered {
            info!(provider = %dimension, "provider left the pool, regulation state dropped");
        }
    }

    /// Builds a regulator over this engine's services.
    pub fn regulator(&self, config: RegulatorConfig) -> TimeWindowRegulator {
        TimeWindowRegulator::new(
            config,
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            Arc::clone(&self.measure),
            Arc::clone(&self.regulation),
            Arc::clone(&self.weights),
            Arc::clone(&self.metrics),
        )
    }

    /// Current regulation counters.
    pub fn metrics(&self) -> RegulationMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Config provider shared with the strategies.
    pub fn config(&self) -> &Arc<dyn FaultToleranceConfigProvider> {
        &self.config
    }

    /// Stat registry fed by [`record`](Self::record).
    pub fn registry(&self) -> &Arc<StatRegistry> {
        &self.registry
    }

    /// Weight store the regulator writes to.
    pub fn weights(&self) -> &Arc<dyn WeightStore> {
        &self.weights
    }
}
