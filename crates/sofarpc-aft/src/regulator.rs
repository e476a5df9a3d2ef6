//! Time-window regulator: drives measure → regulate → weight change.
//!
//! The regulator ticks on a fixed base interval. A service is measured on
//! the ticks that complete its app's time window, so apps with different
//! windows share one loop. Every model is processed independently: an
//! error or panic in one is logged and counted, and the rest of the cycle
//! carries on.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use sofarpc_aft::{FaultToleranceEngine, FaultToleranceConfigManager, RegulatorConfig};
//! # async fn run() {
//! let engine = FaultToleranceEngine::builder(Arc::new(FaultToleranceConfigManager::default())).build();
//! let handle = Arc::new(engine.regulator(RegulatorConfig::default())).start();
//! // ... serve traffic ...
//! handle.shutdown().await;
//! # }
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{FaultToleranceConfigProvider, RegulationMode};
use crate::dimension::DimensionKey;
use crate::error::{AftError, Result};
use crate::measure::{MeasureResultDetail, MeasureState, MeasureStrategy};
use crate::metrics::RegulationMetrics;
use crate::model::MeasureModel;
use crate::registry::StatRegistry;
use crate::regulation::RegulationStrategy;
use crate::weight::WeightStore;

/// Default base tick of the regulation loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Scheduling settings of the regulator.
#[derive(Debug, Clone)]
pub struct RegulatorConfig {
    /// Base tick; app time windows are counted in whole ticks.
    pub tick_interval: Duration,
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

/// What one regulation cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Models whose pass completed.
    pub models_measured: usize,
    /// Models whose pass failed.
    pub models_failed: usize,
    /// Providers degraded.
    pub degraded: usize,
    /// Restore steps applied.
    pub restored: usize,
    /// Providers that reached origin weight and left the degrade list.
    pub recovered: usize,
    /// Degrades skipped at the service cap.
    pub blocked_by_cap: usize,
    /// Idle stats evicted.
    pub evicted: usize,
    /// Degrade or restore calls the weight store rejected.
    pub weight_failures: usize,
}

impl CycleReport {
    fn absorb(&mut self, other: CycleReport) {
        self.models_measured += other.models_measured;
        self.models_failed += other.models_failed;
        self.degraded += other.degraded;
        self.restored += other.restored;
        self.recovered += other.recovered;
        self.blocked_by_cap += other.blocked_by_cap;
        self.evicted += other.evicted;
        self.weight_failures += other.weight_failures;
    }
}

/// Periodic driver of measurement and regulation for every known service.
pub struct TimeWindowRegulator {
    config: RegulatorConfig,
    registry: Arc<StatRegistry>,
    ft_config: Arc<dyn FaultToleranceConfigProvider>,
    measure: Arc<dyn MeasureStrategy>,
    regulation: Arc<dyn RegulationStrategy>,
    weights: Arc<dyn WeightStore>,
    metrics: Arc<RegulationMetrics>,
    ticks: AtomicU64,
}

impl TimeWindowRegulator {
    /// Wires a regulator from its collaborators.
    pub fn new(
        config: RegulatorConfig,
        registry: Arc<StatRegistry>,
        ft_config: Arc<dyn FaultToleranceConfigProvider>,
        measure: Arc<dyn MeasureStrategy>,
        regulation: Arc<dyn RegulationStrategy>,
        weights: Arc<dyn WeightStore>,
        metrics: Arc<RegulationMetrics>,
    ) -> Self {
        Self {
            config,
            registry,
            ft_config,
            measure,
            regulation,
            weights,
            metrics,
            ticks: AtomicU64::new(0),
        }
    }

    /// Ticks elapsed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Advances one tick and regulates the services whose window ends on it.
    pub fn tick(&self) -> CycleReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let due: Vec<_> = self
            .registry
            .models()
            .into_iter()
            .filter(|model| self.is_regulated(model.key()))
            .filter(|model| tick % self.window_ticks(model.key()) == 0)
            .collect();
        self.run_models(&due)
    }

    /// Regulates every service now, regardless of its window.
    pub fn measure_all(&self) -> CycleReport {
        let models: Vec<_> = self
            .registry
            .models()
            .into_iter()
            .filter(|model| self.is_regulated(model.key()))
            .collect();
        self.run_models(&models)
    }

    /// Spawns the tick loop on the current tokio runtime.
    pub fn start(self: Arc<Self>) -> RegulatorHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let (report_tx, report_rx) = watch::channel(CycleReport::default());
        let period = self.config.tick_interval.max(Duration::from_millis(1));

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            info!(tick_ms = period.as_millis() as u64, "fault tolerance regulator started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let regulator = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || regulator.tick()).await {
                            Ok(report) => {
                                let _ = report_tx.send(report);
                            }
                            Err(e) => warn!(error = %e, "fault tolerance tick aborted"),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!(ticks = self.ticks(), "fault tolerance regulator stopped");
        });

        RegulatorHandle {
            shutdown: shutdown_tx,
            reports: report_rx,
            join,
        }
    }

    fn is_regulated(&self, key: &DimensionKey) -> bool {
        self.ft_config.is_regulation_effective(key.app_name())
    }

    fn window_ticks(&self, key: &DimensionKey) -> u64 {
        let window = self.ft_config.time_window(key.app_name()).as_millis();
        let tick = self.config.tick_interval.as_millis().max(1);
        ((window / tick) as u64).max(1)
    }

    fn run_models(&self, models: &[Arc<MeasureModel>]) -> CycleReport {
        let mut report = CycleReport::default();
        for model in models {
            match self.regulate_model(model) {
                Ok(model_report) => {
                    self.metrics.record_model_measured();
                    report.absorb(model_report);
                }
                Err(e) => {
                    self.metrics.record_model_failure();
                    report.models_failed += 1;
                    warn!(
                        app = model.key().app_name(),
                        service = model.key().service(),
                        error = %e,
                        "fault tolerance regulation failed"
                    );
                }
            }
            self.registry.prune(model.key());
        }
        self.metrics.record_cycle();
        report
    }

    fn regulate_model(&self, model: &MeasureModel) -> Result<CycleReport> {
        panic::catch_unwind(AssertUnwindSafe(|| self.process_model(model))).map_err(|payload| {
            AftError::ModelPanicked {
                app: model.key().app_name().to_string(),
                service: model.key().service().to_string(),
                reason: panic_reason(&*payload),
            }
        })
    }

    fn process_model(&self, model: &MeasureModel) -> CycleReport {
        let result = self.measure.measure(model);
        let mut report = CycleReport {
            models_measured: 1,
            ..CycleReport::default()
        };

        for dimension in result.evicted() {
            self.weights.forget(dimension);
            self.regulation.forget(dimension);
            report.evicted += 1;
            info!(provider = %dimension, "idle provider evicted from measurement");
        }
        self.metrics.record_evictions(report.evicted as u64);

        for detail in result.into_details() {
            let dimension = Arc::clone(&detail.dimension);
            if let Err(e) = self.regulate_detail(detail, &mut report) {
                self.metrics.record_weight_failure();
                report.weight_failures += 1;
                warn!(provider = %dimension, error = %e, "weight change failed");
            }
        }
        report
    }

    fn regulate_detail(&self, mut detail: MeasureResultDetail, report: &mut CycleReport) -> Result<()> {
        if !self.regulation.is_degrade_effective(&detail) {
            return Ok(());
        }
        let mode = self.ft_config.regulation_mode(detail.app_name());

        match detail.state {
            MeasureState::Abnormal => {
                self.metrics.record_abnormal();
                if self.regulation.is_exist_in_the_degrade_list(&detail) {
                    debug!(provider = %detail.dimension, "provider still abnormal, holding degrade");
                    return Ok(());
                }
                if mode == RegulationMode::LogOnly {
                    info!(
                        provider = %detail.dimension,
                        fault_rate = detail.fault_rate,
                        average = ?detail.average_fault_rate,
                        "provider abnormal, degrade skipped in log-only mode"
                    );
                    return Ok(());
                }
                if self.regulation.is_reach_max_degrade_ip_count(&detail) {
                    self.metrics.record_cap_block();
                    report.blocked_by_cap += 1;
                    return Ok(());
                }

                // Unreserve the slot taken above so a later abnormal verdict retries.
                let weight = match self.weights.degrade(&detail.dimension) {
                    Ok(weight) => weight,
                    Err(e) => {
                        self.regulation.forget(&detail.dimension);
                        return Err(e);
                    }
                };
                self.metrics.record_degrade();
                report.degraded += 1;
                info!(
                    provider = %detail.dimension,
                    weight,
                    fault_rate = detail.fault_rate,
                    average = ?detail.average_fault_rate,
                    ratio = ?detail.fault_rate_ratio,
                    "provider degraded"
                );
            }
            MeasureState::Healthy => {
                if !self.regulation.is_exist_in_the_degrade_list(&detail) {
                    return Ok(());
                }

                let recovered = self.weights.restore(&detail.dimension)?;
                self.metrics.record_restore_step();
                report.restored += 1;
                if recovered {
                    detail.recovered_origin_weight = true;
                    if self.regulation.remove_from_degrade_list(&detail) {
                        self.metrics.record_recovery();
                        report.recovered += 1;
                        info!(
                            provider = %detail.dimension,
                            weight = detail.dimension.origin_weight(),
                            "provider recovered to origin weight"
                        );
                    }
                } else {
                    debug!(
                        provider = %detail.dimension,
                        weight = self.weights.effective_weight(&detail.dimension),
                        "provider weight restoring"
                    );
                }
            }
            MeasureState::Ignore => {}
        }
        Ok(())
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason.to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to a running regulator loop.
pub struct RegulatorHandle {
    shutdown: watch::Sender<bool>,
    reports: watch::Receiver<CycleReport>,
    join: JoinHandle<()>,
}

impl RegulatorHandle {
    /// Report of the most recent tick.
    pub fn last_report(&self) -> CycleReport {
        self.reports.borrow().clone()
    }

    /// True until the loop exits.
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Stops the loop and waits for the in-flight tick to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            warn!(error = %e, "fault tolerance regulator exited abnormally");
        }
    }
}
