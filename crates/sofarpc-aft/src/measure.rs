//! Peer-relative ("service horizontal") measurement.
//!
//! Each provider's fault rate is compared with the average fault rate of
//! all providers of the same service that carried enough traffic in the
//! window. A provider whose rate is at least `multiple` times the average
//! is abnormal.
//!
//! # Thresholds
//!
//! A provider must see `least_window_count` invocations in the window to be
//! judged. For a provider whose weight has been cut, the threshold scales by
//! `current / origin` (never below 1), since it only receives that share of
//! traffic. A zero origin weight is a configuration error and a removed
//! provider is never judged; both get a threshold of -1.
//!
//! # Single providers
//!
//! A service with one qualifying provider compares that provider to
//! itself, so its ratio is 1 and it can never be abnormal. Peer-relative
//! measurement cannot judge a lone provider.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::FaultToleranceConfigProvider;
use crate::dimension::{DimensionKey, InvocationStatDimension};
use crate::model::{MeasureModel, ModelSnapshot};
use crate::stat::InvocationStatSnapshot;
use crate::weight::{CurrentWeight, WeightStore};

/// Threshold that no window count can meet.
pub const NEVER_QUALIFIES: i64 = -1;

/// Verdict for one provider in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureState {
    /// Fault rate is in line with peers.
    Healthy,
    /// Fault rate is at least the configured multiple of the peer average.
    Abnormal,
    /// Not enough data to judge.
    Ignore,
}

/// Verdict and supporting numbers for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureResultDetail {
    /// The provider judged.
    pub dimension: Arc<InvocationStatDimension>,
    /// The verdict.
    pub state: MeasureState,
    /// Invocations in the window.
    pub window_count: u64,
    /// Classified faults in the window.
    pub fault_count: u64,
    /// Own fault rate.
    pub fault_rate: f64,
    /// Peer average; `None` when no provider qualified.
    pub average_fault_rate: Option<f64>,
    /// `fault_rate / average_fault_rate` when both were defined and the average was non-zero.
    pub fault_rate_ratio: Option<f64>,
    /// Weight-scaled minimum window count, or [`NEVER_QUALIFIES`].
    pub least_window_count: i64,
    /// Configured abnormal multiple.
    pub least_window_fault_rate_multiple: f64,
    /// Set by the regulator once the weight store reports origin weight.
    pub recovered_origin_weight: bool,
}

impl MeasureResultDetail {
    /// The (app, service) pair of the provider.
    pub fn dimension_key(&self) -> &DimensionKey {
        self.dimension.dimension_key()
    }

    /// Consumer app of the provider.
    pub fn app_name(&self) -> &str {
        self.dimension.app_name()
    }

    /// Provider address.
    pub fn provider_ip(&self) -> &str {
        self.dimension.provider_ip()
    }
}

/// All verdicts for one model in one window.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureResult {
    key: DimensionKey,
    average_fault_rate: Option<f64>,
    details: Vec<MeasureResultDetail>,
    evicted: Vec<Arc<InvocationStatDimension>>,
}

impl MeasureResult {
    /// The (app, service) pair measured.
    pub fn key(&self) -> &DimensionKey {
        &self.key
    }

    /// Peer average fault rate; `None` when the window was inconclusive.
    pub fn average_fault_rate(&self) -> Option<f64> {
        self.average_fault_rate
    }

    /// True when no provider carried enough traffic to be judged.
    pub fn is_inconclusive(&self) -> bool {
        self.average_fault_rate.is_none()
    }

    /// Per-provider verdicts, ordered by provider address.
    pub fn details(&self) -> &[MeasureResultDetail] {
        &self.details
    }

    /// Consumes the result, yielding its verdicts.
    pub fn into_details(self) -> Vec<MeasureResultDetail> {
        self.details
    }

    /// Providers evicted for idleness while taking this window.
    pub fn evicted(&self) -> &[Arc<InvocationStatDimension>] {
        &self.evicted
    }

    /// Verdict for `provider_ip`, if it was measured.
    pub fn detail(&self, provider_ip: &str) -> Option<&MeasureResultDetail> {
        self.details.iter().find(|d| d.provider_ip() == provider_ip)
    }
}

/// Turns a model into verdicts.
pub trait MeasureStrategy: Send + Sync {
    /// Takes the model's window and judges every provider in it.
    fn measure(&self, model: &MeasureModel) -> MeasureResult;
}

/// Compares each provider of a service with its peers.
pub struct ServiceHorizontalMeasureStrategy {
    config: Arc<dyn FaultToleranceConfigProvider>,
    weights: Arc<dyn WeightStore>,
}

impl ServiceHorizontalMeasureStrategy {
    /// Creates a strategy reading thresholds from `config` and current
    /// weights from `weights`.
    pub fn new(config: Arc<dyn FaultToleranceConfigProvider>, weights: Arc<dyn WeightStore>) -> Self {
        Self { config, weights }
    }

    /// Judges an already-taken snapshot without touching live counters.
    ///
    /// Evaluating the same snapshot twice, with unchanged config and
    /// weights, yields the same result.
    pub fn evaluate(&self, snapshot: &ModelSnapshot) -> MeasureResult {
        let app_name = snapshot.key.app_name();
        let least_window_count = self.config.least_window_count(app_name).max(1);
        let multiple = self.config.least_window_fault_rate_multiple(app_name);

        let thresholds: Vec<i64> = snapshot
            .stats
            .iter()
            .map(|stat| self.invocation_least_window_count(&stat.dimension, least_window_count))
            .collect();

        let average_fault_rate = average_fault_rate(&snapshot.stats, &thresholds);

        let details = snapshot
            .stats
            .iter()
            .zip(&thresholds)
            .map(|(stat, &threshold)| {
                let detail = judge(stat, threshold, average_fault_rate, multiple);
                debug!(
                    provider = %detail.dimension,
                    state = ?detail.state,
                    window_count = detail.window_count,
                    fault_rate = detail.fault_rate,
                    average = ?detail.average_fault_rate,
                    ratio = ?detail.fault_rate_ratio,
                    threshold,
                    "measured provider"
                );
                detail
            })
            .collect();

        MeasureResult {
            key: snapshot.key.clone(),
            average_fault_rate,
            details,
            evicted: snapshot.evicted.clone(),
        }
    }

    /// Minimum window count for one provider, scaled by its current weight.
    pub fn invocation_least_window_count(
        &self,
        dimension: &InvocationStatDimension,
        least_window_count: u64,
    ) -> i64 {
        let origin = dimension.origin_weight();
        if origin == 0 {
            warn!(
                provider = %dimension,
                "origin weight is 0, excluding provider from measurement"
            );
            return NEVER_QUALIFIES;
        }

        match self.weights.weight(dimension) {
            None => clamp_threshold(least_window_count as f64),
            Some(CurrentWeight::Removed) => NEVER_QUALIFIES,
            Some(CurrentWeight::Active(current)) => {
                clamp_threshold(least_window_count as f64 * current as f64 / origin as f64)
            }
        }
    }
}

impl MeasureStrategy for ServiceHorizontalMeasureStrategy {
    fn measure(&self, model: &MeasureModel) -> MeasureResult {
        self.evaluate(&model.snapshot())
    }
}

fn clamp_threshold(scaled: f64) -> i64 {
    (scaled.floor() as i64).max(1)
}

fn qualifies(stat: &InvocationStatSnapshot, threshold: i64) -> bool {
    threshold > 0 && stat.invoke_count >= threshold as u64
}

fn average_fault_rate(stats: &[InvocationStatSnapshot], thresholds: &[i64]) -> Option<f64> {
    let (invocations, faults) = stats
        .iter()
        .zip(thresholds)
        .filter(|(stat, threshold)| qualifies(stat, **threshold))
        .fold((0u64, 0u64), |(invocations, faults), (stat, _)| {
            (invocations + stat.invoke_count, faults + stat.fault_count)
        });

    if invocations == 0 {
        None
    } else {
        Some(faults as f64 / invocations as f64)
    }
}

fn judge(
    stat: &InvocationStatSnapshot,
    threshold: i64,
    average_fault_rate: Option<f64>,
    multiple: f64,
) -> MeasureResultDetail {
    let fault_rate = stat.fault_rate();
    let mut fault_rate_ratio = None;

    let state = match average_fault_rate {
        None => MeasureState::Ignore,
        Some(_) if !qualifies(stat, threshold) => MeasureState::Ignore,
        Some(average) if average == 0.0 => MeasureState::Healthy,
        Some(average) => {
            let ratio = fault_rate / average;
            fault_rate_ratio = Some(ratio);
            if ratio >= multiple {
                MeasureState::Abnormal
            } else {
                MeasureState::Healthy
            }
        }
    };

    MeasureResultDetail {
        dimension: Arc::clone(&stat.dimension),
        state,
        window_count: stat.invoke_count,
        fault_count: stat.fault_count,
        fault_rate,
        average_fault_rate,
        fault_rate_ratio,
        least_window_count: threshold,
        least_window_fault_rate_multiple: multiple,
        recovered_origin_weight: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FaultToleranceConfig, FaultToleranceConfigManager};
    use crate::weight::InMemoryWeightStore;

    struct Fixture {
        strategy: ServiceHorizontalMeasureStrategy,
        weights: Arc<InMemoryWeightStore>,
    }

    fn fixture(least_window_count: u64, multiple: f64) -> Fixture {
        let mut config = FaultToleranceConfig::default();
        config.least_window_count = least_window_count;
        config.least_window_fault_rate_multiple = multiple;
        let config: Arc<dyn FaultToleranceConfigProvider> =
            Arc::new(FaultToleranceConfigManager::new(config).unwrap());
        let weights = Arc::new(InMemoryWeightStore::new(Arc::clone(&config)));
        Fixture {
            strategy: ServiceHorizontalMeasureStrategy::new(config, weights.clone()),
            weights,
        }
    }

    fn stat(ip: &str, origin: u32, invocations: u64, faults: u64) -> InvocationStatSnapshot {
        InvocationStatSnapshot::new(
            Arc::new(InvocationStatDimension::new("app", "svc", ip, origin)),
            invocations,
            faults,
        )
    }

    fn snapshot(stats: Vec<InvocationStatSnapshot>) -> ModelSnapshot {
        ModelSnapshot::new(DimensionKey::new("app", "svc"), stats)
    }

    fn state_of(result: &MeasureResult, ip: &str) -> MeasureState {
        result.detail(ip).unwrap().state
    }

    #[test]
    fn test_two_providers_within_multiple() {
        let f = fixture(10, 5.0);
        let result = f.strategy.evaluate(&snapshot(vec![
            stat("p1", 100, 100, 0),
            stat("p2", 100, 100, 50),
        ]));

        assert_eq!(result.average_fault_rate(), Some(0.25));
        assert_eq!(state_of(&result, "p1"), MeasureState::Healthy);
        assert_eq!(state_of(&result, "p2"), MeasureState::Healthy);
        assert_eq!(result.detail("p2").unwrap().fault_rate_ratio, Some(2.0));
    }

    #[test]
    fn test_all_faulting_provider_still_within_multiple() {
        let f = fixture(10, 5.0);
        let result = f.strategy.evaluate(&snapshot(vec![
            stat("p1", 100, 100, 0),
            stat("p2", 100, 100, 100),
        ]));

        assert_eq!(result.average_fault_rate(), Some(0.5));
        assert_eq!(result.detail("p2").unwrap().fault_rate_ratio, Some(2.0));
        assert_eq!(state_of(&result, "p2"), MeasureState::Healthy);
    }

    fn boundary_snapshot(suspect_faults: u64) -> ModelSnapshot {
        // 8 providers x 64 invocations: suspect at 40/64 = 0.625, peers
        // carry 24 faults so the average is 64/512 = 0.125 and the ratio
        // is exactly 5.0.
        let mut stats = vec![stat("p0", 100, 64, suspect_faults)];
        for i in 1..=7 {
            let faults = if i <= 6 { 4 } else { 0 };
            stats.push(stat(&format!("p{i}"), 100, 64, faults));
        }
        snapshot(stats)
    }

    #[test]
    fn test_ratio_exactly_at_multiple_is_abnormal() {
        let f = fixture(10, 5.0);
        let result = f.strategy.evaluate(&boundary_snapshot(40));
        let detail = result.detail("p0").unwrap();
        assert_eq!(detail.fault_rate_ratio, Some(5.0));
        assert_eq!(detail.state, MeasureState::Abnormal);
        for i in 1..=7 {
            assert_eq!(state_of(&result, &format!("p{i}")), MeasureState::Healthy);
        }
    }

    #[test]
    fn test_ratio_just_below_multiple_is_healthy() {
        let f = fixture(10, 5.001);
        let result = f.strategy.evaluate(&boundary_snapshot(40));
        assert_eq!(state_of(&result, "p0"), MeasureState::Healthy);

        let f = fixture(10, 5.0);
        let result = f.strategy.evaluate(&boundary_snapshot(39));
        let ratio = result.detail("p0").unwrap().fault_rate_ratio.unwrap();
        assert!(ratio < 5.0 && ratio > 4.9);
        assert_eq!(state_of(&result, "p0"), MeasureState::Healthy);
    }

    #[test]
    fn test_single_provider_never_abnormal() {
        let f = fixture(10, 6.0);
        for faults in [0, 1, 50, 100] {
            let result = f.strategy.evaluate(&snapshot(vec![stat("p1", 100, 100, faults)]));
            assert_ne!(state_of(&result, "p1"), MeasureState::Abnormal);
        }
    }

    #[test]
    fn test_below_threshold_is_ignored() {
        let f = fixture(10, 2.0);
        let result = f.strategy.evaluate(&snapshot(vec![
            stat("p1", 100, 100, 0),
            stat("p2", 100, 100, 1),
            stat("p3", 100, 9, 9),
        ]));
        let detail = result.detail("p3").unwrap();
        assert_eq!(detail.state, MeasureState::Ignore);
        assert_eq!(detail.least_window_count, 10);
        assert_eq!(result.average_fault_rate(), Some(1.0 / 200.0));
    }

    #[test]
    fn test_inconclusive_when_nobody_qualifies() {
        let f = fixture(10, 2.0);
        let result = f.strategy.evaluate(&snapshot(vec![
            stat("p1", 100, 5, 5),
            stat("p2", 100, 3, 0),
        ]));
        assert!(result.is_inconclusive());
        assert!(result.details().iter().all(|d| d.state == MeasureState::Ignore));
    }

    #[test]
    fn test_zero_average_is_healthy() {
        let f = fixture(10, 2.0);
        let result = f.strategy.evaluate(&snapshot(vec![
            stat("p1", 100, 100, 0),
            stat("p2", 100, 50, 0),
            stat("p3", 100, 2, 0),
        ]));
        assert_eq!(result.average_fault_rate(), Some(0.0));
        assert_eq!(state_of(&result, "p1"), MeasureState::Healthy);
        assert_eq!(state_of(&result, "p2"), MeasureState::Healthy);
        assert_eq!(state_of(&result, "p3"), MeasureState::Ignore);
    }

    #[test]
    fn test_least_window_count_floor_is_one() {
        let f = fixture(0, 2.0);
        let result = f.strategy.evaluate(&snapshot(vec![stat("p1", 100, 1, 0)]));
        assert_eq!(result.detail("p1").unwrap().least_window_count, 1);
        assert_eq!(state_of(&result, "p1"), MeasureState::Healthy);
    }

    #[test]
    fn test_threshold_scales_with_degraded_weight() {
        let f = fixture(10, 2.0);
        let dim = InvocationStatDimension::new("app", "svc", "p1", 100);
        assert_eq!(f.strategy.invocation_least_window_count(&dim, 10), 10);

        f.weights.degrade(&dim).unwrap();
        assert_eq!(f.strategy.invocation_least_window_count(&dim, 10), 1);

        f.weights.restore(&dim).unwrap();
        f.weights.restore(&dim).unwrap();
        f.weights.restore(&dim).unwrap();
        assert_eq!(f.strategy.invocation_least_window_count(&dim, 10), 4);
    }

    #[test]
    fn test_zero_origin_weight_never_qualifies() {
        let f = fixture(10, 2.0);
        let result = f.strategy.evaluate(&snapshot(vec![
            stat("p1", 0, 1000, 1000),
            stat("p2", 100, 100, 0),
            stat("p3", 100, 100, 0),
        ]));
        let detail = result.detail("p1").unwrap();
        assert_eq!(detail.least_window_count, NEVER_QUALIFIES);
        assert_eq!(detail.state, MeasureState::Ignore);
        assert_eq!(result.average_fault_rate(), Some(0.0));
    }

    #[test]
    fn test_removed_provider_never_qualifies() {
        let f = fixture(10, 2.0);
        let removed = InvocationStatDimension::new("app", "svc", "p1", 100);
        f.weights.remove(&removed);
        assert_eq!(
            f.strategy.invocation_least_window_count(&removed, 10),
            NEVER_QUALIFIES
        );
    }

    #[test]
    fn test_evaluate_is_repeatable() {
        let f = fixture(10, 3.0);
        let snap = snapshot(vec![
            stat("p1", 100, 120, 3),
            stat("p2", 100, 80, 40),
            stat("p3", 50, 60, 1),
        ]);
        assert_eq!(f.strategy.evaluate(&snap), f.strategy.evaluate(&snap));
    }

    #[test]
    fn test_measure_resets_model_window() {
        let f = fixture(1, 2.0);
        let model = MeasureModel::new(DimensionKey::new("app", "svc"));
        let stat = model.add_stat(&InvocationStatDimension::new("app", "svc", "p1", 100));
        stat.record_invocation();
        stat.record_fault(true);

        let first = f.strategy.measure(&model);
        assert_eq!(first.detail("p1").unwrap().window_count, 2);

        let second = f.strategy.measure(&model);
        assert_eq!(second.detail("p1").unwrap().window_count, 0);
        assert!(second.is_inconclusive());
    }
}
