//! Degrade bookkeeping: which providers of a service are currently degraded.
//!
//! A provider enters the degrade list when the regulator degrades it and
//! leaves only once the weight store reports it back at origin weight. The
//! list is capped per service, so a service-wide incident cannot degrade
//! every replica at once.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::FaultToleranceConfigProvider;
use crate::dimension::{DimensionKey, InvocationStatDimension};
use crate::measure::MeasureResultDetail;

/// Decisions the regulator consults before touching a provider's weight.
pub trait RegulationStrategy: Send + Sync {
    /// Whether degrading is switched on for the provider's app.
    fn is_degrade_effective(&self, detail: &MeasureResultDetail) -> bool;

    /// Reserves a degrade slot for the provider.
    ///
    /// Returns false when the provider already holds a slot or a free slot
    /// was taken for it; true when the service is at its cap.
    fn is_reach_max_degrade_ip_count(&self, detail: &MeasureResultDetail) -> bool;

    /// Whether the provider is currently degraded.
    fn is_exist_in_the_degrade_list(&self, detail: &MeasureResultDetail) -> bool;

    /// Releases the provider's slot if `recovered_origin_weight` is set.
    fn remove_from_degrade_list(&self, detail: &MeasureResultDetail) -> bool;

    /// Releases the provider's slot without waiting for recovery: it left
    /// the pool, or its degrade was never applied by the weight store.
    fn forget(&self, _dimension: &InvocationStatDimension) {}
}

type DegradeList = Arc<Mutex<HashSet<String>>>;

/// Per-service capped degrade lists.
pub struct ServiceHorizontalRegulationStrategy {
    config: Arc<dyn FaultToleranceConfigProvider>,
    degrade_lists: DashMap<DimensionKey, DegradeList>,
}

impl ServiceHorizontalRegulationStrategy {
    /// Creates a strategy reading switches and caps from `config`.
    pub fn new(config: Arc<dyn FaultToleranceConfigProvider>) -> Self {
        Self {
            config,
            degrade_lists: DashMap::new(),
        }
    }

    /// Currently degraded providers of `key`, sorted.
    pub fn degraded_ips(&self, key: &DimensionKey) -> Vec<String> {
        let mut ips: Vec<String> = self
            .degrade_lists
            .get(key)
            .map(|list| list.lock().iter().cloned().collect())
            .unwrap_or_default();
        ips.sort();
        ips
    }

    /// Number of degraded providers of `key`.
    pub fn degraded_count(&self, key: &DimensionKey) -> usize {
        self.degrade_lists
            .get(key)
            .map(|list| list.lock().len())
            .unwrap_or(0)
    }

    fn degrade_list(&self, key: &DimensionKey) -> DegradeList {
        if let Some(list) = self.degrade_lists.get(key) {
            return Arc::clone(list.value());
        }
        self.degrade_lists
            .entry(key.clone())
            .or_default()
            .value()
            .clone()
    }
}

impl RegulationStrategy for ServiceHorizontalRegulationStrategy {
    fn is_degrade_effective(&self, detail: &MeasureResultDetail) -> bool {
        self.config.is_degrade_effective(detail.app_name())
    }

    fn is_reach_max_degrade_ip_count(&self, detail: &MeasureResultDetail) -> bool {
        let max_ip_count = self.config.degrade_max_ip_count(detail.app_name());
        let list = self.degrade_list(detail.dimension_key());

        let mut ips = list.lock();
        if ips.contains(detail.provider_ip()) {
            return false;
        }
        if ips.len() >= max_ip_count {
            debug!(
                provider = %detail.dimension,
                degraded = ips.len(),
                max_ip_count,
                "degrade cap reached"
            );
            return true;
        }
        ips.insert(detail.provider_ip().to_string());
        false
    }

    fn is_exist_in_the_degrade_list(&self, detail: &MeasureResultDetail) -> bool {
        self.degrade_lists
            .get(detail.dimension_key())
            .map(|list| list.lock().contains(detail.provider_ip()))
            .unwrap_or(false)
    }

    fn remove_from_degrade_list(&self, detail: &MeasureResultDetail) -> bool {
        if !detail.recovered_origin_weight {
            return false;
        }
        self.degrade_lists
            .get(detail.dimension_key())
            .map(|list| list.lock().remove(detail.provider_ip()))
            .unwrap_or(false)
    }

    fn forget(&self, dimension: &InvocationStatDimension) {
        if let Some(list) = self.degrade_lists.get(dimension.dimension_key()) {
            list.lock().remove(dimension.provider_ip());
        }
    }
}
