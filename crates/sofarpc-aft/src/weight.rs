//! Provider traffic weights under regulation.
//!
//! The regulator decides *when* a provider is degraded or restored; a
//! [`WeightStore`] decides *by how much* and is what the load balancer
//! reads. [`InMemoryWeightStore`] is the shipped implementation.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::config::FaultToleranceConfigProvider;
use crate::dimension::InvocationStatDimension;
use crate::error::{AftError, Result};

/// Weight of a provider that has been regulated at least once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentWeight {
    /// Provider receives traffic in proportion to this weight.
    Active(u32),
    /// Provider is fully removed from the pool.
    Removed,
}

/// Regulation phase of a provider held by a weight store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Weight was cut by a degrade.
    Degraded,
    /// Weight is stepping back toward origin.
    Recovering,
    /// Provider is fully removed.
    Removed,
}

/// Owner of the numeric weight of every regulated provider.
pub trait WeightStore: Send + Sync {
    /// Current weight; `None` when the provider was never regulated.
    fn weight(&self, dimension: &InvocationStatDimension) -> Option<CurrentWeight>;

    /// Cuts the provider's weight, returning the new value.
    fn degrade(&self, dimension: &InvocationStatDimension) -> Result<u32>;

    /// Steps the weight back toward origin; true once origin is reached.
    fn restore(&self, dimension: &InvocationStatDimension) -> Result<bool>;

    /// Drops any regulation state for a provider that left the pool.
    fn forget(&self, _dimension: &InvocationStatDimension) {}

    /// Weight the load balancer should use.
    fn effective_weight(&self, dimension: &InvocationStatDimension) -> u32 {
        match self.weight(dimension) {
            None => dimension.origin_weight(),
            Some(CurrentWeight::Active(weight)) => weight,
            Some(CurrentWeight::Removed) => 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WeightEntry {
    weight: CurrentWeight,
    status: ProviderStatus,
}

/// Concurrent in-process weight store.
///
/// Degrade multiplies the current weight by the app's degrade rate, never
/// going below the configured floor. Restore multiplies by the recover
/// rate but always gains at least 1, so it reaches origin in a bounded
/// number of steps; at origin the entry is dropped and the provider reads
/// as unregulated again.
pub struct InMemoryWeightStore {
    config: Arc<dyn FaultToleranceConfigProvider>,
    entries: DashMap<InvocationStatDimension, WeightEntry>,
}

impl InMemoryWeightStore {
    /// Creates an empty store reading rates from `config`.
    pub fn new(config: Arc<dyn FaultToleranceConfigProvider>) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Regulation phase, `None` when unregulated.
    pub fn status(&self, dimension: &InvocationStatDimension) -> Option<ProviderStatus> {
        self.entries.get(dimension).map(|entry| entry.status)
    }

    /// Marks the provider fully removed; it receives no traffic.
    pub fn remove(&self, dimension: &InvocationStatDimension) {
        self.entries.insert(
            dimension.clone(),
            WeightEntry {
                weight: CurrentWeight::Removed,
                status: ProviderStatus::Removed,
            },
        );
        info!(provider = %dimension, "provider removed from traffic");
    }

    /// Number of providers currently below origin or removed.
    pub fn regulated_count(&self) -> usize {
        self.entries.len()
    }

    fn removed_error(dimension: &InvocationStatDimension) -> AftError {
        AftError::ProviderRemoved {
            service: dimension.service().to_string(),
            provider: dimension.provider_ip().to_string(),
        }
    }
}

impl WeightStore for InMemoryWeightStore {
    fn weight(&self, dimension: &InvocationStatDimension) -> Option<CurrentWeight> {
        self.entries.get(dimension).map(|entry| entry.weight)
    }

    fn degrade(&self, dimension: &InvocationStatDimension) -> Result<u32> {
        let config = self.config.config(dimension.app_name());
        let origin = dimension.origin_weight();

        let mut entry = self
            .entries
            .entry(dimension.clone())
            .or_insert(WeightEntry {
                weight: CurrentWeight::Active(origin),
                status: ProviderStatus::Degraded,
            });
        let current = match entry.weight {
            CurrentWeight::Active(weight) => weight,
            CurrentWeight::Removed => return Err(Self::removed_error(dimension)),
        };

        let scaled = (current as f64 * config.weight_degrade_rate).floor() as u32;
        let degraded = scaled.max(config.degrade_least_weight).min(current);
        entry.weight = CurrentWeight::Active(degraded);
        entry.status = ProviderStatus::Degraded;

        debug!(provider = %dimension, from = current, to = degraded, "weight degraded");
        Ok(degraded)
    }

    fn restore(&self, dimension: &InvocationStatDimension) -> Result<bool> {
        let origin = dimension.origin_weight();
        let rate = self.config.weight_recover_rate(dimension.app_name());

        let fully_restored = {
            let Some(mut entry) = self.entries.get_mut(dimension) else {
                return Ok(true);
            };
            let current = match entry.weight {
                CurrentWeight::Active(weight) => weight,
                CurrentWeight::Removed => return Err(Self::removed_error(dimension)),
            };

            let scaled = (current as f64 * rate).floor() as u32;
            let stepped = scaled.max(current.saturating_add(1)).min(origin);
            if stepped >= origin {
                true
            } else {
                entry.weight = CurrentWeight::Active(stepped);
                entry.status = ProviderStatus::Recovering;
                debug!(provider = %dimension, from = current, to = stepped, "weight restoring");
                false
            }
        };

        if fully_restored {
            self.entries.remove(dimension);
            debug!(provider = %dimension, weight = origin, "weight back at origin");
        }
        Ok(fully_restored)
    }

    fn forget(&self, dimension: &InvocationStatDimension) {
        self.entries.remove(dimension);
    }
}
