//! All invocation stats of one (app, service) pair.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::dimension::{DimensionKey, InvocationStatDimension};
use crate::stat::{InvocationStat, InvocationStatSnapshot};

/// Concurrent collection of the stats of every provider of one service.
#[derive(Debug)]
pub struct MeasureModel {
    key: DimensionKey,
    stats: DashMap<InvocationStatDimension, Arc<InvocationStat>>,
}

/// Counts of one cycle for every live provider of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    /// The (app, service) pair.
    pub key: DimensionKey,
    /// One snapshot per measured provider, ordered by provider address.
    pub stats: Vec<InvocationStatSnapshot>,
    /// Providers dropped this cycle after staying idle too long.
    pub evicted: Vec<Arc<InvocationStatDimension>>,
}

impl ModelSnapshot {
    /// Builds a snapshot from already-taken stat snapshots.
    pub fn new(key: DimensionKey, mut stats: Vec<InvocationStatSnapshot>) -> Self {
        stats.sort_by(|a, b| a.dimension.provider_ip().cmp(b.dimension.provider_ip()));
        Self {
            key,
            stats,
            evicted: Vec::new(),
        }
    }
}

impl MeasureModel {
    /// Creates an empty model.
    pub fn new(key: DimensionKey) -> Self {
        Self {
            key,
            stats: DashMap::new(),
        }
    }

    /// The (app, service) pair this model covers.
    pub fn key(&self) -> &DimensionKey {
        &self.key
    }

    /// Returns the stat for `dimension`, creating it on first use.
    pub fn add_stat(&self, dimension: &InvocationStatDimension) -> Arc<InvocationStat> {
        if let Some(stat) = self.stats.get(dimension) {
            return Arc::clone(stat.value());
        }
        self.stats
            .entry(dimension.clone())
            .or_insert_with(|| {
                debug!(provider = %dimension, "registering invocation stat");
                Arc::new(InvocationStat::new(dimension.clone()))
            })
            .value()
            .clone()
    }

    /// Looks up the stat for `dimension`.
    pub fn get(&self, dimension: &InvocationStatDimension) -> Option<Arc<InvocationStat>> {
        self.stats.get(dimension).map(|stat| Arc::clone(stat.value()))
    }

    /// Removes the stat for `dimension`.
    pub fn remove_stat(&self, dimension: &InvocationStatDimension) -> Option<Arc<InvocationStat>> {
        self.stats.remove(dimension).map(|(_, stat)| stat)
    }

    /// Number of providers tracked.
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// True when no provider is tracked.
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Handles to every tracked stat.
    pub fn stats(&self) -> Vec<Arc<InvocationStat>> {
        self.stats.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Snapshots every stat, resetting its window, and evicts stats that
    /// have been idle for more than [`MAX_IDLE_CYCLES`](crate::stat::MAX_IDLE_CYCLES).
    pub fn snapshot(&self) -> ModelSnapshot {
        let mut live = Vec::with_capacity(self.stats.len());
        let mut evicted = Vec::new();

        for stat in self.stats() {
            let snapshot = stat.snapshot();
            if stat.is_expired() {
                let dimension = Arc::clone(stat.dimension());
                if self
                    .stats
                    .remove_if(&*dimension, |_, current| Arc::ptr_eq(current, &stat))
                    .is_some()
                {
                    debug!(
                        provider = %dimension,
                        idle_cycles = stat.idle_cycles(),
                        "evicting idle invocation stat"
                    );
                    evicted.push(dimension);
                }
            } else {
                live.push(snapshot);
            }
        }

        let mut snapshot = ModelSnapshot::new(self.key.clone(), live);
        snapshot.evicted = evicted;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stat::MAX_IDLE_CYCLES;

    fn dim(ip: &str) -> InvocationStatDimension {
        InvocationStatDimension::new("app", "svc", ip, 100)
    }

    #[test]
    fn test_add_stat_is_idempotent() {
        let model = MeasureModel::new(DimensionKey::new("app", "svc"));
        let a = model.add_stat(&dim("10.0.0.1"));
        let b = model.add_stat(&dim("10.0.0.1"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn test_snapshot_orders_by_provider() {
        let model = MeasureModel::new(DimensionKey::new("app", "svc"));
        for ip in ["10.0.0.3", "10.0.0.1", "10.0.0.2"] {
            model.add_stat(&dim(ip)).record_invocation();
        }
        let snapshot = model.snapshot();
        let ips: Vec<_> = snapshot
            .stats
            .iter()
            .map(|s| s.dimension.provider_ip().to_string())
            .collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_idle_stat_evicted_after_seventh_cycle() {
        let model = MeasureModel::new(DimensionKey::new("app", "svc"));
        let idle = dim("10.0.0.1");
        let busy = dim("10.0.0.2");
        model.add_stat(&idle);
        let busy_stat = model.add_stat(&busy);

        for cycle in 1..=MAX_IDLE_CYCLES {
            busy_stat.record_invocation();
            let snapshot = model.snapshot();
            assert!(snapshot.evicted.is_empty(), "evicted early at cycle {cycle}");
            assert_eq!(snapshot.stats.len(), 2);
        }

        busy_stat.record_invocation();
        let snapshot = model.snapshot();
        assert_eq!(snapshot.evicted.len(), 1);
        assert_eq!(&*snapshot.evicted[0], &idle);
        assert_eq!(snapshot.stats.len(), 1);
        assert!(model.get(&idle).is_none());
        assert!(model.get(&busy).is_some());
    }

    #[test]
    fn test_remove_stat() {
        let model = MeasureModel::new(DimensionKey::new("app", "svc"));
        model.add_stat(&dim("10.0.0.1"));
        assert!(model.remove_stat(&dim("10.0.0.1")).is_some());
        assert!(model.is_empty());
        assert!(model.remove_stat(&dim("10.0.0.1")).is_none());
    }
}
