//! Registry of measure models, one per (app, service) pair.
//!
//! Each engine owns its own registry; nothing here is process-global.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::dimension::{DimensionKey, InvocationStatDimension};
use crate::model::MeasureModel;
use crate::stat::InvocationStat;

/// Concurrent index from (app, service) to its measure model.
#[derive(Debug, Default)]
pub struct StatRegistry {
    models: DashMap<DimensionKey, Arc<MeasureModel>>,
}

impl StatRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stat for `dimension`, creating its model and stat lazily.
    ///
    /// Do not cache the returned handle across calls: an idle stat is
    /// evicted from its model and later traffic must land on the fresh stat
    /// this returns. The stat is added while the registry entry is held, so
    /// a concurrent [`prune`](Self::prune) cannot drop the model in between.
    pub fn get_or_register(&self, dimension: &InvocationStatDimension) -> Arc<InvocationStat> {
        if let Some(model) = self.models.get(dimension.dimension_key()) {
            if let Some(stat) = model.get(dimension) {
                return stat;
            }
        }

        let model = self
            .models
            .entry(dimension.dimension_key().clone())
            .or_insert_with(|| {
                debug!(key = %dimension.dimension_key(), "creating measure model");
                Arc::new(MeasureModel::new(dimension.dimension_key().clone()))
            });
        model.value().add_stat(dimension)
    }

    /// Looks up the stat for `dimension` without creating it.
    pub fn stat(&self, dimension: &InvocationStatDimension) -> Option<Arc<InvocationStat>> {
        self.models
            .get(dimension.dimension_key())
            .and_then(|model| model.get(dimension))
    }

    /// Removes the stat for `dimension`; true if it was registered.
    pub fn unregister(&self, dimension: &InvocationStatDimension) -> bool {
        let removed = self
            .models
            .get(dimension.dimension_key())
            .and_then(|model| model.remove_stat(dimension))
            .is_some();
        if removed {
            self.prune(dimension.dimension_key());
        }
        removed
    }

    /// Model for `key`, if any provider of it is registered.
    pub fn model(&self, key: &DimensionKey) -> Option<Arc<MeasureModel>> {
        self.models.get(key).map(|model| Arc::clone(model.value()))
    }

    /// Every model currently known, ordered by key.
    pub fn models(&self) -> Vec<Arc<MeasureModel>> {
        let mut models: Vec<_> = self
            .models
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        models.sort_by(|a, b| a.key().cmp(b.key()));
        models
    }

    /// Drops the model for `key` once it holds no stats.
    pub fn prune(&self, key: &DimensionKey) -> bool {
        let pruned = self.models.remove_if(key, |_, model| model.is_empty()).is_some();
        if pruned {
            debug!(key = %key, "dropping empty measure model");
        }
        pruned
    }

    /// Number of models.
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Number of stats across all models.
    pub fn stat_count(&self) -> usize {
        self.models.iter().map(|entry| entry.value().len()).sum()
    }
}
