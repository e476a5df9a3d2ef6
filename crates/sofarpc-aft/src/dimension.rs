//! Measurement identities: which app, service and provider a stat belongs to.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Groups every provider of one service as seen by one consumer app.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DimensionKey {
    app_name: String,
    service: String,
}

impl DimensionKey {
    /// Creates a key for `service` consumed by `app_name`.
    pub fn new(app_name: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            service: service.into(),
        }
    }

    /// Consumer application name.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Service (interface) identifier.
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.app_name, self.service)
    }
}

/// Identity of one provider under measurement.
///
/// Immutable once created. The origin weight is the provider's baseline
/// traffic share before any regulation; it is part of the identity, so a
/// provider re-published with a new weight is measured as a new dimension
/// and the stale one ages out through idle eviction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationStatDimension {
    key: DimensionKey,
    provider_ip: String,
    origin_weight: u32,
}

impl InvocationStatDimension {
    /// Creates a dimension for `provider_ip` serving `service` to `app_name`.
    pub fn new(
        app_name: impl Into<String>,
        service: impl Into<String>,
        provider_ip: impl Into<String>,
        origin_weight: u32,
    ) -> Self {
        Self {
            key: DimensionKey::new(app_name, service),
            provider_ip: provider_ip.into(),
            origin_weight,
        }
    }

    /// Consumer application name.
    pub fn app_name(&self) -> &str {
        self.key.app_name()
    }

    /// Service (interface) identifier.
    pub fn service(&self) -> &str {
        self.key.service()
    }

    /// Provider address.
    pub fn provider_ip(&self) -> &str {
        &self.provider_ip
    }

    /// Weight the provider was published with.
    pub fn origin_weight(&self) -> u32 {
        self.origin_weight
    }

    /// The (app, service) key shared by all peers of this provider.
    pub fn dimension_key(&self) -> &DimensionKey {
        &self.key
    }
}

impl fmt::Display for InvocationStatDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.provider_ip)
    }
}
