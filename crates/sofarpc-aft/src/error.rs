//! Error types for the adaptive fault tolerance subsystem.

use thiserror::Error;

/// Errors that can occur while configuring or regulating providers.
#[derive(Debug, Error)]
pub enum AftError {
    /// A configuration value is out of range.
    #[error("invalid fault tolerance config: {reason}")]
    InvalidConfig {
        /// Which value was rejected and why.
        reason: String,
    },

    /// Config file extension is neither `toml` nor `json`.
    #[error("unsupported config file extension: {ext:?}")]
    UnsupportedConfigFormat {
        /// The extension found on the path.
        ext: String,
    },

    /// TOML config could not be parsed.
    #[error("TOML config error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// JSON config could not be parsed.
    #[error("JSON config error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// The weight store holds the fully-removed sentinel for this provider.
    #[error("provider {provider} of {service} has been removed")]
    ProviderRemoved {
        /// Service the provider belongs to.
        service: String,
        /// Provider address.
        provider: String,
    },

    /// A weight store implementation failed to apply a change.
    #[error("weight store error: {reason}")]
    WeightStore {
        /// Failure description from the store.
        reason: String,
    },

    /// A panic escaped while regulating one service model.
    #[error("regulation of {app}/{service} panicked: {reason}")]
    ModelPanicked {
        /// Consumer application.
        app: String,
        /// Service being regulated.
        service: String,
        /// Panic payload, when it was a string.
        reason: String,
    },

    /// I/O error while reading configuration.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Result alias for the fault tolerance subsystem.
pub type Result<T> = std::result::Result<T, AftError>;
