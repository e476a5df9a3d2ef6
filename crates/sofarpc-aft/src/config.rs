//! Fault tolerance configuration: a global default plus per-app overrides.
//!
//! ```
//! use sofarpc_aft::config::{FaultToleranceConfig, FaultToleranceConfigManager, FaultToleranceConfigProvider};
//!
//! let manager = FaultToleranceConfigManager::default();
//! let mut shop = FaultToleranceConfig::default();
//! shop.regulation_effective = true;
//! shop.degrade_effective = true;
//! manager.put_app("shop", shop).unwrap();
//!
//! assert!(manager.is_degrade_effective("shop"));
//! assert!(!manager.is_degrade_effective("billing"));
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AftError, Result};

/// Default measurement window in seconds.
pub const DEFAULT_TIME_WINDOW_SECS: u64 = 10;
/// Default minimum invocations per window before a provider is judged.
pub const DEFAULT_LEAST_WINDOW_COUNT: u64 = 10;
/// Default fault-rate multiple over the peer average that marks a provider abnormal.
pub const DEFAULT_LEAST_WINDOW_FAULT_RATE_MULTIPLE: f64 = 6.0;
/// Default factor applied to a provider's weight on each degrade.
pub const DEFAULT_WEIGHT_DEGRADE_RATE: f64 = 0.05;
/// Default factor applied to a provider's weight on each restore step.
pub const DEFAULT_WEIGHT_RECOVER_RATE: f64 = 2.0;
/// Default floor for a degraded weight.
pub const DEFAULT_DEGRADE_LEAST_WEIGHT: u32 = 1;
/// Default cap on simultaneously degraded providers per service.
pub const DEFAULT_DEGRADE_MAX_IP_COUNT: usize = 2;

/// What the regulator does with a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulationMode {
    /// Apply degrade and restore through the weight store.
    #[default]
    Weight,
    /// Log the decision only.
    LogOnly,
}

/// Fault tolerance settings for one app.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultToleranceConfig {
    /// Collect and measure invocation stats at all.
    pub regulation_effective: bool,
    /// Act on measurement verdicts.
    pub degrade_effective: bool,
    /// Seconds between measurements of one service.
    pub time_window_secs: u64,
    /// Minimum invocations per window, scaled by current/origin weight.
    pub least_window_count: u64,
    /// Ratio of own fault rate to peer average at or above which a provider is abnormal.
    pub least_window_fault_rate_multiple: f64,
    /// Factor applied to the current weight on degrade, in `(0, 1]`.
    pub weight_degrade_rate: f64,
    /// Factor applied to the current weight on each restore step, above 1.
    pub weight_recover_rate: f64,
    /// Floor for a degraded weight, at least 1 so a degraded provider keeps
    /// receiving the traffic it is measured on.
    pub degrade_least_weight: u32,
    /// Cap on simultaneously degraded providers per service.
    pub degrade_max_ip_count: usize,
    /// Whether decisions are applied or only logged.
    pub regulation_mode: RegulationMode,
}

impl Default for FaultToleranceConfig {
    fn default() -> Self {
        Self {
            regulation_effective: false,
            degrade_effective: false,
            time_window_secs: DEFAULT_TIME_WINDOW_SECS,
            least_window_count: DEFAULT_LEAST_WINDOW_COUNT,
            least_window_fault_rate_multiple: DEFAULT_LEAST_WINDOW_FAULT_RATE_MULTIPLE,
            weight_degrade_rate: DEFAULT_WEIGHT_DEGRADE_RATE,
            weight_recover_rate: DEFAULT_WEIGHT_RECOVER_RATE,
            degrade_least_weight: DEFAULT_DEGRADE_LEAST_WEIGHT,
            degrade_max_ip_count: DEFAULT_DEGRADE_MAX_IP_COUNT,
            regulation_mode: RegulationMode::Weight,
        }
    }
}

impl FaultToleranceConfig {
    /// Measurement window as a duration.
    pub fn time_window(&self) -> Duration {
        Duration::from_secs(self.time_window_secs)
    }

    /// Rejects values the measurement and weight arithmetic cannot work with.
    ///
    /// The multiple must exceed 1: a ratio against the peer average of 1 or
    /// less describes an average provider.
    pub fn validate(&self) -> Result<()> {
        if self.time_window_secs == 0 {
            return Err(invalid("time_window_secs must be at least 1"));
        }
        let multiple = self.least_window_fault_rate_multiple;
        if !multiple.is_finite() || multiple <= 1.0 {
            return Err(invalid(format!(
                "least_window_fault_rate_multiple must be finite and above 1, got {multiple}"
            )));
        }
        let degrade = self.weight_degrade_rate;
        if !(degrade > 0.0 && degrade <= 1.0) {
            return Err(invalid(format!(
                "weight_degrade_rate must be in (0, 1], got {degrade}"
            )));
        }
        let recover = self.weight_recover_rate;
        if !recover.is_finite() || recover <= 1.0 {
            return Err(invalid(format!(
                "weight_recover_rate must be finite and above 1, got {recover}"
            )));
        }
        if self.degrade_least_weight == 0 {
            return Err(invalid("degrade_least_weight must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(reason: impl Into<String>) -> AftError {
    AftError::InvalidConfig {
        reason: reason.into(),
    }
}

/// Source of per-app fault tolerance settings.
///
/// Only [`config`](Self::config) is required; the accessors read from it.
pub trait FaultToleranceConfigProvider: Send + Sync {
    /// Effective settings for `app_name`.
    fn config(&self, app_name: &str) -> FaultToleranceConfig;

    /// Measurement window for `app_name`.
    fn time_window(&self, app_name: &str) -> Duration {
        self.config(app_name).time_window()
    }

    /// Unscaled minimum invocations per window.
    fn least_window_count(&self, app_name: &str) -> u64 {
        self.config(app_name).least_window_count
    }

    /// Abnormal threshold as a multiple of the peer average fault rate.
    fn least_window_fault_rate_multiple(&self, app_name: &str) -> f64 {
        self.config(app_name).least_window_fault_rate_multiple
    }

    /// Cap on degraded providers per service.
    fn degrade_max_ip_count(&self, app_name: &str) -> usize {
        self.config(app_name).degrade_max_ip_count
    }

    /// Whether verdicts are acted upon.
    fn is_degrade_effective(&self, app_name: &str) -> bool {
        self.config(app_name).degrade_effective
    }

    /// Whether invocations are recorded and measured.
    fn is_regulation_effective(&self, app_name: &str) -> bool {
        self.config(app_name).regulation_effective
    }

    /// Degrade factor.
    fn weight_degrade_rate(&self, app_name: &str) -> f64 {
        self.config(app_name).weight_degrade_rate
    }

    /// Restore step factor.
    fn weight_recover_rate(&self, app_name: &str) -> f64 {
        self.config(app_name).weight_recover_rate
    }

    /// Degraded weight floor.
    fn degrade_least_weight(&self, app_name: &str) -> u32 {
        self.config(app_name).degrade_least_weight
    }

    /// Apply or log-only.
    fn regulation_mode(&self, app_name: &str) -> RegulationMode {
        self.config(app_name).regulation_mode
    }
}

/// On-disk layout: a global section and per-app overrides.
///
/// An app override is a complete config; fields it leaves out take the
/// built-in defaults, not the global section's values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultToleranceSettings {
    /// Settings for apps without an override.
    pub global: FaultToleranceConfig,
    /// Per-app overrides keyed by app name.
    pub apps: HashMap<String, FaultToleranceConfig>,
}

impl FaultToleranceSettings {
    /// Loads settings from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => Ok(toml::from_str(&contents)?),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => Err(AftError::UnsupportedConfigFormat {
                ext: ext.to_string(),
            }),
        }
    }
}

/// In-process config provider with runtime-updatable overrides.
#[derive(Debug)]
pub struct FaultToleranceConfigManager {
    global: RwLock<FaultToleranceConfig>,
    apps: DashMap<String, FaultToleranceConfig>,
}

impl Default for FaultToleranceConfigManager {
    fn default() -> Self {
        Self {
            global: RwLock::new(FaultToleranceConfig::default()),
            apps: DashMap::new(),
        }
    }
}

impl FaultToleranceConfigManager {
    /// Creates a manager with `global` as the default for every app.
    pub fn new(global: FaultToleranceConfig) -> Result<Self> {
        global.validate()?;
        Ok(Self {
            global: RwLock::new(global),
            apps: DashMap::new(),
        })
    }

    /// Builds a manager from loaded settings, validating every section.
    pub fn from_settings(settings: FaultToleranceSettings) -> Result<Self> {
        let manager = Self::new(settings.global)?;
        for (app, config) in settings.apps {
            manager.put_app(app, config)?;
        }
        Ok(manager)
    }

    /// Loads and validates a `.toml` or `.json` settings file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_settings(FaultToleranceSettings::from_file(path)?)
    }

    /// Replaces the global default.
    pub fn set_global(&self, config: FaultToleranceConfig) -> Result<()> {
        config.validate()?;
        *self.global.write() = config;
        Ok(())
    }

    /// Current global default.
    pub fn global(&self) -> FaultToleranceConfig {
        *self.global.read()
    }

    /// Installs or replaces the override for `app_name`.
    pub fn put_app(&self, app_name: impl Into<String>, config: FaultToleranceConfig) -> Result<()> {
        config.validate()?;
        self.apps.insert(app_name.into(), config);
        Ok(())
    }

    /// Drops the override for `app_name`, returning it.
    pub fn remove_app(&self, app_name: &str) -> Option<FaultToleranceConfig> {
        self.apps.remove(app_name).map(|(_, config)| config)
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> FaultToleranceSettings {
        FaultToleranceSettings {
            global: self.global(),
            apps: self
                .apps
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        }
    }
}

impl FaultToleranceConfigProvider for FaultToleranceConfigManager {
    fn config(&self, app_name: &str) -> FaultToleranceConfig {
        match self.apps.get(app_name) {
            Some(config) => *config,
            None => *self.global.read(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = FaultToleranceConfig::default();
        assert!(!config.regulation_effective);
        assert!(!config.degrade_effective);
        assert_eq!(config.time_window(), Duration::from_secs(10));
        assert_eq!(config.least_window_count, 10);
        assert!((config.least_window_fault_rate_multiple - 6.0).abs() < f64::EPSILON);
        assert!((config.weight_degrade_rate - 0.05).abs() < f64::EPSILON);
        assert!((config.weight_recover_rate - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.degrade_least_weight, 1);
        assert_eq!(config.degrade_max_ip_count, 2);
        assert_eq!(config.regulation_mode, RegulationMode::Weight);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FaultToleranceConfig::default();
        config.time_window_secs = 0;
        assert!(config.validate().is_err());

        let mut config = FaultToleranceConfig::default();
        config.least_window_fault_rate_multiple = 1.0;
        assert!(config.validate().is_err());

        let mut config = FaultToleranceConfig::default();
        config.least_window_fault_rate_multiple = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = FaultToleranceConfig::default();
        config.weight_degrade_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = FaultToleranceConfig::default();
        config.weight_recover_rate = 1.0;
        assert!(config.validate().is_err());

        let mut config = FaultToleranceConfig::default();
        config.degrade_least_weight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_degrade_floor_rejected_on_load() {
        let mut config = FaultToleranceConfig::default();
        config.degrade_least_weight = 0;
        assert!(FaultToleranceConfigManager::new(config).is_err());

        let manager = FaultToleranceConfigManager::default();
        assert!(manager.put_app("shop", config).is_err());
    }

    #[test]
    fn test_app_override_falls_back_to_global() {
        let manager = FaultToleranceConfigManager::default();
        let mut shop = FaultToleranceConfig::default();
        shop.least_window_count = 50;
        shop.degrade_effective = true;
        manager.put_app("shop", shop).unwrap();

        assert_eq!(manager.least_window_count("shop"), 50);
        assert!(manager.is_degrade_effective("shop"));
        assert_eq!(manager.least_window_count("billing"), 10);
        assert!(!manager.is_degrade_effective("billing"));

        assert!(manager.remove_app("shop").is_some());
        assert_eq!(manager.least_window_count("shop"), 10);
    }

    #[test]
    fn test_put_app_rejects_invalid() {
        let manager = FaultToleranceConfigManager::default();
        let mut bad = FaultToleranceConfig::default();
        bad.weight_degrade_rate = 2.0;
        assert!(matches!(
            manager.put_app("shop", bad),
            Err(AftError::InvalidConfig { .. })
        ));
        assert!(manager.settings().apps.is_empty());
    }

    #[test]
    fn test_set_global() {
        let manager = FaultToleranceConfigManager::default();
        let mut global = FaultToleranceConfig::default();
        global.regulation_effective = true;
        manager.set_global(global).unwrap();
        assert!(manager.is_regulation_effective("anything"));
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[global]
regulation_effective = true
time_window_secs = 5

[apps.shop]
regulation_effective = true
degrade_effective = true
degrade_max_ip_count = 4
regulation_mode = "log_only"
"#
        )
        .unwrap();

        let manager = FaultToleranceConfigManager::from_file(file.path()).unwrap();
        assert!(manager.is_regulation_effective("other"));
        assert_eq!(manager.time_window("other"), Duration::from_secs(5));
        assert_eq!(manager.degrade_max_ip_count("shop"), 4);
        assert_eq!(manager.regulation_mode("shop"), RegulationMode::LogOnly);
        assert_eq!(manager.time_window("shop"), Duration::from_secs(10));
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{"global": {{"degrade_effective": true, "least_window_count": 20}}}}"#
        )
        .unwrap();

        let manager = FaultToleranceConfigManager::from_file(file.path()).unwrap();
        assert!(manager.is_degrade_effective("any"));
        assert_eq!(manager.least_window_count("any"), 20);
    }

    #[test]
    fn test_from_file_rejects_invalid_values() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[global]\nleast_window_fault_rate_multiple = 0.5").unwrap();
        assert!(matches!(
            FaultToleranceConfigManager::from_file(file.path()),
            Err(AftError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        assert!(matches!(
            FaultToleranceSettings::from_file(file.path()),
            Err(AftError::UnsupportedConfigFormat { .. })
        ));
    }

    #[test]
    fn test_settings_round_trip() {
        let manager = FaultToleranceConfigManager::default();
        let mut shop = FaultToleranceConfig::default();
        shop.degrade_max_ip_count = 3;
        manager.put_app("shop", shop).unwrap();

        let json = serde_json::to_string(&manager.settings()).unwrap();
        let decoded: FaultToleranceSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.apps.get("shop"), Some(&shop));
        assert_eq!(decoded.global, FaultToleranceConfig::default());
    }
}
