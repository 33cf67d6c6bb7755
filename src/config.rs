//! Factory Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the factory tool.
//! Configuration is layered from:
//! 1. Built-in defaults (the thresholds the production line was tuned with)
//! 2. An optional TOML file
//! 3. Environment variables (prefixed with `SENSE_FACTORY_`, nested keys split by `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! SENSE_FACTORY_APPLICATION__LOG_LEVEL=debug
//! SENSE_FACTORY_BUTTONS__TIMEOUT_SECS=20
//! SENSE_FACTORY_LTR559__PROX_NEAR_THRESHOLD=15000
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sense_factory::config::FactoryConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = FactoryConfig::load(None)?;
//!     println!("Button timeout: {}s", config.buttons.timeout_secs);
//!     Ok(())
//! }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "SENSE_FACTORY_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level factory configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Status indicator feedback
    pub indicator: IndicatorConfig,
    /// Moving-average settings shared by all analog checks
    pub sampling: SamplingConfig,
    /// Button check
    pub buttons: ButtonsConfig,
    /// LTR559 proximity / ambient light check
    pub ltr559: Ltr559Config,
    /// BME688 gas / temperature check
    pub bme688: Bme688Config,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit stderr logs as JSON
    pub log_json: bool,
    /// Operator name; defaults to the login name
    pub operator: Option<String>,
    /// Directory for the JSON report; no report file when unset
    pub report_dir: Option<PathBuf>,
    /// Operator transcript file
    pub operator_log: Option<PathBuf>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            operator: None,
            report_dir: None,
            operator_log: None,
        }
    }
}

/// Indicator blink configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Duration of each blink step in milliseconds
    pub blink_ms: u64,
    /// Brightness used when the indicator is lit
    pub brightness: u8,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            blink_ms: 50,
            brightness: 255,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Moving-average window size
    pub window: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            window: crate::sampling::DEFAULT_WINDOW,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ButtonsConfig {
    /// Bound on each press and each release wait
    pub timeout_secs: f64,
    /// Button labels, tested in order
    pub buttons: Vec<String>,
}

impl ButtonsConfig {
    /// Saturates instead of panicking on values [`FactoryConfig::validate`] rejects.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(if self.timeout_secs > 0.0 {
            Duration::MAX
        } else {
            Duration::ZERO
        })
    }
}

impl Default for ButtonsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10.0,
            buttons: ["A", "B", "X", "Y"].iter().map(|b| b.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ltr559Config {
    pub baseline_samples: usize,
    pub prox_max_samples: usize,
    pub light_max_samples: usize,
    pub delay_ms: u64,
    /// Proximity reading above which the sensor counts as covered
    pub prox_near_threshold: f64,
    /// Allowed distance from the proximity baseline once uncovered
    pub prox_far_tolerance: f64,
    /// Lux below which the sensor counts as dark
    pub light_dark_threshold: f64,
    /// Required lux distance from baseline under a bright light
    pub light_bright_delta: f64,
    /// Allowed lux distance from baseline once returned to neutral
    pub light_neutral_tolerance: f64,
}

impl Ltr559Config {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for Ltr559Config {
    fn default() -> Self {
        Self {
            baseline_samples: 5,
            prox_max_samples: 50,
            light_max_samples: 100,
            delay_ms: 100,
            prox_near_threshold: 20000.0,
            prox_far_tolerance: 200.0,
            light_dark_threshold: 2.5,
            light_bright_delta: 4000.0,
            light_neutral_tolerance: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bme688Config {
    pub baseline_samples: usize,
    pub max_samples: usize,
    /// Cap for the slower return-to-normal temperature phase
    pub cooldown_max_samples: usize,
    pub delay_ms: u64,
    /// Gas resistance (ohms) below which air counts as poor
    pub poor_gas_threshold: f64,
    /// Gas resistance (ohms) above which air counts as normal again
    pub normal_gas_threshold: f64,
    /// Warming over baseline expected from a fingertip, in degrees C
    pub hot_delta_c: f64,
    /// Allowed distance from baseline once cooled, in degrees C
    pub temperature_tolerance_c: f64,
}

impl Bme688Config {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for Bme688Config {
    fn default() -> Self {
        Self {
            baseline_samples: 10,
            max_samples: 50,
            cooldown_max_samples: 100,
            delay_ms: 250,
            poor_gas_threshold: 10000.0,
            normal_gas_threshold: 40000.0,
            hot_delta_c: 3.0,
            temperature_tolerance_c: 7.0,
        }
    }
}

impl FactoryConfig {
    /// Load configuration from defaults, an optional TOML file, and the environment.
    ///
    /// A missing file is not an error; figment simply contributes nothing for it.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(FactoryConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load from a TOML string layered over the defaults (no environment).
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(FactoryConfig::default())).merge(Toml::string(toml)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic constraints that parsing cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.sampling.window == 0 {
            return Err(ConfigError::ValidationError(
                "sampling.window must be at least 1".to_string(),
            ));
        }

        let counts = [
            ("ltr559.baseline_samples", self.ltr559.baseline_samples),
            ("ltr559.prox_max_samples", self.ltr559.prox_max_samples),
            ("ltr559.light_max_samples", self.ltr559.light_max_samples),
            ("bme688.baseline_samples", self.bme688.baseline_samples),
            ("bme688.max_samples", self.bme688.max_samples),
            ("bme688.cooldown_max_samples", self.bme688.cooldown_max_samples),
        ];
        if let Some((key, _)) = counts.iter().find(|(_, n)| *n == 0) {
            return Err(ConfigError::ValidationError(format!(
                "{key} must be at least 1"
            )));
        }

        let timeout = self.buttons.timeout_secs;
        if !(timeout > 0.0 && Duration::try_from_secs_f64(timeout).is_ok()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid buttons.timeout_secs {timeout}. Must be a positive number of seconds"
            )));
        }

        let mut labels = std::collections::HashSet::new();
        for label in &self.buttons.buttons {
            if crate::device::EventField::button(label).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "Unknown button '{label}'. Must be one of: A, B, X, Y"
                )));
            }
            if !labels.insert(label.to_ascii_uppercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate button: '{label}'"
                )));
            }
        }

        Ok(())
    }

    /// Operator name from config, falling back to the login name.
    pub fn operator(&self) -> String {
        self.application
            .operator
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_are_valid() {
        let config = FactoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buttons.timeout(), Duration::from_secs(10));
        assert_eq!(config.ltr559.delay(), Duration::from_millis(100));
        assert_eq!(config.bme688.delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = FactoryConfig::from_toml_str(
            r#"
            [buttons]
            timeout_secs = 2.5
            buttons = ["a", "y"]

            [ltr559]
            prox_near_threshold = 15000.0
            "#,
        )
        .unwrap();

        assert_eq!(config.buttons.timeout_secs, 2.5);
        assert_eq!(config.buttons.buttons, vec!["a", "y"]);
        assert_eq!(config.ltr559.prox_near_threshold, 15000.0);
        // untouched keys keep defaults
        assert_eq!(config.ltr559.light_dark_threshold, 2.5);
        assert_eq!(config.bme688.baseline_samples, 10);
    }

    #[test]
    fn test_invalid_log_level() {
        let result = FactoryConfig::from_toml_str("[application]\nlog_level = \"loud\"\n");
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid log_level 'loud'"));
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = FactoryConfig::default();
        config.sampling.window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sample_cap_rejected() {
        let mut config = FactoryConfig::default();
        config.bme688.max_samples = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bme688.max_samples"));
    }

    #[test]
    fn test_button_validation() {
        let mut config = FactoryConfig::default();
        config.buttons.buttons = vec!["A".into(), "a".into()];
        assert!(config.validate().unwrap_err().to_string().contains("Duplicate"));

        config.buttons.buttons = vec!["Z".into()];
        assert!(config.validate().unwrap_err().to_string().contains("Unknown button"));

        config.buttons.buttons = vec!["A".into()];
        config.buttons.timeout_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let err = FactoryConfig::from_toml_str("[buttons]\ntimeout_secs = 1e30\n").unwrap_err();
        assert!(err.to_string().contains("Invalid buttons.timeout_secs"));

        let mut config = FactoryConfig::default();
        config.buttons.timeout_secs = f64::NAN;
        assert!(config.validate().is_err());

        // never panics, even unvalidated
        config.buttons.timeout_secs = 1e30;
        assert_eq!(config.buttons.timeout(), Duration::MAX);
        config.buttons.timeout_secs = -1.0;
        assert_eq!(config.buttons.timeout(), Duration::ZERO);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("SENSE_FACTORY_BUTTONS__TIMEOUT_SECS", "3");
        std::env::set_var("SENSE_FACTORY_APPLICATION__OPERATOR", "line-7");
        let config = FactoryConfig::load(None);
        std::env::remove_var("SENSE_FACTORY_BUTTONS__TIMEOUT_SECS");
        std::env::remove_var("SENSE_FACTORY_APPLICATION__OPERATOR");

        let config = config.unwrap();
        assert_eq!(config.buttons.timeout_secs, 3.0);
        assert_eq!(config.operator(), "line-7");
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("factory.toml");
        std::fs::write(&path, "[bme688]\nhot_delta_c = 4.5\n").unwrap();

        let config = FactoryConfig::load(Some(&path)).unwrap();
        assert_eq!(config.bme688.hot_delta_c, 4.5);
    }
}
