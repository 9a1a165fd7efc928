//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/motor_tuner.toml` (or the file passed with `--config`)
//! 3. Environment variables prefixed with `MOTOR_TUNER_`, nested with `__`
//!
//! Durations are written in humantime notation (`10ms`, `1s`, `200ms`).
//!
//! # Example
//! ```no_run
//! use motor_tuner::config::TunerConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // MOTOR_TUNER_TIMING__SETTLE_GRACE=500ms overrides timing.settle_grace
//! let config = TunerConfig::load()?;
//! config.validate()?;
//! println!("Acquisition period: {:?}", config.timing.acquisition_period);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppResult, TunerError};
use crate::experiment::{ResyncPolicy, RunTiming, MAX_TEST_DURATION};
use crate::hardware::{DeviceId, Register};
use crate::logging::OutputFormat;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/motor_tuner.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MOTOR_TUNER_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TunerConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Run loop, control loop and resynchronization timing
    #[serde(default)]
    pub timing: TimingConfig,
    /// Initial control surface values
    #[serde(default)]
    pub defaults: DefaultsConfig,
    /// Simulated actuator bus
    #[serde(default)]
    pub mock: MockConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Motor Tuning Tool".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Timing constants. Never part of a run request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Run loop sampling period
    #[serde(with = "humantime_serde")]
    pub acquisition_period: Duration,
    /// Wait between the end of the window and torque disable
    #[serde(with = "humantime_serde")]
    pub settle_grace: Duration,
    /// Control surface poll interval
    #[serde(with = "humantime_serde")]
    pub surface_poll: Duration,
    /// Renderer refresh period
    #[serde(with = "humantime_serde")]
    pub display_period: Duration,
    /// Interval between enumerations while waiting for a restarted drive
    #[serde(with = "humantime_serde")]
    pub resync_poll: Duration,
    /// Give up resynchronizing after this many enumerations (unbounded if unset)
    #[serde(default)]
    pub resync_max_attempts: Option<u32>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            acquisition_period: Duration::from_millis(10),
            settle_grace: Duration::from_secs(1),
            surface_poll: Duration::from_millis(200),
            display_period: Duration::from_millis(50),
            resync_poll: Duration::from_secs(1),
            resync_max_attempts: None,
        }
    }
}

/// Initial values of the tuning form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Suggested step set-point (capped by the position loop output limit)
    pub setpoint: f64,
    /// Test duration
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            setpoint: 50.0,
            duration: Duration::from_secs(3),
        }
    }
}

/// Simulated bus used by the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockConfig {
    /// Drive ids present on the bus
    pub device_ids: Vec<u16>,
    /// Empty enumerations after a configuration save
    pub restart_polls: usize,
    /// Register overrides, keyed by firmware register name
    #[serde(default)]
    pub registers: BTreeMap<String, f64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            device_ids: vec![100],
            restart_polls: 2,
            registers: BTreeMap::new(),
        }
    }
}

impl MockConfig {
    /// Drive ids as typed bus identifiers.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.device_ids.iter().copied().map(DeviceId).collect()
    }

    /// Register overrides with parsed register names.
    pub fn register_overrides(&self) -> AppResult<Vec<(Register, f64)>> {
        self.registers
            .iter()
            .map(|(name, value)| {
                name.parse::<Register>()
                    .map(|register| (register, *value))
                    .map_err(TunerError::Configuration)
            })
            .collect()
    }
}

impl TunerConfig {
    /// Load configuration from `config/motor_tuner.toml` and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The layered provider, exposed for callers that merge further sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(TunerConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(TunerError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let periods = [
            ("acquisition_period", self.timing.acquisition_period),
            ("surface_poll", self.timing.surface_poll),
            ("display_period", self.timing.display_period),
            ("resync_poll", self.timing.resync_poll),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(TunerError::Configuration(format!(
                    "timing.{} must be greater than zero",
                    name
                )));
            }
        }
        if self.timing.resync_max_attempts == Some(0) {
            return Err(TunerError::Configuration(
                "timing.resync_max_attempts must be at least 1 (omit it for no bound)".into(),
            ));
        }

        if !self.defaults.setpoint.is_finite() {
            return Err(TunerError::Configuration(
                "defaults.setpoint must be finite".into(),
            ));
        }
        if self.defaults.duration.is_zero() || self.defaults.duration > MAX_TEST_DURATION {
            return Err(TunerError::Configuration(format!(
                "defaults.duration must be in (0, {}s]",
                MAX_TEST_DURATION.as_secs()
            )));
        }

        if self.mock.device_ids.is_empty() {
            return Err(TunerError::Configuration(
                "mock.device_ids must list at least one drive".into(),
            ));
        }
        let mut ids = std::collections::HashSet::new();
        for id in &self.mock.device_ids {
            if !ids.insert(id) {
                return Err(TunerError::Configuration(format!(
                    "Duplicate mock device id: {}",
                    id
                )));
            }
        }
        self.mock.register_overrides()?;

        Ok(())
    }

    /// Run loop timing derived from this configuration.
    pub fn run_timing(&self) -> RunTiming {
        RunTiming {
            acquisition_period: self.timing.acquisition_period,
            settle_grace: self.timing.settle_grace,
        }
    }

    /// Post-save resynchronization policy derived from this configuration.
    pub fn resync_policy(&self) -> ResyncPolicy {
        ResyncPolicy {
            poll_interval: self.timing.resync_poll,
            max_attempts: self.timing.resync_max_attempts,
        }
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| TunerError::Configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_defaults() {
        let config = TunerConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, TunerConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.acquisition_period, Duration::from_millis(10));
        assert_eq!(config.timing.resync_max_attempts, None);
    }

    #[test]
    #[serial]
    fn file_overrides_defaults() {
        let file = write_config(
            r#"
            [application]
            name = "bench rig"
            log_level = "debug"
            log_format = "json"

            [timing]
            acquisition_period = "5ms"
            settle_grace = "250ms"
            resync_max_attempts = 30

            [mock]
            device_ids = [100, 101]
            restart_polls = 4

            [mock.registers]
            motorPosPidOutMax = 20.0
            "#,
        );

        let config = TunerConfig::load_from(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.application.name, "bench rig");
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert_eq!(config.timing.acquisition_period, Duration::from_millis(5));
        assert_eq!(config.timing.settle_grace, Duration::from_millis(250));
        // Unset keys keep their defaults.
        assert_eq!(config.timing.surface_poll, Duration::from_millis(200));
        assert_eq!(config.resync_policy().max_attempts, Some(30));
        assert_eq!(config.mock.devices(), vec![DeviceId(100), DeviceId(101)]);
        assert_eq!(
            config.mock.register_overrides().unwrap(),
            vec![(Register::PosPidOutMax, 20.0)]
        );
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let file = write_config(
            r#"
            [timing]
            settle_grace = "2s"
            "#,
        );
        std::env::set_var("MOTOR_TUNER_TIMING__SETTLE_GRACE", "300ms");
        std::env::set_var("MOTOR_TUNER_DEFAULTS__SETPOINT", "12.5");

        let config = TunerConfig::load_from(file.path());

        std::env::remove_var("MOTOR_TUNER_TIMING__SETTLE_GRACE");
        std::env::remove_var("MOTOR_TUNER_DEFAULTS__SETPOINT");

        let config = config.unwrap();
        assert_eq!(config.timing.settle_grace, Duration::from_millis(300));
        assert_eq!(config.defaults.setpoint, 12.5);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = TunerConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.timing.acquisition_period = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.timing.resync_max_attempts = Some(0);
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.mock.device_ids = vec![100, 100];
        assert!(config.validate().is_err());

        let mut config = TunerConfig::default();
        config.mock.registers.insert("motorFooKp".into(), 1.0);
        assert!(matches!(
            config.validate(),
            Err(TunerError::Configuration(_))
        ));
    }

    #[test]
    fn effective_config_renders_as_toml() {
        let text = TunerConfig::default().to_toml().unwrap();
        assert!(text.contains("[timing]"));
        assert!(text.contains("acquisition_period = \"10ms\""));
    }
}
