//! Configuration loading with Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/labsweep.toml` by default)
//! 2. environment variables prefixed with `LABSWEEP_`, nested with `__`
//!
//! Example: `LABSWEEP_RUNNER__STEP_DELAY_MS=50`.
//!
//! ```toml
//! resources = ["GPIB0::22::INSTR"]
//!
//! [application]
//! name = "labsweep"
//! log_level = "info"
//!
//! [runner]
//! step_delay_ms = 20
//! output_dir = "data"
//!
//! [[instruments]]
//! identity = "dmm"
//! interface = "GPIB"
//! address = "22"
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use labsweep_core::descriptor::InstrumentDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/labsweep.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Sweep runner settings
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Control endpoint health check
    #[serde(default)]
    pub health: HealthConfig,
    /// Live resource list reported to the connection registry
    #[serde(default)]
    pub resources: Vec<String>,
    /// Known instruments
    #[serde(default)]
    pub instruments: Vec<InstrumentDescriptor>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Sweep runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Delay after every instrument write and read, in milliseconds
    #[serde(default)]
    pub step_delay_ms: u64,
    /// Directory results files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Results file name prefix
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 0,
            output_dir: default_output_dir(),
            base_filename: default_base_filename(),
        }
    }
}

impl RunnerConfig {
    /// Step delay as a duration.
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// `host:port` of the control endpoint; no check runs when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Seconds between probes
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,
    /// Connect timeout in milliseconds
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            interval_secs: default_health_interval(),
            timeout_ms: default_health_timeout(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "labsweep".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_base_filename() -> String {
    "sweep".to_string()
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    2000
}

impl LabConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path and the environment.
    ///
    /// A missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("LABSWEEP_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.health.interval_secs == 0 {
            return Err("health.interval_secs must be greater than 0".to_string());
        }

        let mut ids = HashSet::new();
        for instrument in &self.instruments {
            if instrument.identity.trim().is_empty() {
                return Err("Instrument with an empty identity".to_string());
            }
            if !ids.insert(&instrument.identity) {
                return Err(format!("Duplicate instrument identity: {}", instrument.identity));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labsweep_core::descriptor::InterfaceTag;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labsweep.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_from_file() {
        let (_dir, path) = write_config(
            r#"
resources = ["GPIB0::22::INSTR"]

[application]
name = "bench"
log_level = "debug"

[runner]
step_delay_ms = 15
output_dir = "/tmp/results"

[health]
endpoint = "127.0.0.1:5025"

[[instruments]]
identity = "dmm"
interface = "GPIB"
address = "22"

[[instruments]]
identity = "awg"
interface = "usb"
address = "MY44"
driver = "agilent33220a"
"#,
        );

        let config = LabConfig::load_from(&path).unwrap();
        assert_eq!(config.application.name, "bench");
        assert_eq!(config.application.log_format, "pretty");
        assert_eq!(config.runner.step_delay(), Duration::from_millis(15));
        assert_eq!(config.runner.base_filename, "sweep");
        assert_eq!(config.health.endpoint.as_deref(), Some("127.0.0.1:5025"));
        assert_eq!(config.health.interval_secs, 30);
        assert_eq!(config.resources, vec!["GPIB0::22::INSTR"]);
        assert_eq!(config.instruments.len(), 2);
        assert_eq!(config.instruments[1].interface, InterfaceTag::Usb);
        assert!(config.instruments[1].visa);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = LabConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.application.log_level, "info");
        assert!(config.instruments.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LabConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().unwrap_err().contains("log_level"));

        let mut config = LabConfig::default();
        config.health.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = LabConfig::default();
        config.instruments = vec![
            InstrumentDescriptor::new("dmm", "GPIB", "22"),
            InstrumentDescriptor::new("dmm", "GPIB", "23"),
        ];
        assert!(config.validate().unwrap_err().contains("Duplicate"));
    }
}
