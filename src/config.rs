//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (`AppConfig::default()`)
//! 2. `config/keithley_daq.toml` (or an explicit path)
//! 3. Environment variables prefixed with `KEITHLEY_DAQ_`, nested keys separated by `__`
//!
//! # Example
//! ```no_run
//! use keithley_daq::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("Polling every {} ms", config.acquisition.poll_interval_ms);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use crate::logging;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/keithley_daq.toml";

/// Prefix for environment overrides, e.g. `KEITHLEY_DAQ_SERIAL__BAUD_RATE=19200`.
pub const ENV_PREFIX: &str = "KEITHLEY_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial line settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Sampling loop settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Data export settings
    #[serde(default)]
    pub export: ExportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

/// Serial line configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Communication speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Terminator appended to every command
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
}

/// Acquisition loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Pause between two sampling iterations, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Integration rate (NPLC) sent during device initialization
    #[serde(default = "default_integration_rate")]
    pub integration_rate: f64,
}

/// Export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Directory `.dat` files are written to when none is given on the command line
    #[serde(default = "default_export_directory")]
    pub directory: PathBuf,
}

// Default value functions
fn default_name() -> String {
    "Keithley Continuous Measurement".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_line_terminator() -> String {
    "\r\n".to_string()
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_integration_rate() -> f64 {
    1.0
}

fn default_export_directory() -> PathBuf {
    PathBuf::from("data")
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

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            line_terminator: default_line_terminator(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            integration_rate: default_integration_rate(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            directory: default_export_directory(),
        }
    }
}

impl SerialConfig {
    /// Read timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AcquisitionConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        logging::parse_log_level(&self.application.log_level)?;
        logging::parse_output_format(&self.application.log_format)?;

        if self.serial.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "serial.baud_rate must be greater than 0".into(),
            ));
        }

        if self.serial.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "serial.timeout_ms must be greater than 0".into(),
            ));
        }

        if self.acquisition.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "acquisition.poll_interval_ms must be greater than 0".into(),
            ));
        }

        let rate = self.acquisition.integration_rate;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Invalid acquisition.integration_rate {}. Must be a positive number",
                rate
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.line_terminator, "\r\n");
        assert_eq!(config.acquisition.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.acquisition.integration_rate, 1.0);
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    #[serial]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[serial]\nbaud_rate = 19200\n\n[acquisition]\npoll_interval_ms = 25\n"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.serial.baud_rate, 19200);
        assert_eq!(config.serial.timeout_ms, 1000);
        assert_eq!(config.acquisition.poll_interval_ms, 25);
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        std::env::set_var("KEITHLEY_DAQ_APPLICATION__LOG_LEVEL", "debug");
        let config = AppConfig::load_from("does/not/exist.toml");
        std::env::remove_var("KEITHLEY_DAQ_APPLICATION__LOG_LEVEL");

        assert_eq!(config.unwrap().application.log_level, "debug");
    }

    #[test]
    fn log_settings_are_checked_by_the_logging_parsers() {
        let mut config = AppConfig::default();
        config.application.log_level = "WARN".into();
        config.application.log_format = "Json".into();
        assert!(config.validate().is_ok());

        config.application.log_level = "verbose".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid log level 'verbose'"), "{}", err);
        assert!(crate::logging::init_from_config(&config).is_err());
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = AppConfig::default();
        config.application.log_level = "verbose".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.acquisition.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.acquisition.integration_rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.application.log_format = "xml".into();
        assert!(config.validate().is_err());
    }
}
