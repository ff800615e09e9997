//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/config.toml` (base configuration)
//! 2. Environment variables prefixed with `MEAL_KIOSK_`, nested keys split on `__`
//!
//! Every section has defaults, so a missing or empty file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use meal_kiosk::config::KioskConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = KioskConfig::load()?;
//! config.validate()?;
//! println!("Uploading to {}", config.api.base_url);
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppResult, KioskError};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MEAL_KIOSK_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KioskConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Local storage paths
    pub path: PathConfig,
    /// Remote upload endpoint
    pub api: ApiConfig,
    /// Capture protocol timing
    pub capture: CaptureConfig,
    /// Depth camera settings
    pub camera: CameraConfig,
    /// Load cell settings
    pub weight: WeightConfig,
    /// Calibration sampling settings
    pub calibration: CalibrationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Directory for daily log files
    pub log_dir: PathBuf,
    /// Log to the terminal at debug level instead of the daily file
    pub show_log: bool,
    /// Output format: pretty, compact or json
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "meal-kiosk".to_string(),
            log_level: "info".to_string(),
            log_dir: PathBuf::from("logs"),
            show_log: false,
            log_format: "compact".to_string(),
        }
    }
}

/// Storage paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Root folder; captures go to `{save_dir}/{YYYYMMDD}`
    pub save_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            save_dir: PathBuf::from("record"),
        }
    }
}

/// Upload endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL; uploads go to `{base_url}/api/meals`
    pub base_url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Upper bound on uploads in flight at once
    pub max_concurrent_uploads: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
            max_concurrent_uploads: 4,
        }
    }
}

impl ApiConfig {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Capture protocol configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Delay between `begin()` and the sensor snapshot
    pub settle_delay_ms: u64,
    /// Extension of the RGBD container files
    pub file_extension: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
            file_extension: "npz".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Settle delay as a `Duration`.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Depth camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// How long to wait for a frame before the camera counts as not ready
    pub frame_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_timeout_ms: 5000,
        }
    }
}

impl CameraConfig {
    /// Frame timeout as a `Duration`.
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

/// Load cell configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Raw counts per unit of weight; written back by calibration
    pub reference_unit: f64,
    /// Interval between published readings
    pub poll_interval_ms: u64,
    /// Device samples averaged into one reading
    pub samples_per_read: usize,
    /// Device samples averaged when taring
    pub tare_samples: usize,
    /// How long start-up waits for the load cell before running without it
    pub init_timeout_secs: u64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            reference_unit: 1.0,
            poll_interval_ms: 100,
            samples_per_read: 5,
            tare_samples: 50,
            init_timeout_secs: 20,
        }
    }
}

impl WeightConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Load cell start-up timeout as a `Duration`.
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

/// Calibration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Samples collected per sampling phase
    pub sample_count: usize,
    /// Cadence of calibration samples
    pub sample_interval_ms: u64,
    /// Fraction trimmed from each end before averaging
    pub trim_fraction: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sample_count: 60,
            sample_interval_ms: 100,
            trim_fraction: 0.1,
        }
    }
}

impl CalibrationConfig {
    /// Sample cadence as a `Duration`.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl KioskConfig {
    /// Load configuration from `config/config.toml` and environment variables
    ///
    /// Environment variables can override configuration with prefix `MEAL_KIOSK_`.
    /// Example: `MEAL_KIOSK_API__BASE_URL=https://meals.example.org`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::from(Serialized::defaults(KioskConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(KioskError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(KioskError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.api.base_url.trim().is_empty() {
            return Err(KioskError::Configuration("api.base_url is empty".into()));
        }
        if self.api.max_concurrent_uploads == 0 {
            return Err(KioskError::Configuration(
                "api.max_concurrent_uploads must be at least 1".into(),
            ));
        }

        if self.capture.file_extension.trim().is_empty() {
            return Err(KioskError::Configuration(
                "capture.file_extension is empty".into(),
            ));
        }

        if !(self.weight.reference_unit.is_finite() && self.weight.reference_unit > 0.0) {
            return Err(KioskError::Configuration(format!(
                "weight.reference_unit must be positive, got {}",
                self.weight.reference_unit
            )));
        }
        if self.weight.poll_interval_ms == 0 || self.weight.samples_per_read == 0 {
            return Err(KioskError::Configuration(
                "weight.poll_interval_ms and weight.samples_per_read must be non-zero".into(),
            ));
        }

        if self.calibration.sample_count == 0 || self.calibration.sample_interval_ms == 0 {
            return Err(KioskError::Configuration(
                "calibration.sample_count and calibration.sample_interval_ms must be non-zero"
                    .into(),
            ));
        }
        if !(0.0..0.5).contains(&self.calibration.trim_fraction) {
            return Err(KioskError::Configuration(format!(
                "calibration.trim_fraction {} must be in [0, 0.5)",
                self.calibration.trim_fraction
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = KioskConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.settle_delay(), Duration::from_millis(1000));
        assert_eq!(config.calibration.sample_count, 60);
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = KioskConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, KioskConfig::default());
    }

    #[test]
    fn test_partial_file_overrides_only_given_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[weight]\nreference_unit = 21.5\n\n[api]\nbase_url = \"http://kiosk.test\""
        )
        .unwrap();

        let config = KioskConfig::load_from(&path).unwrap();
        assert_eq!(config.weight.reference_unit, 21.5);
        assert_eq!(config.weight.poll_interval_ms, 100);
        assert_eq!(config.api.base_url, "http://kiosk.test");
        assert_eq!(config.api.max_concurrent_uploads, 4);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = KioskConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_reference_unit_rejected() {
        let mut config = KioskConfig::default();
        config.weight.reference_unit = 0.0;
        assert!(config.validate().is_err());
        config.weight.reference_unit = -3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_trim_fraction_bounds() {
        let mut config = KioskConfig::default();
        config.calibration.trim_fraction = 0.5;
        assert!(config.validate().is_err());
        config.calibration.trim_fraction = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_upload_concurrency_rejected() {
        let mut config = KioskConfig::default();
        config.api.max_concurrent_uploads = 0;
        assert!(config.validate().is_err());
    }
}
