//! Appliance configuration.
//!
//! Strongly-typed settings loaded with figment from a TOML file plus
//! `METERMON_`-prefixed environment variables. Parsing and semantic
//! validation are separate steps: [`Settings::load_from`] only shapes the
//! data, [`Settings::validate`] enforces the invariants the datalog and the
//! device bank rely on.

use crate::datalog::MAX_DEVICES;
use crate::error::MeterResult;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Datalog settings.
    #[serde(default)]
    pub datalog: DatalogConfig,
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metered device definitions, in slot order.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        ApplicationConfig {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Datalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatalogConfig {
    /// Path of the circular record file.
    #[serde(default = "default_datalog_path")]
    pub path: PathBuf,
    /// Seconds between consecutive records.
    #[serde(default = "default_interval")]
    pub interval_secs: u32,
    /// Days of history retained before the file wraps.
    #[serde(default = "default_retention")]
    pub retention_days: u32,
}

impl Default for DatalogConfig {
    fn default() -> Self {
        DatalogConfig {
            path: default_datalog_path(),
            interval_secs: default_interval(),
            retention_days: default_retention(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8080`.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Bound on the datalog lock wait for API reads, in milliseconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: default_listen(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

/// One metered device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Field-bus address.
    pub addr: u8,
    /// Display name; also the CSV column prefix.
    pub name: String,
    /// Voltage calibration factor.
    #[serde(default = "default_calibration")]
    pub calibration: f32,
    /// Whether the current transformer is mounted backwards.
    #[serde(default)]
    pub reversed: bool,
    /// Whether the device is polled and logged.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_name() -> String {
    "metermon".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_datalog_path() -> PathBuf {
    PathBuf::from("data/datalog.bin")
}

fn default_interval() -> u32 {
    5
}

fn default_retention() -> u32 {
    180
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_read_timeout() -> u64 {
    100
}

fn default_calibration() -> f32 {
    1.0
}

fn default_enabled() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            application: ApplicationConfig::default(),
            datalog: DatalogConfig::default(),
            server: ServerConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl Settings {
    /// Load configuration from the default path and the environment.
    pub fn load() -> MeterResult<Self> {
        Self::load_from("config/metermon.toml")
    }

    /// Load configuration from a specific file path, with `METERMON_`
    /// environment variables merged on top.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MeterResult<Self> {
        let settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("METERMON_").split("_"))
            .extract()?;
        Ok(settings)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let interval = self.datalog.interval_secs;
        if interval == 0 || interval > 60 {
            return Err(format!(
                "Invalid interval_secs {interval}. Must be 1-60 seconds"
            ));
        }
        // The tail cache covers one minute and timestamps must land on day
        // boundaries, so the interval has to divide both.
        if 60 % interval != 0 || 86_400 % interval != 0 {
            return Err(format!(
                "Invalid interval_secs {interval}. Must divide 60 evenly"
            ));
        }

        if self.datalog.retention_days == 0 {
            return Err("retention_days must be at least 1".to_string());
        }

        if self.devices.len() > MAX_DEVICES {
            return Err(format!(
                "Too many devices: {} configured, at most {} supported",
                self.devices.len(),
                MAX_DEVICES
            ));
        }
        let mut addrs = HashSet::new();
        let mut names = HashSet::new();
        for device in &self.devices {
            if !addrs.insert(device.addr) {
                return Err(format!("Duplicate device address: {}", device.addr));
            }
            if device.name.is_empty() {
                return Err(format!("Device {} has an empty name", device.addr));
            }
            if !names.insert(device.name.as_str()) {
                return Err(format!("Duplicate device name: {}", device.name));
            }
        }

        Ok(())
    }

    /// All enabled devices.
    pub fn enabled_devices(&self) -> Vec<&DeviceConfig> {
        self.devices.iter().filter(|dev| dev.enabled).collect()
    }
}
