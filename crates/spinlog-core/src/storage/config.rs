//! TOML-based application configuration.
//!
//! Covers:
//! - GPIO pin assignment and debounce
//! - Capture loop polling and session user label
//! - Pedaling timeout used by cadence derivation
//! - Dashboard refresh interval
//! - Database location
//! - Log level and destinations
//!
//! Configuration is stored at `~/.config/spinlog/config.toml` unless a path
//! is given explicitly. It is validated on every load and before every save,
//! so a bad value fails before any hardware is touched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;

/// GPIO pin assignment (BCM numbering).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GpioConfig {
    #[serde(default = "default_pedal_pin")]
    pub pedal_sensor_pin: u8,
    #[serde(default = "default_start_stop_pin")]
    pub start_stop_pin: u8,
    #[serde(default = "default_indicator_pin")]
    pub indicator_pin: u8,
    /// Edges closer than this to the previous accepted edge are ignored.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// Capture loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Sleep between latch polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,
    /// User label written on new sessions.
    #[serde(default = "default_user")]
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CadenceConfig {
    /// A gap between strokes at least this long is a rest period.
    #[serde(default = "default_pedaling_timeout")]
    pub pedaling_timeout_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// SQLite file. Defaults to `spinlog.db` in the data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Append log lines to this file.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Log to stderr.
    #[serde(default = "default_true")]
    pub console: bool,
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub cadence: CadenceConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// Default functions
fn default_pedal_pin() -> u8 {
    17
}
fn default_start_stop_pin() -> u8 {
    27
}
fn default_indicator_pin() -> u8 {
    22
}
fn default_debounce_ms() -> u64 {
    200
}
fn default_poll_interval() -> f64 {
    0.1
}
fn default_user() -> String {
    "default".into()
}
fn default_pedaling_timeout() -> f64 {
    5.0
}
fn default_refresh_interval() -> f64 {
    1.0
}
fn default_log_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            pedal_sensor_pin: default_pedal_pin(),
            start_stop_pin: default_start_stop_pin(),
            indicator_pin: default_indicator_pin(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            user: default_user(),
        }
    }
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            pedaling_timeout_secs: default_pedaling_timeout(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            console: true,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Keys that unset to `None` when given an empty value.
const OPTIONAL_KEYS: [&str; 2] = ["store.path", "log.file"];

fn positive_secs(key: &str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("must be a positive number of seconds, got {value}"),
        });
    }
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::InvalidValue {
        key: key.into(),
        message: e.to_string(),
    })
}

impl Config {
    /// Default config file location.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load and validate `path`. A missing file is replaced by defaults
    /// written to that path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any
    /// value fails validation.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content)
                    .map_err(|e| ConfigError::ParseFailed(format!("{}: {e}", path.display())))?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Validate, then persist to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| save_failed(e.to_string()))?;
        }
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Check every field. Called on load and save.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pins = [
            ("gpio.pedal_sensor_pin", self.gpio.pedal_sensor_pin),
            ("gpio.start_stop_pin", self.gpio.start_stop_pin),
            ("gpio.indicator_pin", self.gpio.indicator_pin),
        ];
        for (i, (key, pin)) in pins.iter().enumerate() {
            if let Some((other, _)) = pins[..i].iter().find(|(_, p)| p == pin) {
                return Err(ConfigError::InvalidValue {
                    key: (*key).into(),
                    message: format!("pin {pin} is already used by {other}"),
                });
            }
        }
        positive_secs("capture.poll_interval_secs", self.capture.poll_interval_secs)?;
        positive_secs("cadence.pedaling_timeout_secs", self.cadence.pedaling_timeout_secs)?;
        positive_secs(
            "dashboard.refresh_interval_secs",
            self.dashboard.refresh_interval_secs,
        )?;
        if self.capture.user.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "capture.user".into(),
                message: "must not be empty".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.log.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "log.level".into(),
                message: format!("expected one of {}", LOG_LEVELS.join(", ")),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.capture.poll_interval_secs).unwrap_or_default()
    }

    pub fn pedaling_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.cadence.pedaling_timeout_secs).unwrap_or_default()
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.dashboard.refresh_interval_secs).unwrap_or_default()
    }

    /// Database file, falling back to the data directory.
    pub fn store_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join("spinlog.db")),
        }
    }

    fn lookup<'a>(root: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
        key.split('.').try_fold(root, |node, part| node.get(part))
    }

    /// Get a config value as a string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        match Self::lookup(&json, key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => Some(String::new()),
            other => Some(other.to_string()),
        }
    }

    /// Set a value by dot-separated key and re-validate. Does not save.
    ///
    /// The new value is parsed according to the type of the current one;
    /// optional paths accept an empty string to unset them.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.into(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;

        let (parent_key, leaf) = key
            .rsplit_once('.')
            .ok_or_else(|| ConfigError::UnknownKey(key.into()))?;
        let section = key_section(&mut json, parent_key)
            .ok_or_else(|| ConfigError::UnknownKey(key.into()))?;
        let existing = section
            .get(leaf)
            .ok_or_else(|| ConfigError::UnknownKey(key.into()))?;

        let new_value = match existing {
            _ if value.is_empty() && OPTIONAL_KEYS.contains(&key) => serde_json::Value::Null,
            serde_json::Value::Bool(_) => serde_json::Value::Bool(
                value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
            ),
            serde_json::Value::Number(n) if n.is_f64() => value
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?,
            serde_json::Value::Number(_) => serde_json::Value::Number(
                value
                    .parse::<u64>()
                    .map_err(|_| invalid(format!("cannot parse '{value}' as integer")))?
                    .into(),
            ),
            serde_json::Value::String(_) | serde_json::Value::Null => {
                serde_json::Value::String(value.into())
            }
            _ => return Err(ConfigError::UnknownKey(key.into())),
        };
        section.insert(leaf.to_string(), new_value);

        let updated: Config = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn key_section<'a>(
    root: &'a mut serde_json::Value,
    key: &str,
) -> Option<&'a mut serde_json::Map<String, serde_json::Value>> {
    key.split('.')
        .try_fold(root, |node, part| node.get_mut(part))?
        .as_object_mut()
}
