mod config;
pub mod database;
pub mod migrations;

pub use config::{
    CadenceConfig, CaptureConfig, Config, DashboardConfig, GpioConfig, LogConfig, StoreConfig,
};
pub use database::Database;

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns `~/.config/spinlog[-dev]/` based on SPINLOG_ENV.
///
/// Set SPINLOG_ENV=dev to use a development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("SPINLOG_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("spinlog-dev")
    } else {
        base_dir.join("spinlog")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::NoDataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
