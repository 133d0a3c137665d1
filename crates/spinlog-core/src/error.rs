//! Core error types for spinlog-core.
//!
//! This module defines the error hierarchy using thiserror. Each subsystem
//! owns a focused enum; [`CoreError`] wraps them for callers that cross
//! subsystem boundaries (the orchestrator and the CLI).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Core error type for spinlog-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Input hardware errors
    #[error("Input error: {0}")]
    Input(#[from] InputError),
}

impl CoreError {
    /// True when the error came from a failed store write.
    ///
    /// The capture loop treats these as transient: the transition is dropped
    /// and the next wait proceeds with unchanged in-memory state.
    pub fn is_store_write_failure(&self) -> bool {
        matches!(
            self,
            CoreError::Database(
                DatabaseError::WriteFailed { .. } | DatabaseError::Locked
            )
        )
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A write (session open/close, pedal append) did not commit
    #[error("Store write failed during {operation}: {message}")]
    WriteFailed {
        operation: &'static str,
        message: String,
    },

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A session is already in progress
    #[error("Workout {0} is still in progress")]
    SessionAlreadyOpen(i64),

    /// Session id not present in the store
    #[error("Unknown workout {0}")]
    UnknownSession(i64),

    /// Session already has an end timestamp
    #[error("Workout {0} is already closed")]
    SessionAlreadyClosed(i64),

    /// A stored timestamp could not be parsed
    #[error("Invalid timestamp '{value}' in column {column}")]
    InvalidTimestamp { column: &'static str, value: String },
}

impl DatabaseError {
    /// Classify a rusqlite failure that happened while writing.
    pub(crate) fn write(operation: &'static str, err: rusqlite::Error) -> Self {
        match DatabaseError::from(err) {
            DatabaseError::QueryFailed(message) => DatabaseError::WriteFailed { operation, message },
            other => other,
        }
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Home/config directory could not be resolved
    #[error("Cannot determine configuration directory: {0}")]
    NoDataDir(String),
}

/// Input source errors.
#[derive(Error, Debug)]
pub enum InputError {
    /// GPIO could not be set up; raised at construction, never while polling
    #[error("Input hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// The requested logical channel has no latch registered
    #[error("Channel {0} is not configured on this input source")]
    UnknownChannel(String),

    /// `wait_for_any` was called with nothing to wait on
    #[error("No channels to wait on")]
    NoChannels,
}

/// Cadence derivation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CadenceError {
    /// Two consecutive pedal timestamps coincide (or run backwards)
    #[error("Degenerate pedal interval at {at} ({delta_secs}s)")]
    DegenerateInterval { at: DateTime<Utc>, delta_secs: f64 },
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseLocked
                    || code.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}
