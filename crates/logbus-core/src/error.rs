//! Error types for the logbus pipeline
//!
//! Only start-up can fail loudly. Once the dispatcher runs, failures are
//! reported through [`crate::diagnostics::Diagnostics`] instead.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for logbus operations
#[derive(Error, Debug)]
pub enum LogBusError {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Stream name cannot be used as a routing key
    #[error("Invalid stream name: {0:?}")]
    InvalidStream(String),

    /// The log directory could not be created
    #[error("Failed to create log directory {path}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The relay socket could not be bound
    #[error("Failed to bind relay socket {path}: {source}")]
    RelayBind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A background thread could not be spawned
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A relay record could not be decoded
    #[error("Malformed relay record: {0}")]
    Wire(String),

    /// Unknown level name
    #[error("Unknown log level: {0}")]
    UnknownLevel(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using LogBusError
pub type LogBusResult<T> = Result<T, LogBusError>;
