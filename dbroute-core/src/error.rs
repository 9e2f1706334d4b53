//! Structured error types for dbroute-core.
//!
//! Uses `thiserror` so library consumers can match on the phase that failed.
//! The CLI wraps these in `anyhow` for reporting.
//!
//! Database errors are carried verbatim: the variant only records whether the
//! failure happened while acquiring a pooled connection, while connecting to
//! the primary, or while running the query itself.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for dbroute-core operations
#[derive(Error, Debug)]
pub enum RouterError {
    /// The query failed to execute (syntax, constraint, lost connection, decode)
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// No connection could be taken from the shared read pool
    #[error("failed to acquire pooled connection: {0}")]
    Acquire(#[source] sqlx::Error),

    /// The dedicated primary connection could not be opened
    #[error("failed to connect to primary: {0}")]
    Connect(#[source] sqlx::Error),

    /// Every pooled connection is checked out and the pool rejects waiters
    #[error("connection pool exhausted ({max_connections} connections in use)")]
    PoolExhausted { max_connections: u32 },

    /// Configuration is missing a value or holds an invalid one
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Reading a config file failed
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A config file is not valid TOML for [`crate::DbConfig`]
    #[error("failed to parse {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Result type alias for dbroute-core operations
pub type Result<T> = std::result::Result<T, RouterError>;

impl RouterError {
    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create an I/O error tagged with the file it concerns
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a TOML parse error tagged with the file it concerns
    pub fn toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::Toml {
            path: path.into(),
            source,
        }
    }

    /// The underlying database error, if this failure came from the driver
    pub fn database_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Query(err) | Self::Acquire(err) | Self::Connect(err) => Some(err),
            _ => None,
        }
    }
}
