//! Error types for drivesense.
//!
//! This module defines the error types shared by the ingest pipeline, the
//! persistence backends and the HTTP facade. Datagram decode failures are not
//! errors in this sense: they are ordinary [`crate::decoder::RejectReason`]
//! values that the listener logs and drops.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for drivesense operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the snapshot database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// Writing the snapshot to its backend failed.
    #[error("failed to persist snapshot to {backend}: {message}")]
    Persist {
        /// Description of the backend that failed.
        backend: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The snapshot store actor is no longer running.
    #[error("snapshot store is closed")]
    StoreClosed,

    /// The snapshot store's merge queue is full.
    #[error("snapshot store queue is full")]
    QueueFull,

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Network Errors ===
    /// Failed to bind a socket.
    #[error("failed to bind {kind} socket on {addr}: {source}")]
    Bind {
        /// Which endpoint was being bound (`udp` or `http`).
        kind: &'static str,
        /// The address that could not be bound.
        addr: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A patch submitted through the query facade was rejected.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },

    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for drivesense operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new invalid patch error.
    #[must_use]
    pub fn invalid_patch(message: impl Into<String>) -> Self {
        Self::InvalidPatch(message.into())
    }

    /// Create a persist error for the named backend.
    #[must_use]
    pub fn persist(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persist {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Check if this error came from a client-supplied patch.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidPatch(_))
    }
}
