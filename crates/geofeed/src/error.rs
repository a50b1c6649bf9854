//! Error types for geofeed.
//!
//! This module defines all error types used throughout the geofeed crate.
//! Producer and removal failures each get their own variant so the caller
//! can report them separately instead of collapsing them into one message.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for geofeed operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
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

    // === Producer Errors ===
    /// The host offers no location capability at all.
    #[error("location capability unavailable: {message}")]
    CapabilityUnavailable {
        /// Description of the missing capability.
        message: String,
    },

    /// The user declined the location permission.
    #[error("location permission denied: {message}")]
    PermissionDenied {
        /// Description of the denial.
        message: String,
    },

    /// The host has a location capability but could not produce a fix.
    #[error("position unavailable: {message}")]
    PositionUnavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// Appending a record to the store failed.
    #[error("failed to write record to collection '{collection}': {message}")]
    StoreWrite {
        /// Collection the append targeted.
        collection: String,
        /// Description of what went wrong.
        message: String,
    },

    // === Live View Errors ===
    /// Removing a record from the store failed.
    #[error("failed to remove record '{id}': {message}")]
    StoreRemove {
        /// Identifier of the record.
        id: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Registering a subscription with the store failed.
    #[error("failed to subscribe to collection '{collection}': {message}")]
    Subscribe {
        /// Collection the subscription targeted.
        collection: String,
        /// Description of what went wrong.
        message: String,
    },

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

/// A specialized Result type for geofeed operations.
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

    /// Create a capability-unavailable error.
    #[must_use]
    pub fn capability_unavailable(message: impl Into<String>) -> Self {
        Self::CapabilityUnavailable {
            message: message.into(),
        }
    }

    /// Create a permission-denied error.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Create a store write error.
    #[must_use]
    pub fn store_write(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreWrite {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Create a store remove error.
    #[must_use]
    pub fn store_remove(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreRemove {
            id: id.into(),
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

    /// Re-label any failure from an append call as a store write failure.
    ///
    /// Failures that already carry a producer-level kind are left alone.
    #[must_use]
    pub fn into_store_write(self, collection: &str) -> Self {
        match self {
            Self::StoreWrite { .. } | Self::Timeout { .. } => self,
            other => Self::store_write(collection, other.to_string()),
        }
    }

    /// Re-label any failure from a remove call as a store remove failure.
    #[must_use]
    pub fn into_store_remove(self, id: &str) -> Self {
        match self {
            Self::StoreRemove { .. } => self,
            other => Self::store_remove(id, other.to_string()),
        }
    }

    /// Check if the host has no location capability.
    #[must_use]
    pub fn is_capability_unavailable(&self) -> bool {
        matches!(self, Self::CapabilityUnavailable { .. })
    }

    /// Check if this error is a permission denial.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }

    /// Check if this error is a failed append.
    #[must_use]
    pub fn is_store_write_failure(&self) -> bool {
        matches!(self, Self::StoreWrite { .. })
    }

    /// Check if this error is a failed removal.
    #[must_use]
    pub fn is_store_remove_failure(&self) -> bool {
        matches!(self, Self::StoreRemove { .. })
    }

    /// Check if this error is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
