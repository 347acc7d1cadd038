//! Error types for the Argus monitoring engine.
//!
//! One structured error enum covers the whole crate. Variants carry enough
//! context (operation, resource, human message) that the HTTP layer can map
//! them to responses without string matching, and the scheduler can decide
//! what is transient versus fatal.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ArgusResult<T> = Result<T, ArgusError>;

/// Error type for all Argus operations.
#[derive(Error, Debug)]
pub enum ArgusError {
    /// Configuration is missing, unreadable, or invalid. Fatal at startup.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A network conversation with a database node or cluster failed.
    /// Transient: the node is marked off and aggregation continues.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// An info request did not complete within its per-call timeout.
    #[error("operation '{operation}' timed out")]
    Timeout { operation: String },

    /// Caller input was rejected before any state changed.
    #[error("{message}")]
    Validation { message: String },

    /// A cluster, node, session, or record was not found.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// One or more nodes of a cluster failed during a fan-out; the caller
    /// received partial results alongside this error.
    #[error("partial cluster error: {message}")]
    Partial { message: String },

    /// A version-gated operation found nodes below the required build.
    #[error("{message}")]
    UnsupportedVersion { message: String },

    /// The connected driver does not implement the requested operation.
    #[error("operation not supported by this driver: {operation}")]
    NotSupported { operation: String },

    /// Mail delivery failed after retries.
    #[error("mail delivery failed: {message}")]
    Mail { message: String },

    /// Filesystem or socket I/O failure with the failing operation named.
    #[error("i/o error during {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization failure, e.g. the backup ledger on disk.
    #[error("serialization error during {operation}")]
    Serialization {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    /// Invariant violation inside the engine. Logged and surfaced, never
    /// propagated as a panic.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl ArgusError {
    /// Shorthand for a [`ArgusError::Validation`] with a formatted message.
    pub fn validation(message: impl Into<String>) -> Self {
        ArgusError::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a [`ArgusError::Connection`] with a formatted message.
    pub fn connection(message: impl Into<String>) -> Self {
        ArgusError::Connection {
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the operation that hit it.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        ArgusError::Io {
            operation: operation.into(),
            source,
        }
    }

    /// True for errors that indicate a transient node/cluster condition
    /// rather than a caller mistake.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ArgusError::Connection { .. } | ArgusError::Timeout { .. } | ArgusError::Partial { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ArgusError::connection("refused").is_transient());
        assert!(ArgusError::Timeout {
            operation: "info".into()
        }
        .is_transient());
        assert!(!ArgusError::validation("bad input").is_transient());
    }

    #[test]
    fn validation_message_is_bare() {
        let err = ArgusError::validation("Node already exists");
        assert_eq!(err.to_string(), "Node already exists");
    }
}
