//! Error types shared across the hub core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Storage-layer fault, produced by repository implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection pool or I/O failure.
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    /// Constraint violation other than uniqueness.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Query failed for some other reason.
    #[error("Query failed: {0}")]
    Query(String),
}

/// Errors that can occur in the hub core.
#[derive(Debug, Error)]
pub enum Error {
    /// Integration is not implemented or registered.
    #[error("Integration error: {0}")]
    Integration(String),

    /// Integration exists but is disabled; recoverable by enabling.
    #[error("Integration disabled: {0}")]
    IntegrationDisabled(String),

    /// Missing or invalid integration configuration attribute.
    #[error("Integration attribute error: {0}")]
    IntegrationAttribute(String),

    /// Broader configuration failure at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or auth failure against a remote API.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transient failure of unspecified kind; always recoverable.
    #[error("Temporary error: {0}")]
    Temporary(String),

    /// Database-layer fault.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Uniqueness violation, e.g. duplicate integration key.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller gave us a malformed id or value.
    #[error("Bad input: {0}")]
    BadInput(String),

    /// Target does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Violated runtime invariant, e.g. a contended exclusion lock.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    pub fn integration(message: impl Into<String>) -> Self {
        Self::Integration(message.into())
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::IntegrationAttribute(message.into())
    }

    pub fn bad_input(message: impl Into<String>) -> Self {
        Self::BadInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// True when a retry without operator intervention can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::IntegrationDisabled(_) | Self::Connection(_) | Self::Temporary(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::BadInput(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_and_temporary_errors_are_recoverable() {
        assert!(Error::Connection("timeout".into()).is_recoverable());
        assert!(Error::Temporary("flaky".into()).is_recoverable());
        assert!(!Error::Conflict("dup".into()).is_recoverable());
        assert!(!Error::BadInput("nope".into()).is_recoverable());
    }
}
