//! Common error types for notesync.

use thiserror::Error;

/// Top-level error type for notesync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Remote host name could not be resolved.
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    /// Connection to the remote host could not be established.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Transport failure after a connection was made (reset, timeout, bad gateway).
    #[error("Network error: {0}")]
    Network(String),

    /// Credentials were rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Credentials were accepted but access was refused.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation was cancelled by a backend switch or shutdown.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Data was produced by an incompatible schema revision.
    #[error("Incompatible data: {0}")]
    Incompatible(String),
}

impl Error {
    /// Whether this error says something about reachability or credentials
    /// rather than about a single file.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::UnknownHost(_)
                | Error::Connect(_)
                | Error::Network(_)
                | Error::Authentication(_)
                | Error::PermissionDenied(_)
        )
    }

    /// Whether the credentials need to change before retrying makes sense.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Authentication(_) | Error::PermissionDenied(_))
    }

    /// Whether this is a "does not exist" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
