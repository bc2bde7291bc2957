//! Engine status, status classification and structured results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use notesync_common::Error;

/// Connectivity status of an engine.
///
/// Ordered: anything below `Ready` means a probe is running and I/O waits;
/// `AuthError` and above stop the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineStatus {
    /// A connectivity probe is in flight.
    Testing,
    /// Configured but not yet probed.
    Ready,
    /// Last probe or call failed with a transient error.
    Error,
    /// Credentials were rejected; only reconfiguring helps.
    AuthError,
    /// Last probe succeeded.
    Ok,
}

impl EngineStatus {
    /// Whether I/O may be attempted in this state.
    pub fn is_settled(self) -> bool {
        self >= EngineStatus::Ready
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineStatus::Testing => "TESTING",
            EngineStatus::Ready => "READY",
            EngineStatus::Error => "ERROR",
            EngineStatus::AuthError => "AUTH_ERROR",
            EngineStatus::Ok => "OK",
        };
        f.write_str(name)
    }
}

/// Outcome classification shared by probes, passes and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    Ok,
    UnknownHost,
    ConnectError,
    AuthError,
    PathNotFound,
    OtherError,
}

impl StatusKind {
    /// Classify an error.
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::UnknownHost(_) => StatusKind::UnknownHost,
            Error::Connect(_) | Error::Network(_) => StatusKind::ConnectError,
            Error::Authentication(_) | Error::PermissionDenied(_) => StatusKind::AuthError,
            Error::NotFound(_) => StatusKind::PathNotFound,
            _ => StatusKind::OtherError,
        }
    }

    /// UNKNOWN_HOST, CONNECT_ERROR and AUTH_ERROR say something about the
    /// server as a whole rather than about one file.
    pub fn is_network(self) -> bool {
        matches!(
            self,
            StatusKind::UnknownHost | StatusKind::ConnectError | StatusKind::AuthError
        )
    }

    /// Engine status a probe with this outcome leads to.
    pub fn engine_status(self) -> EngineStatus {
        match self {
            StatusKind::Ok => EngineStatus::Ok,
            StatusKind::AuthError => EngineStatus::AuthError,
            _ => EngineStatus::Error,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusKind::Ok => "OK",
            StatusKind::UnknownHost => "UNKNOWN_HOST",
            StatusKind::ConnectError => "CONNECT_ERROR",
            StatusKind::AuthError => "AUTH_ERROR",
            StatusKind::PathNotFound => "PATH_NOT_FOUND",
            StatusKind::OtherError => "OTHER_ERROR",
        };
        f.write_str(name)
    }
}

/// Result of a connectivity probe.
#[derive(Debug, Clone)]
pub struct TestResult {
    pub status: StatusKind,
    pub message: Option<String>,
    pub error: Option<Arc<Error>>,
}

impl TestResult {
    pub fn ok() -> Self {
        Self {
            status: StatusKind::Ok,
            message: None,
            error: None,
        }
    }

    pub fn from_error(err: Error) -> Self {
        Self {
            status: StatusKind::from_error(&err),
            message: Some(err.to_string()),
            error: Some(Arc::new(err)),
        }
    }

    /// Classification of an error that is still owned elsewhere.
    pub fn describe(err: &Error) -> Self {
        Self {
            status: StatusKind::from_error(err),
            message: Some(err.to_string()),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusKind::Ok
    }

    /// Owned error equivalent to this result, for `?` in callers.
    pub fn to_error(&self) -> Error {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| self.status.to_string());
        match self.status {
            StatusKind::UnknownHost => Error::UnknownHost(message),
            StatusKind::ConnectError => Error::Connect(message),
            StatusKind::AuthError => Error::Authentication(message),
            StatusKind::PathNotFound => Error::NotFound(message),
            StatusKind::Ok | StatusKind::OtherError => Error::Storage(message),
        }
    }
}

/// Published view of an engine, observed through a watch channel.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub status: EngineStatus,
    /// Bumped on every reconfiguration.
    pub generation: u64,
    /// Outcome of the most recent probe in this generation.
    pub last_test: Option<TestResult>,
    /// Name of the active backend.
    pub backend: String,
}

impl EngineSnapshot {
    pub(crate) fn new(backend: impl Into<String>, generation: u64) -> Self {
        Self {
            status: EngineStatus::Ready,
            generation,
            last_test: None,
            backend: backend.into(),
        }
    }
}
