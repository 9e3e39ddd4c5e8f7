//! Unified error type for the engine.
//!
//! Errors are categorised, not stringly-typed, so that each layer can decide
//! how to react (retry, surface, log-and-drop, trigger logout) without
//! string matching. See `ErrorKind` for the IPC-safe projection used when
//! crossing into a host shell.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// General I/O failure (blob read/write, path resolution).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite failure from the workspace/account/app store.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// CRDT encode/decode/apply failure (corrupt update, schema walk failure).
    #[error("crdt error: {0}")]
    Crdt(String),

    /// JSON (de)serialization failure for node attributes / document content / mutation payloads.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse failure.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// TOML config serialize failure.
    #[error("config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Schema or invariant violation detected locally. Not retried; surfaced to the caller.
    #[error("validation error: {0}")]
    Validation(String),

    /// Authentication/authorization failure observed during sync or cleanup.
    #[error("auth error: {0}")]
    Auth(#[from] AuthErrorKind),

    /// Network failure expected to be transient. Callers should retry with backoff.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Server rejected an operation with an application-level error code.
    #[error("server error [{code}]: {message}")]
    ServerApplication {
        /// Closed-set error code from the server (see §6 of the spec: InvalidInput, Unauthorized, ...).
        code: String,
        /// Human-readable message from the server.
        message: String,
    },

    /// Post-write invariant violation (e.g. CRDT post-image failed to revalidate).
    /// Fatal for the enclosing transaction: abort, log, surface to the mediator.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Normal outcome of logout or teardown observed at a suspension point. Not logged as an error.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation not supported by the current configuration (e.g. feature disabled at compile time).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// No config directory could be determined for this platform.
    #[error("could not determine config directory")]
    NoConfigDir,

    /// Workspace/account/server not found locally.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid path passed to the path service.
    #[error("invalid path '{path}': {message}")]
    InvalidPath {
        /// Offending path.
        path: PathBuf,
        /// Why it is invalid.
        message: String,
    },
}

/// Sub-kinds of `EngineError::Auth`, mirroring the closed error-code set
/// the server returns (`TokenInvalid`, `Unauthorized`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthErrorKind {
    /// The session token is malformed or expired.
    #[error("token invalid")]
    TokenInvalid,
    /// The account is not permitted to perform the operation.
    #[error("unauthorized")]
    Unauthorized,
    /// The server has no record of this account.
    #[error("account not found")]
    AccountNotFound,
    /// The server has no record of this device.
    #[error("device not found")]
    DeviceNotFound,
}

impl AuthErrorKind {
    /// Whether this auth failure should trigger a local logout for the account.
    ///
    /// All four variants do when observed during sync (§7); only this is
    /// split out because cleanup-time handling differs (drop the staged
    /// token rather than logging the account out again).
    pub fn triggers_logout(self) -> bool {
        true
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// IPC/FFI-safe projection of `EngineError`, for crossing into a host shell.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorKind {
    /// Error category name.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Associated path, when applicable.
    pub path: Option<PathBuf>,
    /// Whether the caller should retry the operation.
    pub retryable: bool,
}

impl From<&EngineError> for ErrorKind {
    fn from(err: &EngineError) -> Self {
        let kind = match err {
            EngineError::Io(_) => "Io",
            EngineError::Database(_) => "Database",
            EngineError::Crdt(_) => "Crdt",
            EngineError::Json(_) => "Json",
            EngineError::ConfigParse(_) => "ConfigParse",
            EngineError::ConfigSerialize(_) => "ConfigSerialize",
            EngineError::Validation(_) => "Validation",
            EngineError::Auth(_) => "Auth",
            EngineError::TransientNetwork(_) => "TransientNetwork",
            EngineError::ServerApplication { .. } => "ServerApplication",
            EngineError::Integrity(_) => "Integrity",
            EngineError::Cancelled => "Cancelled",
            EngineError::Unsupported(_) => "Unsupported",
            EngineError::NoConfigDir => "NoConfigDir",
            EngineError::NotFound(_) => "NotFound",
            EngineError::InvalidPath { .. } => "InvalidPath",
        }
        .to_string();

        let path = match err {
            EngineError::InvalidPath { path, .. } => Some(path.clone()),
            _ => None,
        };

        let retryable = matches!(
            err,
            EngineError::TransientNetwork(_) | EngineError::Io(_)
        );

        Self {
            kind,
            message: err.to_string(),
            path,
            retryable,
        }
    }
}

impl From<EngineError> for ErrorKind {
    fn from(err: EngineError) -> Self {
        ErrorKind::from(&err)
    }
}

impl EngineError {
    /// Convert to a serializable representation for IPC.
    pub fn to_error_kind(&self) -> ErrorKind {
        ErrorKind::from(self)
    }

    /// `Cancelled` is a normal outcome, never a bug to log loudly.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_kind_always_triggers_logout() {
        assert!(AuthErrorKind::TokenInvalid.triggers_logout());
        assert!(AuthErrorKind::DeviceNotFound.triggers_logout());
    }

    #[test]
    fn transient_network_is_retryable() {
        let err = EngineError::TransientNetwork("timeout".into());
        assert!(err.to_error_kind().retryable);
    }

    #[test]
    fn validation_is_not_retryable() {
        let err = EngineError::Validation("bad schema".into());
        assert!(!err.to_error_kind().retryable);
    }

    #[test]
    fn cancelled_is_recognised() {
        assert!(EngineError::Cancelled.is_cancelled());
        assert!(!EngineError::Validation("x".into()).is_cancelled());
    }

    #[test]
    fn invalid_path_carries_path_in_error_kind() {
        let err = EngineError::InvalidPath {
            path: PathBuf::from("/tmp/x"),
            message: "missing parent".into(),
        };
        let kind = err.to_error_kind();
        assert_eq!(kind.path, Some(PathBuf::from("/tmp/x")));
    }
}
