//! Error taxonomy shared by the enforcement core and the command surface.
//!
//! `GuardError` crosses the IPC boundary serialized as
//! `{ "kind": "...", "message": "..." }` so callers can branch on the kind
//! (e.g. offer a re-install on `DaemonUnreachable`, re-prompt on
//! `ElevationRequired`).

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

pub type GuardResult<T> = std::result::Result<T, GuardError>;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Malformed domain or process identifier, bad schedule bounds.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("'{0}' is a built-in item and cannot be removed; whitelist it instead")]
    ImmutableDefault(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The daemon lost the privileges it needs to touch hosts/firewall state.
    #[error("permission denied during {operation}: {message}")]
    PermissionDenied { operation: String, message: String },

    /// A privileged operation needs the caller to re-run elevated.
    #[error("administrator privileges required to {0}")]
    ElevationRequired(String),

    /// Some rules of a batch failed; the whole batch was rolled back.
    #[error("failed to apply rule '{rule}' during {operation} (batch rolled back)")]
    PartialApply { operation: String, rule: String },

    #[error("cannot reach the enforcement daemon: {0}")]
    DaemonUnreachable(String),

    /// Policy store unreadable; the daemon is serving the safe default policy.
    #[error("policy store is corrupted ({0}); running in safe mode until it is reset")]
    StorageCorruption(String),

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("parent password has not been set up")]
    NotConfigured,

    #[error("parent password is already set up")]
    AlreadyConfigured,

    #[error("too many attempts, retry in {0} seconds")]
    RateLimited(u64),

    #[error("{0} timed out")]
    Timeout(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Serialization(String),

    #[error("{0}")]
    Platform(String),

    /// An error the daemon returned over IPC, kind preserved
    #[error("{}", .0.message)]
    Remote(WireError),
}

impl GuardError {
    pub fn kind(&self) -> &str {
        match self {
            GuardError::Validation(_) => "ValidationError",
            GuardError::ImmutableDefault(_) => "ImmutableDefaultError",
            GuardError::NotFound(_) => "NotFound",
            GuardError::PermissionDenied { .. } => "PermissionDenied",
            GuardError::ElevationRequired(_) => "ElevationRequiredError",
            GuardError::PartialApply { .. } => "PartialApplyError",
            GuardError::DaemonUnreachable(_) => "DaemonUnreachable",
            GuardError::StorageCorruption(_) => "StorageCorruption",
            GuardError::IncorrectPassword => "IncorrectPasswordError",
            GuardError::NotConfigured => "NotConfigured",
            GuardError::AlreadyConfigured => "AlreadyConfigured",
            GuardError::RateLimited(_) => "RateLimited",
            GuardError::Timeout(_) => "Timeout",
            GuardError::Io(_) => "Io",
            GuardError::Serialization(_) => "Serialization",
            GuardError::Platform(_) => "Platform",
            GuardError::Remote(wire) => &wire.kind,
        }
    }

    pub fn permission_denied(operation: impl Into<String>, message: impl Into<String>) -> Self {
        GuardError::PermissionDenied {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Map an I/O error from a privileged write, keeping `PermissionDenied` distinct.
    pub fn from_io(operation: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            GuardError::permission_denied(operation, err.to_string())
        } else {
            GuardError::Io(format!("{operation}: {err}"))
        }
    }

    /// Same as [`GuardError::from_io`] for failures wrapped in `anyhow` context.
    pub fn from_write_failure(operation: &str, err: anyhow::Error) -> Self {
        let denied = err
            .chain()
            .filter_map(|e| e.downcast_ref::<std::io::Error>())
            .any(|e| e.kind() == std::io::ErrorKind::PermissionDenied);
        if denied {
            GuardError::permission_denied(operation, format!("{err:#}"))
        } else {
            GuardError::Io(format!("{operation}: {err:#}"))
        }
    }

    pub fn into_wire(self) -> WireError {
        match self {
            GuardError::Remote(wire) => wire,
            other => WireError {
                kind: other.kind().to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl Serialize for GuardError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("GuardError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

/// Error as received on the client side of the IPC boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

impl From<std::io::Error> for GuardError {
    fn from(err: std::io::Error) -> Self {
        GuardError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for GuardError {
    fn from(err: anyhow::Error) -> Self {
        GuardError::Io(format!("{err:#}"))
    }
}
