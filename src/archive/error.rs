use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure class used to pick remediation text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Access-control rejection.
    Permission,
    /// Network or connectivity problem; usually worth retrying.
    Transport,
    Other,
}

impl FailureKind {
    /// 401/403 are permission failures; gateway and timeout statuses are transport.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => FailureKind::Permission,
            408 | 429 | 502 | 503 | 504 => FailureKind::Transport,
            _ => FailureKind::Other,
        }
    }

    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => FailureKind::Permission,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut => FailureKind::Transport,
            _ => FailureKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Permission => "permission",
            FailureKind::Transport => "transport",
            FailureKind::Other => "other",
        }
    }

    fn remediation(self) -> &'static str {
        match self {
            FailureKind::Permission => {
                "You are not allowed to publish this report. Ask an administrator to grant access."
            }
            FailureKind::Transport => {
                "The storage service could not be reached. Check the connection and try again."
            }
            FailureKind::Other => {
                "Saving the report failed. Try again, and contact support if it keeps happening."
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger, blob or document-version write (or read) failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed ({kind}): {message}")]
pub struct PersistenceError {
    pub kind: FailureKind,
    pub operation: &'static str,
    pub message: String,
}

impl PersistenceError {
    pub fn new(kind: FailureKind, operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            message: message.into(),
        }
    }

    pub fn permission(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permission, operation, message)
    }

    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, operation, message)
    }

    pub fn other(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, operation, message)
    }

    pub fn io(operation: &'static str, err: &io::Error) -> Self {
        Self::new(FailureKind::from_io(err), operation, err.to_string())
    }

    pub(crate) fn poisoned(operation: &'static str) -> Self {
        Self::other(operation, "poisoned lock")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcFailureKind {
    Permission,
    Transport,
    /// The procedure answered but reported a non-success result.
    Rejected,
    Other,
}

impl From<FailureKind> for RpcFailureKind {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Permission => RpcFailureKind::Permission,
            FailureKind::Transport => RpcFailureKind::Transport,
            FailureKind::Other => RpcFailureKind::Other,
        }
    }
}

/// The date-ranged archive procedure failed or refused the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("archive procedure failed ({kind:?}): {message}")]
pub struct ArchiveRpcError {
    pub kind: RpcFailureKind,
    pub message: String,
}

impl ArchiveRpcError {
    pub fn new(kind: RpcFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RpcFailureKind::Rejected, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(RpcFailureKind::Transport, message)
    }
}

/// Everything the archival coordinator can surface to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Rpc(#[from] ArchiveRpcError),
    #[error("invalid period {0:?}: expected YYYY-MM")]
    InvalidPeriod(String),
}

impl ArchiveError {
    /// Short user-facing hint specific to the failure class.
    pub fn remediation(&self) -> &'static str {
        match self {
            ArchiveError::Persistence(err) => err.kind.remediation(),
            ArchiveError::Rpc(err) => match err.kind {
                RpcFailureKind::Permission => FailureKind::Permission.remediation(),
                RpcFailureKind::Transport => {
                    "The archive service could not be reached. Retry the send with the same run id."
                }
                RpcFailureKind::Rejected => {
                    "The archive service rejected the request. The report is stored; retry the send with the same run id."
                }
                RpcFailureKind::Other => {
                    "Archiving failed. Retry the send with the same run id, and contact support if it keeps happening."
                }
            },
            ArchiveError::InvalidPeriod(_) => "Choose a reporting period in YYYY-MM format.",
        }
    }

    /// Whether retrying the same call can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        match self {
            ArchiveError::Persistence(err) => err.kind == FailureKind::Transport,
            ArchiveError::Rpc(err) => err.kind != RpcFailureKind::Permission,
            ArchiveError::InvalidPeriod(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(FailureKind::from_io(&denied), FailureKind::Permission);
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "down");
        assert_eq!(FailureKind::from_io(&refused), FailureKind::Transport);
        let other = io::Error::other("disk full");
        assert_eq!(FailureKind::from_io(&other), FailureKind::Other);
    }

    #[test]
    fn statuses_are_classified() {
        assert_eq!(FailureKind::from_status(403), FailureKind::Permission);
        assert_eq!(FailureKind::from_status(503), FailureKind::Transport);
        assert_eq!(FailureKind::from_status(500), FailureKind::Other);
    }

    #[test]
    fn remediation_differs_by_kind() {
        let permission: ArchiveError = PersistenceError::permission("save_ledger", "denied").into();
        let transport: ArchiveError = PersistenceError::transport("save_ledger", "refused").into();
        let other: ArchiveError = PersistenceError::other("save_ledger", "boom").into();
        assert_ne!(permission.remediation(), transport.remediation());
        assert_ne!(transport.remediation(), other.remediation());
        assert!(transport.is_retryable());
        assert!(!permission.is_retryable());
    }

    #[test]
    fn message_keeps_original_detail() {
        let err = PersistenceError::transport("blob_put", "connection reset by peer");
        assert_eq!(err.to_string(), "blob_put failed (transport): connection reset by peer");
    }
}
