//! The stable error taxonomy crossing the API boundary.
//!
//! Every error a caller can observe carries a [`ErrorKind`] plus a free-text
//! message. The kind is stable; the message is not. Internal crate errors
//! convert into [`ApiError`] at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Stable classification of an API or command error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The request is syntactically or semantically malformed. Not retried.
    InvalidArgument,
    /// Read/write precondition: the entity does not exist.
    NotFound,
    /// Write precondition: the entity already exists.
    AlreadyExists,
    /// The local node cannot serve (not leader, consensus not ready).
    /// Retry against the leader hint or wait.
    Unavailable,
    /// Network error or runtime timeout. Retry with backoff.
    Transient,
    /// Store corruption or apply-time divergence. The node exits.
    Fatal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// An error as observed across the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    /// Address of the current leader, when known. Only meaningful with
    /// [`ErrorKind::Unavailable`].
    pub leader_hint: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            leader_hint: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn unavailable(message: impl Into<String>, leader_hint: Option<String>) -> Self {
        Self {
            kind: ErrorKind::Unavailable,
            message: message.into(),
            leader_hint,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }

    /// True if the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Unavailable | ErrorKind::Transient)
    }
}

/// Result alias for boundary-crossing operations.
pub type ApiResult<T> = Result<T, ApiError>;
