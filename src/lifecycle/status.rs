//! Upstream status codes and the error type lifecycle operations return.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::appliance::{ErrorKind, ResourceError};
use crate::guard::GuardError;
use crate::ident::IdentError;
use crate::listing::TokenError;

/// Status codes understood by the orchestrator driving the plugin.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Code {
    /// The request itself is invalid.
    InvalidArgument,
    /// The named resource does not exist.
    NotFound,
    /// A conflicting resource already exists.
    AlreadyExists,
    /// The resource is not in a state that allows the operation.
    FailedPrecondition,
    /// A requested size lies outside what can be provided.
    OutOfRange,
    /// The appliance ran out of capacity.
    ResourceExhausted,
    /// The operation raced with another one and may be retried.
    Aborted,
    /// The appliance could not be reached.
    Unavailable,
    /// Anything the plugin cannot explain.
    Internal,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors returned by [`crate::LifecycleManager`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// Raised for malformed names, identifiers and arguments.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Raised when a required resource is missing.
    #[error("not found: {0}")]
    NotFound(String),
    /// Raised when a resource exists but does not match the request.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// Raised while dependents block the operation.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    /// Raised when a requested size cannot be honoured.
    #[error("out of range: {0}")]
    OutOfRange(String),
    /// Raised when the pool lacks space.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Raised when another operation holds the resource or a listing token
    /// is stale.
    #[error("aborted: {0}")]
    Aborted(String),
    /// Raised when the appliance is unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Raised for failures that cannot be attributed to the caller.
    #[error("internal: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Status code reported upstream.
    #[must_use]
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::NotFound(_) => Code::NotFound,
            Self::AlreadyExists(_) => Code::AlreadyExists,
            Self::FailedPrecondition(_) => Code::FailedPrecondition,
            Self::OutOfRange(_) => Code::OutOfRange,
            Self::ResourceExhausted(_) => Code::ResourceExhausted,
            Self::Aborted(_) => Code::Aborted,
            Self::Unavailable(_) => Code::Unavailable,
            Self::Internal(_) => Code::Internal,
        }
    }

    /// Detail message without the code prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(message)
            | Self::NotFound(message)
            | Self::AlreadyExists(message)
            | Self::FailedPrecondition(message)
            | Self::OutOfRange(message)
            | Self::ResourceExhausted(message)
            | Self::Aborted(message)
            | Self::Unavailable(message)
            | Self::Internal(message) => message,
        }
    }
}

impl From<ResourceError> for LifecycleError {
    fn from(err: ResourceError) -> Self {
        let ResourceError { kind, message } = err;
        match kind {
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::AlreadyExists => Self::AlreadyExists(message),
            ErrorKind::Busy | ErrorKind::BusyHasClones | ErrorKind::BusyHasSnapshots => {
                Self::FailedPrecondition(message)
            }
            ErrorKind::OutOfSpace => Self::ResourceExhausted(message),
            ErrorKind::Unreachable => Self::Unavailable(message),
            ErrorKind::RequestMalformed | ErrorKind::ResponseMalformed | ErrorKind::Unknown => {
                Self::Internal(format!("{kind}: {message}"))
            }
        }
    }
}

impl From<IdentError> for LifecycleError {
    fn from(err: IdentError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl From<GuardError> for LifecycleError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::Held { .. } => Self::Aborted(err.to_string()),
            GuardError::NotHeld { .. } => Self::FailedPrecondition(err.to_string()),
        }
    }
}

impl From<TokenError> for LifecycleError {
    fn from(err: TokenError) -> Self {
        Self::Aborted(err.to_string())
    }
}
