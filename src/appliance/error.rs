//! Classified outcome of appliance calls.

use std::fmt;

use thiserror::Error;

use crate::ident::IdentError;

use super::transport::TransportError;

/// Closed taxonomy of appliance failures.
///
/// Success is expressed as `Ok(())` by [`super::classify`]; every failed call
/// yields exactly one of these kinds.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The addressed resource does not exist.
    NotFound,
    /// A resource with the requested name already exists.
    AlreadyExists,
    /// The resource is transiently locked or has dependents of unknown kind.
    Busy,
    /// The resource has clones depending on it.
    BusyHasClones,
    /// The volume has snapshots (children) depending on it.
    BusyHasSnapshots,
    /// The pool cannot hold the requested size.
    OutOfSpace,
    /// The appliance could not be reached or did not answer in time.
    Unreachable,
    /// The request could not be built or was rejected as malformed.
    RequestMalformed,
    /// The appliance answered with a payload that could not be decoded.
    ResponseMalformed,
    /// The appliance reported a failure this crate does not recognise.
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for the three busy variants.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Busy | Self::BusyHasClones | Self::BusyHasSnapshots
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotFound => "resource not found",
            Self::AlreadyExists => "resource already exists",
            Self::Busy => "resource is busy",
            Self::BusyHasClones => "resource has dependent clones",
            Self::BusyHasSnapshots => "volume has dependent snapshots",
            Self::OutOfSpace => "storage out of space",
            Self::Unreachable => "appliance unreachable",
            Self::RequestMalformed => "malformed request",
            Self::ResponseMalformed => "malformed response",
            Self::Unknown => "unknown appliance failure",
        };
        f.write_str(text)
    }
}

/// Failure of a single appliance call, classified into an [`ErrorKind`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{kind}: {message}")]
pub struct ResourceError {
    /// Classified kind.
    pub kind: ErrorKind,
    /// Human readable detail, surfaced to callers and logs.
    pub message: String,
}

impl ResourceError {
    /// Creates a new error of `kind`.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an [`ErrorKind::NotFound`] error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Shorthand for an [`ErrorKind::ResponseMalformed`] error.
    #[must_use]
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResponseMalformed, message)
    }

    /// Returns `true` when the error is of `kind`.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<TransportError> for ResourceError {
    fn from(value: TransportError) -> Self {
        let kind = match value {
            TransportError::InvalidRequest { .. } => ErrorKind::RequestMalformed,
            TransportError::Unreachable { .. }
            | TransportError::Timeout { .. }
            | TransportError::Body { .. }
            | TransportError::NoAddress => ErrorKind::Unreachable,
        };
        Self::new(kind, value.to_string())
    }
}

impl From<IdentError> for ResourceError {
    fn from(value: IdentError) -> Self {
        Self::new(ErrorKind::RequestMalformed, value.to_string())
    }
}
