//! # Failure Classification
//!
//! Decide, per error, whether the connection that produced it can go back to
//! the pool. The pool's scoped helper is the only caller that acts on the
//! answer; everything else just propagates errors.

use std::fmt;

use crate::error::ClientError;

/// Marker the store puts in front of writes rejected by a replica.
const READ_ONLY_MARKER: &str = "READONLY";

/// Outcome of classifying a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Network-level failure; the connection is poisoned.
    Transient,
    /// The node we talk to is no longer the writable master; poisoned.
    ReadOnlyRejection,
    /// Protocol-valid rejection; the connection is reusable.
    ApplicationError,
}

impl ErrorClass {
    /// Returns true when the connection must be discarded.
    pub fn is_poisoned(self) -> bool {
        !matches!(self, ErrorClass::ApplicationError)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Transient => "connection lost",
            ErrorClass::ReadOnlyRejection => "read-only replica",
            ErrorClass::ApplicationError => "application error",
        };
        f.write_str(label)
    }
}

/// Classifies an error raised while a lease was held.
///
/// Server replies are application errors unless they carry the read-only
/// marker. Errors that say nothing about the connection (pool, config and
/// transaction misuse) are application errors too. Everything else (IO,
/// framing, reply shape) leaves the stream in an unknown state and is
/// transient.
pub fn classify(err: &ClientError) -> ErrorClass {
    match err {
        ClientError::Server { message } if is_read_only(message) => ErrorClass::ReadOnlyRejection,
        ClientError::Server { .. } => ErrorClass::ApplicationError,
        ClientError::StoreUnavailable { class, .. } => *class,
        ClientError::Config(_)
        | ClientError::MasterNotFound { .. }
        | ClientError::PoolExhausted { .. }
        | ClientError::PoolClosed
        | ClientError::InvalidState { .. } => ErrorClass::ApplicationError,
        ClientError::Io(_)
        | ClientError::Protocol(_)
        | ClientError::UnexpectedResponse
        | ClientError::InvalidAddress(_) => ErrorClass::Transient,
    }
}

/// Returns true when a server error message reports a read-only replica.
pub fn is_read_only(message: &str) -> bool {
    message.contains(READ_ONLY_MARKER)
}
