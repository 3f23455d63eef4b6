//! Error types for the pooled store client.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::classify::ErrorClass;

/// Result type for the store client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the pool, the runners and the facade.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The pool configuration is unusable (raised at construction).
    #[error("configuration error: {0}")]
    Config(String),

    /// No monitor majority could name a writable master for the group.
    #[error("no writable master for group '{group}': {reason}")]
    MasterNotFound { group: String, reason: String },

    /// No connection became available within `max_wait_millis`.
    #[error("connection pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// The connection failed or reached a read-only replica; it was discarded.
    #[error("store unavailable ({class}): {source}")]
    StoreUnavailable {
        class: ErrorClass,
        #[source]
        source: Box<ClientError>,
    },

    /// The store rejected the command; the connection stays usable.
    #[error("server error: {message}")]
    Server { message: String },

    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// RESP2 framing or parse error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Reply type did not match the expected command reply.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A transaction step was called out of order.
    #[error("cannot {action} a transaction that is {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },
}

impl ClientError {
    /// Returns the class recorded on a `StoreUnavailable` error.
    pub fn unavailable_class(&self) -> Option<ErrorClass> {
        match self {
            ClientError::StoreUnavailable { class, .. } => Some(*class),
            _ => None,
        }
    }
}
