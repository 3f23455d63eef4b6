//! # Leases
//!
//! Purpose: Tie one pooled connection to one caller for one logical
//! operation, and make sure it goes back (or away) exactly once.
//!
//! ## Design Principles
//! 1. **RAII**: `release`/`discard` consume the lease; a lease dropped without
//!    either settles itself, so capacity cannot leak.
//! 2. **Exclusive Access**: A lease is not `Clone` and only lends its
//!    connection through `&mut self`.
//! 3. **Single Triage Point**: `with_lease` is the one place that classifies a
//!    failed operation and picks release or discard.

use std::sync::Arc;
use std::thread;

use tracing::{debug, error};

use crate::classify::{classify, ErrorClass};
use crate::command::Command;
use crate::connection::{Connection, Connector, TcpConnector};
use crate::error::{ClientError, ClientResult};
use crate::pool::{ConnectionPool, PoolInner};
use crate::resp::RespValue;

/// Exclusively held connection, borrowed from a [`ConnectionPool`].
///
/// Callers using `acquire` directly own the triage: hand the lease back with
/// `ConnectionPool::release` after success or an application error, and with
/// `ConnectionPool::discard` after a connection failure. `with_lease` does this
/// for you.
pub struct Lease<C: Connector = TcpConnector> {
    pool: Arc<PoolInner<C>>,
    conn: Option<C::Conn>,
    broken: bool,
}

impl<C: Connector> Lease<C> {
    pub(crate) fn new(pool: Arc<PoolInner<C>>, conn: C::Conn) -> Self {
        Lease {
            pool,
            conn: Some(conn),
            broken: false,
        }
    }

    /// Performs one round trip. Error replies come back as `ClientError::Server`.
    ///
    /// A failure that leaves the connection unusable marks the lease broken.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let reply = self.connection().exec(args).and_then(RespValue::into_result);
        self.check(reply)
    }

    /// Performs one round trip for an owned command.
    pub fn round_trip(&mut self, command: &Command) -> ClientResult<RespValue> {
        self.exec(&command.as_args())
    }

    /// Raw access to the leased connection for batched writes.
    pub fn connection(&mut self) -> &mut C::Conn {
        self.conn
            .as_mut()
            .expect("lease holds its connection until settled")
    }

    /// Flags the connection as unusable; it will be discarded, never pooled.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Returns true once `mark_broken` was called.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Passes `result` through, marking the lease broken when its error
    /// poisons the connection.
    pub(crate) fn check<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(err) = &result {
            if classify(err).is_poisoned() {
                debug!(error = %err, "connection poisoned, lease marked broken");
                self.broken = true;
            }
        }
        result
    }

    /// Hands the connection back: pooled when `keep` and not broken, closed otherwise.
    pub(crate) fn settle(mut self, keep: bool) {
        if let Some(conn) = self.conn.take() {
            if keep && !self.broken {
                self.pool.return_connection(conn);
            } else {
                self.pool.discard_connection(conn);
            }
        }
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        // Unwinding mid-operation can leave unread replies on the stream.
        if self.broken || thread::panicking() {
            debug!("dropping unsettled lease, discarding connection");
            self.pool.discard_connection(conn);
        } else {
            debug!("dropping unsettled lease, returning connection");
            self.pool.return_connection(conn);
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Scoped acquisition: take a lease, run `op`, then settle the lease on
    /// every exit path.
    ///
    /// Errors from `op` go through [`classify`] once:
    /// - `Transient` / `ReadOnlyRejection`: the connection is discarded and the
    ///   error comes back as `StoreUnavailable` wrapping the underlying error.
    /// - `ApplicationError`: the connection is released and the error is
    ///   returned unchanged.
    ///
    /// On success the connection is released, or discarded if `op` marked the
    /// lease broken. A panic in `op` discards the connection.
    pub fn with_lease<T, F>(&self, op: F) -> ClientResult<T>
    where
        F: FnOnce(&mut Lease<C>) -> ClientResult<T>,
    {
        let mut lease = self.acquire()?;
        let outcome = op(&mut lease);
        finish(lease, outcome)
    }
}

fn finish<C: Connector, T>(lease: Lease<C>, outcome: ClientResult<T>) -> ClientResult<T> {
    let err = match outcome {
        Ok(value) => {
            lease.settle(true);
            return Ok(value);
        }
        Err(err) => err,
    };

    let class = classify(&err);
    match class {
        ErrorClass::ApplicationError => {
            lease.settle(true);
            Err(err)
        }
        ErrorClass::Transient | ErrorClass::ReadOnlyRejection => {
            if class == ErrorClass::ReadOnlyRejection {
                error!(error = %err, "store node is a read-only replica, discarding connection");
            } else {
                error!(error = %err, "store connection lost, discarding connection");
            }
            lease.settle(false);
            match err {
                wrapped @ ClientError::StoreUnavailable { .. } => Err(wrapped),
                other => Err(ClientError::StoreUnavailable {
                    class,
                    source: Box::new(other),
                }),
            }
        }
    }
}
