//! # Transactions
//!
//! Purpose: Run an optimistic transaction (WATCH → MULTI → queued commands →
//! EXEC or DISCARD, then UNWATCH) on a single leased connection.
//!
//! ## Design Principles
//! 1. **Explicit State Machine**: `Idle → Watching → Queuing → Committed | Aborted`;
//!    each step checks the state it needs.
//! 2. **Local Queue**: Commands are buffered and sent together with EXEC, so a
//!    commit costs one round trip.
//! 3. **Caller Decides Retries**: A null EXEC reply (a watched key changed) is
//!    returned as `Ok(None)` and never retried here.
//! 4. **Strategy Pattern**: Business logic is a closure receiving the runner,
//!    not a subclass of a driver type.

use std::fmt;

use tracing::{debug, warn};

use crate::classify::is_read_only;
use crate::command::Command;
use crate::connection::{Connection, Connector, TcpConnector};
use crate::error::{ClientError, ClientResult};
use crate::lease::Lease;
use crate::pool::ConnectionPool;
use crate::resp::RespValue;

/// Results of a committed transaction, `None` when a watched key changed.
pub type TransactionOutcome = Option<Vec<RespValue>>;

/// Transaction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing sent yet.
    Idle,
    /// Keys are watched; MULTI not yet acknowledged.
    Watching,
    /// MULTI acknowledged; commands are being queued locally.
    Queuing,
    /// EXEC was answered.
    Committed,
    /// DISCARD was sent.
    Aborted,
}

impl TxState {
    fn as_str(self) -> &'static str {
        match self {
            TxState::Idle => "idle",
            TxState::Watching => "watching",
            TxState::Queuing => "queuing",
            TxState::Committed => "committed",
            TxState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction bound to one lease.
///
/// Dropping a runner that is still queuing, or that watched keys without
/// unwatching them, marks the lease broken so the connection is not reused.
pub struct TransactionRunner<'a, C: Connector = TcpConnector> {
    lease: &'a mut Lease<C>,
    watched_keys: Vec<Vec<u8>>,
    queued: Vec<Command>,
    state: TxState,
    unwatched: bool,
}

impl<'a, C: Connector> TransactionRunner<'a, C> {
    /// Creates an idle runner on the lease.
    pub fn new(lease: &'a mut Lease<C>) -> Self {
        TransactionRunner {
            lease,
            watched_keys: Vec::new(),
            queued: Vec::new(),
            state: TxState::Idle,
            unwatched: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Keys passed to `begin`.
    pub fn watched_keys(&self) -> &[Vec<u8>] {
        &self.watched_keys
    }

    /// Commands queued so far.
    pub fn queued(&self) -> &[Command] {
        &self.queued
    }

    /// Watches `keys` (none is fine) and opens the transaction with MULTI.
    pub fn begin<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> ClientResult<()> {
        self.expect_state(TxState::Idle, "begin")?;
        self.watched_keys = keys.iter().map(|key| key.as_ref().to_vec()).collect();

        if !self.watched_keys.is_empty() {
            let mut args: Vec<&[u8]> = Vec::with_capacity(self.watched_keys.len() + 1);
            args.push(b"WATCH");
            args.extend(self.watched_keys.iter().map(Vec::as_slice));
            exec_ok(self.lease, &args)?;
        }
        self.state = TxState::Watching;

        exec_ok(self.lease, &[b"MULTI"])?;
        self.state = TxState::Queuing;
        debug!(watched = self.watched_keys.len(), "transaction started");
        Ok(())
    }

    /// Queues a command. Nothing is sent until `commit`.
    pub fn queue(&mut self, command: Command) -> ClientResult<()> {
        self.expect_state(TxState::Queuing, "queue into")?;
        self.queued.push(command);
        Ok(())
    }

    /// Sends the queued commands with EXEC and returns one result per command,
    /// in queue order, or `None` when a watched key changed.
    ///
    /// Per-command failures inside a committed transaction stay in the result
    /// list as `RespValue::Error`. A command rejected while queuing aborts the
    /// transaction and is reported as the error.
    pub fn commit(&mut self) -> ClientResult<TransactionOutcome> {
        self.expect_state(TxState::Queuing, "commit")?;
        let expected = self.queued.len();

        let exchanged = send_with_exec(self.lease.connection(), &self.queued);
        let (rejected, reply) = self.lease.check(exchanged)?;
        self.state = TxState::Committed;
        self.queued.clear();

        let outcome = match reply {
            RespValue::Array(results) if rejected.is_none() && results.len() == expected => {
                debug!(results = results.len(), "transaction committed");
                Ok(Some(results))
            }
            RespValue::Nil if rejected.is_none() => {
                debug!("watched key changed, transaction not applied");
                Ok(None)
            }
            RespValue::Error(message) => Err(ClientError::Server {
                message: rejected
                    .unwrap_or_else(|| String::from_utf8_lossy(&message).into_owned()),
            }),
            _ => match rejected {
                Some(message) => Err(ClientError::Server { message }),
                None => Err(ClientError::UnexpectedResponse),
            },
        };
        self.lease.check(outcome)
    }

    /// Rolls back the queued commands with DISCARD.
    pub fn discard(&mut self) -> ClientResult<()> {
        self.expect_state(TxState::Queuing, "discard")?;
        self.state = TxState::Aborted;
        self.queued.clear();
        exec_ok(self.lease, &[b"DISCARD"])?;
        debug!("transaction discarded");
        Ok(())
    }

    /// Stops watching the keys passed to `begin`.
    ///
    /// Issued at most once, and only when keys were watched.
    pub fn unwatch(&mut self) -> ClientResult<()> {
        if self.watched_keys.is_empty() || self.unwatched {
            return Ok(());
        }
        self.unwatched = true;
        exec_ok(self.lease, &[b"UNWATCH"])
    }

    /// Gives business code access to the lease's connection state.
    pub fn lease_mut(&mut self) -> &mut Lease<C> {
        self.lease
    }

    fn expect_state(&self, expected: TxState, action: &'static str) -> ClientResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                action,
                state: self.state.as_str(),
            })
        }
    }

    fn is_settled(&self) -> bool {
        match self.state {
            TxState::Queuing => false,
            TxState::Idle | TxState::Watching => self.watched_keys.is_empty() || self.unwatched,
            TxState::Committed | TxState::Aborted => true,
        }
    }
}

impl<C: Connector> Drop for TransactionRunner<'_, C> {
    fn drop(&mut self) {
        if !self.is_settled() {
            warn!(state = %self.state, "transaction dropped before EXEC/DISCARD, connection will be discarded");
            self.lease.mark_broken();
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Runs `body` inside a transaction watching `keys`.
    ///
    /// `body` queues commands on the runner. On any failure while watching,
    /// queuing, or committing, an open transaction is discarded; when keys
    /// were watched UNWATCH is issued on every exit path. The lease is then
    /// settled through [`ConnectionPool::with_lease`].
    pub fn transaction<K, F>(&self, keys: &[K], body: F) -> ClientResult<TransactionOutcome>
    where
        K: AsRef<[u8]>,
        F: FnOnce(&mut TransactionRunner<'_, C>) -> ClientResult<()>,
    {
        self.with_lease(|lease| {
            let mut tx = TransactionRunner::new(lease);
            let outcome = tx
                .begin(keys)
                .and_then(|()| body(&mut tx))
                .and_then(|()| tx.commit());

            if outcome.is_err() && tx.state() == TxState::Queuing {
                if let Err(err) = tx.discard() {
                    warn!(error = %err, "failed to discard transaction");
                }
            }

            if let Err(err) = tx.unwatch() {
                warn!(error = %err, "failed to unwatch transaction keys");
            }

            outcome
        })
    }
}

/// Sends the queued commands followed by EXEC, collects the QUEUED
/// acknowledgements and returns the first queuing rejection with the EXEC reply.
fn send_with_exec<T: Connection>(
    conn: &mut T,
    queued: &[Command],
) -> ClientResult<(Option<String>, RespValue)> {
    for command in queued {
        conn.send(&command.as_args())?;
    }
    conn.send(&[b"EXEC"])?;
    conn.flush()?;

    let mut rejected: Option<String> = None;
    for _ in 0..queued.len() {
        match conn.read_reply()? {
            RespValue::Simple(status) if status == b"QUEUED" => {}
            RespValue::Error(message) => {
                let message = String::from_utf8_lossy(&message).into_owned();
                // Keep the first rejection, but let a read-only one win.
                if rejected.is_none() || is_read_only(&message) {
                    rejected = Some(message);
                }
            }
            _ => return Err(ClientError::UnexpectedResponse),
        }
    }

    let reply = conn.read_reply()?;
    Ok((rejected, reply))
}

fn exec_ok<C: Connector>(lease: &mut Lease<C>, args: &[&[u8]]) -> ClientResult<()> {
    let reply = lease.exec(args)?;
    lease.check(expect_ok(reply))
}

fn expect_ok(reply: RespValue) -> ClientResult<()> {
    match reply {
        RespValue::Simple(status) if status == b"OK" => Ok(()),
        _ => Err(ClientError::UnexpectedResponse),
    }
}
