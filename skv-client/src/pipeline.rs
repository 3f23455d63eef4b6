//! # Pipelines
//!
//! Purpose: Send a batch of commands in one write and read their replies in
//! order. The batch is not atomic: the store applies commands one by one.
//!
//! ## Notes
//! - Error replies for individual commands stay in the result list.
//! - A read-only reply fails the whole flush, since the connection points at
//!   a replica and must be dropped.
//! - A connection failure fails the whole flush; no partial results.

use tracing::debug;

use crate::classify::is_read_only;
use crate::command::Command;
use crate::connection::{Connection, Connector, TcpConnector};
use crate::error::{ClientError, ClientResult};
use crate::lease::Lease;
use crate::pool::ConnectionPool;
use crate::resp::RespValue;

/// Batch of commands bound to one lease.
pub struct PipelineRunner<'a, C: Connector = TcpConnector> {
    lease: &'a mut Lease<C>,
    queued: Vec<Command>,
}

impl<'a, C: Connector> PipelineRunner<'a, C> {
    /// Creates an empty pipeline on the lease.
    pub fn new(lease: &'a mut Lease<C>) -> Self {
        PipelineRunner {
            lease,
            queued: Vec::new(),
        }
    }

    /// Adds a command to the batch. Nothing is sent.
    pub fn queue(&mut self, command: Command) {
        self.queued.push(command);
    }

    /// Number of commands waiting for `flush`.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Returns true when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Sends the batch and returns one reply per command, in queue order.
    pub fn flush(&mut self) -> ClientResult<Vec<RespValue>> {
        if self.queued.is_empty() {
            return Ok(Vec::new());
        }
        let commands = std::mem::take(&mut self.queued);

        let exchanged = exchange(self.lease.connection(), &commands);
        let replies = self.lease.check(exchanged)?;

        debug!(commands = replies.len(), "pipeline flushed");
        Ok(replies)
    }
}

/// Writes every command in one flush, then reads one reply per command.
fn exchange<T: Connection>(conn: &mut T, commands: &[Command]) -> ClientResult<Vec<RespValue>> {
    for command in commands {
        conn.send(&command.as_args())?;
    }
    conn.flush()?;

    let mut replies = Vec::with_capacity(commands.len());
    for _ in 0..commands.len() {
        replies.push(conn.read_reply()?);
    }

    if let Some(message) = replies
        .iter()
        .filter_map(RespValue::error_message)
        .find(|message| is_read_only(message))
    {
        return Err(ClientError::Server { message });
    }
    Ok(replies)
}

impl<C: Connector> ConnectionPool<C> {
    /// Runs `body` to fill a pipeline, flushes it, and settles the lease
    /// through [`ConnectionPool::with_lease`].
    pub fn pipeline<F>(&self, body: F) -> ClientResult<Vec<RespValue>>
    where
        F: FnOnce(&mut PipelineRunner<'_, C>) -> ClientResult<()>,
    {
        self.with_lease(|lease| {
            let mut pipeline = PipelineRunner::new(lease);
            body(&mut pipeline)?;
            pipeline.flush()
        })
    }
}
