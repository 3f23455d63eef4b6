//! # SentinelKV Sync Client
//!
//! Purpose: Provide managed, pooled access to a replicated Redis-compatible
//! store whose writable node is discovered through a quorum of monitors.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections, bounded by `max_total`,
//!    with blocking acquires capped by `max_wait_millis`.
//! 2. **Scoped Leases**: Every acquire is paired with exactly one release or
//!    discard, enforced by `with_lease` and by `Lease`'s `Drop`.
//! 3. **Single Triage Point**: One classifier decides whether a failed
//!    connection is poisoned or reusable.
//! 4. **Closures over Subclasses**: Transactions and pipelines take caller
//!    closures that queue commands.
//!
//! ## Usage
//!
//! ```no_run
//! use skv_client::{Command, PoolConfig, StoreClient};
//!
//! let config = PoolConfig::new(["10.0.0.1:26379", "10.0.0.2:26379"], "mymaster");
//! let client = StoreClient::with_config(config)?;
//! client.set(b"stock", b"10")?;
//! let outcome = client.transaction(&["stock"], |tx| {
//!     tx.queue(Command::new("DECR").arg("stock"))
//! })?;
//! if outcome.is_none() {
//!     // A watched key changed; retrying is up to the caller.
//! }
//! # Ok::<(), skv_client::ClientError>(())
//! ```

mod classify;
mod client;
mod command;
mod config;
mod connection;
mod error;
mod lease;
mod pipeline;
mod pool;
mod resp;
mod sentinel;
mod stats;
mod transaction;

pub use classify::{classify, is_read_only, ErrorClass};
pub use client::{ClientTtl, StoreClient};
pub use command::Command;
pub use config::{PoolConfig, MONITOR_LIST_SEPARATOR};
pub use connection::{Connection, Connector, TcpConnection, TcpConnector};
pub use error::{ClientError, ClientResult};
pub use lease::Lease;
pub use pipeline::PipelineRunner;
pub use pool::ConnectionPool;
pub use resp::{encode_command, read_response, RespValue};
pub use sentinel::{query_monitor, resolve_master};
pub use stats::PoolStats;
pub use transaction::{TransactionOutcome, TransactionRunner, TxState};
