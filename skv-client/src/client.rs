//! # Store Client
//!
//! Purpose: Expose a compact, blocking API for issuing commands to the
//! writable master behind the monitors.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `StoreClient` hides pooling, discovery and protocol details.
//! 2. **One Helper**: Every command is a single `with_lease` call, so
//!    triage and cleanup live in one place.
//! 3. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.

use std::time::Duration;

use crate::command::Command;
use crate::config::PoolConfig;
use crate::connection::{Connector, TcpConnector};
use crate::error::{ClientError, ClientResult};
use crate::pipeline::PipelineRunner;
use crate::pool::ConnectionPool;
use crate::resp::RespValue;
use crate::transaction::{TransactionOutcome, TransactionRunner};

/// TTL state returned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Synchronous client over a discovered, pooled master connection.
///
/// Each call acquires a lease, performs one round trip, and settles the lease.
pub struct StoreClient<C: Connector = TcpConnector> {
    pool: ConnectionPool<C>,
}

impl StoreClient<TcpConnector> {
    /// Creates a client for `group` with default sizing.
    ///
    /// `monitors` is a `|`-separated list of monitor `host:port` endpoints.
    pub fn connect(monitors: &str, group: impl Into<String>) -> ClientResult<Self> {
        let config = PoolConfig::new(PoolConfig::parse_monitor_list(monitors), group);
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: PoolConfig) -> ClientResult<Self> {
        Ok(StoreClient {
            pool: ConnectionPool::new(config)?,
        })
    }
}

impl<C: Connector> StoreClient<C> {
    /// Wraps an existing pool.
    pub fn from_pool(pool: ConnectionPool<C>) -> Self {
        StoreClient { pool }
    }

    /// Underlying pool, for `acquire`/`release`/`discard` and statistics.
    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Raw round trip: sends `command` and returns the undecoded reply.
    pub fn execute(&self, command: &Command) -> ClientResult<RespValue> {
        self.pool.with_lease(|lease| lease.round_trip(command))
    }

    /// Runs a transaction; see [`ConnectionPool::transaction`].
    pub fn transaction<K, F>(&self, keys: &[K], body: F) -> ClientResult<TransactionOutcome>
    where
        K: AsRef<[u8]>,
        F: FnOnce(&mut TransactionRunner<'_, C>) -> ClientResult<()>,
    {
        self.pool.transaction(keys, body)
    }

    /// Runs a pipeline; see [`ConnectionPool::pipeline`].
    pub fn pipeline<F>(&self, body: F) -> ClientResult<Vec<RespValue>>
    where
        F: FnOnce(&mut PipelineRunner<'_, C>) -> ClientResult<()>,
    {
        self.pool.pipeline(body)
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.pool.with_lease(|lease| match lease.exec(&[b"GET", key])? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        })
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        self.pool.with_lease(|lease| match lease.exec(&[b"SET", key, value])? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        })
    }

    /// Sets a value and attaches an expiration in seconds.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let seconds = ttl.as_secs().to_string();
        self.pool.with_lease(|lease| {
            match lease.exec(&[b"SET", key, value, b"EX", seconds.as_bytes()])? {
                RespValue::Simple(_) => Ok(()),
                _ => Err(ClientError::UnexpectedResponse),
            }
        })
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        self.pool.with_lease(|lease| match lease.exec(&[b"DEL", key])? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ClientError::UnexpectedResponse),
        })
    }

    /// Returns true when the key exists.
    pub fn exists(&self, key: &[u8]) -> ClientResult<bool> {
        self.pool.with_lease(|lease| match lease.exec(&[b"EXISTS", key])? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ClientError::UnexpectedResponse),
        })
    }

    /// Increments an integer value and returns the new value.
    pub fn incr(&self, key: &[u8]) -> ClientResult<i64> {
        self.pool.with_lease(|lease| match lease.exec(&[b"INCR", key])? {
            RespValue::Integer(value) => Ok(value),
            _ => Err(ClientError::UnexpectedResponse),
        })
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl.as_secs().to_string();
        self.pool.with_lease(|lease| {
            match lease.exec(&[b"EXPIRE", key, seconds.as_bytes()])? {
                RespValue::Integer(value) => Ok(value == 1),
                _ => Err(ClientError::UnexpectedResponse),
            }
        })
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &[u8]) -> ClientResult<ClientTtl> {
        self.pool.with_lease(|lease| match lease.exec(&[b"TTL", key])? {
            RespValue::Integer(-2) => Ok(ClientTtl::Missing),
            RespValue::Integer(-1) => Ok(ClientTtl::NoExpiry),
            RespValue::Integer(value) if value >= 0 => {
                Ok(ClientTtl::ExpiresIn(Duration::from_secs(value as u64)))
            }
            _ => Err(ClientError::UnexpectedResponse),
        })
    }

    /// Pings the store. Returns the raw reply payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        self.pool.with_lease(|lease| {
            let reply = match payload {
                Some(data) => lease.exec(&[b"PING", data])?,
                None => lease.exec(&[b"PING"])?,
            };
            match reply {
                RespValue::Simple(text) => Ok(text),
                RespValue::Bulk(Some(data)) => Ok(data),
                _ => Err(ClientError::UnexpectedResponse),
            }
        })
    }

    /// Closes the pool; see [`ConnectionPool::close`].
    pub fn close(&self) {
        self.pool.close();
    }
}
