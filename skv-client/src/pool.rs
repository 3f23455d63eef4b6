//! # Connection Pool
//!
//! Purpose: Hand out exclusive leases on connections to the writable master,
//! bounded by `max_total`, reusing idle connections to avoid handshakes.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: One mutex guards the bookkeeping; connects and
//!    closes happen outside it.
//! 3. **Bounded Waits**: An exhausted pool parks callers on a condition
//!    variable for at most `max_wait_millis`, then fails.
//! 4. **Resolve Once**: The master address is resolved at construction and
//!    trusted until a connection reports otherwise.
//!
//! ## Structure Overview
//!
//! ```text
//! ConnectionPool (cloneable handle)
//!   └── inner: Arc<PoolInner>
//!         ├── state: Mutex<PoolState>
//!         │     ├── idle: VecDeque<IdleConnection>   (front = most recently used)
//!         │     └── total / active / closed
//!         ├── available: Condvar                    (waiters in acquire)
//!         ├── counters: PoolCounters
//!         └── sweeper: Mutex<Option<EvictionSweeper>>
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::config::PoolConfig;
use crate::connection::{Connector, TcpConnector};
use crate::error::{ClientError, ClientResult};
use crate::lease::Lease;
use crate::sentinel;
use crate::stats::{PoolCounters, PoolStats};

/// Sweep period used when the configured interval is zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

struct IdleConnection<T> {
    conn: T,
    idle_since: Instant,
}

struct PoolState<T> {
    idle: VecDeque<IdleConnection<T>>,
    // Slots taken: idle + leased + being opened.
    total: usize,
    active: usize,
    closed: bool,
}

pub(crate) struct PoolInner<C: Connector> {
    config: PoolConfig,
    connector: C,
    master_addr: String,
    state: Mutex<PoolState<C::Conn>>,
    available: Condvar,
    counters: PoolCounters,
    sweeper: Mutex<Option<EvictionSweeper>>,
}

/// Connection pool handle. Clones share the same pool.
pub struct ConnectionPool<C: Connector = TcpConnector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConnectionPool<TcpConnector> {
    /// Builds a TCP pool: validates the config, resolves the master through
    /// the monitors, and starts the eviction sweep when enabled.
    pub fn new(config: PoolConfig) -> ClientResult<Self> {
        Self::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Builds a pool on top of a custom connector.
    pub fn with_connector(config: PoolConfig, connector: C) -> ClientResult<Self> {
        config.validate()?;
        let master_addr = sentinel::resolve_master(
            &connector,
            &config.monitor_endpoints,
            &config.master_group_name,
            config.connect_timeout(),
        )?;
        info!(
            group = %config.master_group_name,
            master = %master_addr,
            max_total = config.max_total,
            "connection pool ready"
        );

        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
            active: 0,
            closed: false,
        };
        let sweep_interval = config.eviction_interval();
        let inner = Arc::new(PoolInner {
            config,
            connector,
            master_addr,
            state: Mutex::new(state),
            available: Condvar::new(),
            counters: PoolCounters::default(),
            sweeper: Mutex::new(None),
        });

        if let Some(interval) = sweep_interval {
            let sweeper = EvictionSweeper::start(Arc::downgrade(&inner), interval)?;
            *inner.sweeper.lock() = Some(sweeper);
        }

        Ok(ConnectionPool { inner })
    }

    /// Acquires an exclusive lease, blocking up to `max_wait_millis`.
    pub fn acquire(&self) -> ClientResult<Lease<C>> {
        let max_wait = self.inner.config.max_wait();
        let started = Instant::now();
        let deadline = started + max_wait;
        let mut waited = false;

        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(ClientError::PoolClosed);
            }

            if let Some(entry) = state.idle.pop_front() {
                state.active += 1;
                drop(state);
                self.inner.counters.record_acquired();
                return Ok(Lease::new(Arc::clone(&self.inner), entry.conn));
            }

            if state.total < self.inner.config.max_total {
                state.total += 1;
                state.active += 1;
                drop(state);
                return self.open_lease();
            }

            if Instant::now() >= deadline {
                drop(state);
                self.inner.counters.record_timeout();
                warn!(waited = ?started.elapsed(), "connection pool exhausted");
                return Err(ClientError::PoolExhausted {
                    waited: started.elapsed(),
                });
            }

            if !waited {
                waited = true;
                self.inner.counters.record_wait();
            }
            // Spurious or early wakeups just loop and re-check.
            let _ = self.inner.available.wait_until(&mut state, deadline);
        }
    }

    /// Returns the lease's connection to the idle set and wakes one waiter.
    ///
    /// A lease marked broken is discarded instead.
    pub fn release(&self, lease: Lease<C>) {
        lease.settle(true);
    }

    /// Closes the leased connection, frees its slot and wakes one waiter.
    pub fn discard(&self, lease: Lease<C>) {
        lease.settle(false);
    }

    /// Runs one eviction pass and returns how many idle connections were removed.
    ///
    /// Removes idle connections older than `min_evictable_idle_millis`, then
    /// opens connections until `min_idle` are idle (within `max_total`). The
    /// background sweeper calls this; with the sweep disabled nothing does.
    pub fn evict(&self) -> usize {
        let evicted = self.inner.evict_expired(Instant::now());
        self.inner.ensure_min_idle();
        evicted
    }

    /// Closes idle connections, stops the sweeper, and rejects further acquires.
    ///
    /// Leases still out are closed when they come back.
    pub fn close(&self) {
        let idle: Vec<C::Conn> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<C::Conn> = state.idle.drain(..).map(|entry| entry.conn).collect();
            state.total = state.total.saturating_sub(idle.len());
            idle
        };
        let closed = idle.len();
        drop(idle);
        self.inner.available.notify_all();

        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop();
        }
        info!(closed_idle = closed, "connection pool closed");
    }

    /// Address of the writable master resolved at construction.
    pub fn master_addr(&self) -> &str {
        &self.inner.master_addr
    }

    /// Configuration the pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Snapshot of gauges and counters.
    pub fn stats(&self) -> PoolStats {
        let (idle, active, total) = {
            let state = self.inner.state.lock();
            (state.idle.len(), state.active, state.total)
        };
        self.inner.counters.snapshot(idle, active, total)
    }

    fn open_lease(&self) -> ClientResult<Lease<C>> {
        match self.inner.open() {
            Ok(conn) => {
                self.inner.counters.record_acquired();
                Ok(Lease::new(Arc::clone(&self.inner), conn))
            }
            Err(err) => {
                {
                    let mut state = self.inner.state.lock();
                    state.total = state.total.saturating_sub(1);
                    state.active = state.active.saturating_sub(1);
                }
                self.inner.available.notify_one();
                Err(ClientError::StoreUnavailable {
                    class: classify(&err),
                    source: Box::new(err),
                })
            }
        }
    }
}

impl<C: Connector> PoolInner<C> {
    fn open(&self) -> ClientResult<C::Conn> {
        match self
            .connector
            .connect(&self.master_addr, self.config.connect_timeout())
        {
            Ok(conn) => {
                self.counters.record_created();
                debug!(master = %self.master_addr, "opened store connection");
                Ok(conn)
            }
            Err(err) => {
                warn!(master = %self.master_addr, error = %err, "failed to open store connection");
                Err(err)
            }
        }
    }

    pub(crate) fn return_connection(&self, conn: C::Conn) {
        self.counters.record_released();
        let overflow = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            if !state.closed && state.idle.len() < self.config.max_idle {
                state.idle.push_front(IdleConnection {
                    conn,
                    idle_since: Instant::now(),
                });
                None
            } else {
                state.total = state.total.saturating_sub(1);
                Some(conn)
            }
        };
        if overflow.is_some() {
            debug!("idle set full or pool closed, closing released connection");
        }
        drop(overflow);
        self.available.notify_one();
    }

    pub(crate) fn discard_connection(&self, conn: C::Conn) {
        self.counters.record_discarded();
        {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            state.total = state.total.saturating_sub(1);
        }
        drop(conn);
        debug!("discarded store connection");
        self.available.notify_one();
    }

    fn evict_expired(&self, now: Instant) -> usize {
        let Some(threshold) = self.config.min_evictable_idle() else {
            return 0;
        };
        let expired: Vec<C::Conn> = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let mut kept = VecDeque::with_capacity(state.idle.len());
            let mut expired = Vec::new();
            while let Some(entry) = state.idle.pop_front() {
                if now.saturating_duration_since(entry.idle_since) > threshold {
                    expired.push(entry.conn);
                } else {
                    kept.push_back(entry);
                }
            }
            state.idle = kept;
            state.total = state.total.saturating_sub(expired.len());
            expired
        };

        let count = expired.len();
        drop(expired);
        if count > 0 {
            self.counters.record_evicted(count);
            debug!(evicted = count, "evicted idle connections");
            self.available.notify_all();
        }
        count
    }

    fn ensure_min_idle(&self) {
        loop {
            {
                let mut state = self.state.lock();
                if state.closed
                    || state.idle.len() >= self.config.min_idle
                    || state.total >= self.config.max_total
                {
                    return;
                }
                state.total += 1;
            }

            match self.open() {
                Ok(conn) => {
                    let leftover = {
                        let mut state = self.state.lock();
                        if state.closed {
                            state.total = state.total.saturating_sub(1);
                            Some(conn)
                        } else {
                            state.idle.push_front(IdleConnection {
                                conn,
                                idle_since: Instant::now(),
                            });
                            None
                        }
                    };
                    drop(leftover);
                    self.available.notify_one();
                }
                Err(_) => {
                    let mut state = self.state.lock();
                    state.total = state.total.saturating_sub(1);
                    return;
                }
            }
        }
    }
}

impl<C: Connector> Drop for PoolInner<C> {
    fn drop(&mut self) {
        // The last handle may be the sweeper's own upgrade, so only signal here.
        if let Some(sweeper) = self.sweeper.get_mut().as_ref() {
            sweeper.signal_stop();
        }
    }
}

type StopSignal = Arc<(Mutex<bool>, Condvar)>;

/// Background thread running `evict` every interval.
///
/// Holds only a weak reference, so it never keeps the pool alive.
struct EvictionSweeper {
    stop: StopSignal,
    join: Option<JoinHandle<()>>,
}

impl EvictionSweeper {
    fn start<C: Connector>(pool: Weak<PoolInner<C>>, interval: Duration) -> ClientResult<Self> {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let stop: StopSignal = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_thread = Arc::clone(&stop);

        let join = thread::Builder::new()
            .name("skv-evictor".to_string())
            .spawn(move || loop {
                {
                    let (flag, signal) = &*stop_thread;
                    let mut stopped = flag.lock();
                    if !*stopped {
                        let _ = signal.wait_for(&mut stopped, interval);
                    }
                    if *stopped {
                        break;
                    }
                }
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                ConnectionPool { inner }.evict();
            })?;

        debug!(?interval, "eviction sweeper started");
        Ok(EvictionSweeper {
            stop,
            join: Some(join),
        })
    }

    fn signal_stop(&self) {
        let (flag, signal) = &*self.stop;
        *flag.lock() = true;
        signal.notify_all();
    }

    /// Signals the thread and waits for it to finish.
    fn stop(mut self) {
        self.signal_stop();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for EvictionSweeper {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
