//! In-process fake store and monitors with fault injection.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use skv_client::{ClientError, ClientResult, Connection, ConnectionPool, Connector, PoolConfig, RespValue};

pub const MASTER: &str = "10.0.0.1:6379";
pub const MONITOR: &str = "10.0.0.100:26379";
pub const GROUP: &str = "mymaster";

pub const READONLY_REPLY: &str = "READONLY You can't write against a read only replica.";
pub const WRONGTYPE_REPLY: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

/// How an injected fault shows up.
#[derive(Debug, Clone)]
pub enum FaultKind {
    /// The write fails and the connection stays dead.
    Io,
    /// The store answers with this error reply.
    Reply(&'static str),
}

struct Fault {
    command: String,
    kind: FaultKind,
    remaining: usize,
}

/// What a fake monitor answers.
#[derive(Debug, Clone)]
pub enum Monitor {
    Reports(String),
    Unknown,
    Down,
}

#[derive(Default)]
struct StoreState {
    data: HashMap<Vec<u8>, Vec<u8>>,
    journal: Vec<(usize, String)>,
    faults: Vec<Fault>,
}

/// Shared state behind every fake master connection.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
    next_id: AtomicUsize,
    open: AtomicUsize,
    connects: AtomicUsize,
    conflict_on_exec: AtomicBool,
    refuse_connects: AtomicBool,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeStore::default())
    }

    /// Makes the next `times` sends of `command` fail with `kind`.
    pub fn fail_on(&self, command: &str, kind: FaultKind, times: usize) {
        self.state.lock().unwrap().faults.push(Fault {
            command: command.to_ascii_uppercase(),
            kind,
            remaining: times,
        });
    }

    /// Makes every EXEC report a watched-key conflict.
    pub fn set_conflict(&self, conflict: bool) {
        self.conflict_on_exec.store(conflict, Ordering::SeqCst);
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    pub fn put(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .data
            .insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .data
            .get(key.as_bytes())
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    /// Command names sent to the master, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .journal
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// How many times `command` was sent.
    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|name| name.as_str() == command).count()
    }

    /// Physical master connections currently open.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Physical master connections ever opened.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn record(&self, id: usize, name: &str) -> Option<FaultKind> {
        let mut state = self.state.lock().unwrap();
        state.journal.push((id, name.to_string()));
        let fault = state
            .faults
            .iter_mut()
            .find(|fault| fault.command == name && fault.remaining > 0)?;
        fault.remaining -= 1;
        Some(fault.kind.clone())
    }

    fn apply(&self, args: &[Vec<u8>]) -> RespValue {
        let mut state = self.state.lock().unwrap();
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match (name.as_str(), args.len()) {
            ("PING", 1) => RespValue::Simple(b"PONG".to_vec()),
            ("GET", 2) => RespValue::Bulk(state.data.get(&args[1]).cloned()),
            ("SET", 3) => {
                state.data.insert(args[1].clone(), args[2].clone());
                RespValue::Simple(b"OK".to_vec())
            }
            ("DEL", 2) => RespValue::Integer(state.data.remove(&args[1]).map_or(0, |_| 1)),
            ("INCR", 2) => {
                let current = state
                    .data
                    .get(&args[1])
                    .map(|raw| String::from_utf8_lossy(raw).parse::<i64>());
                let next = match current {
                    None => 1,
                    Some(Ok(value)) => value + 1,
                    Some(Err(_)) => {
                        return RespValue::Error(b"ERR value is not an integer or out of range".to_vec())
                    }
                };
                state.data.insert(args[1].clone(), next.to_string().into_bytes());
                RespValue::Integer(next)
            }
            _ => RespValue::Error(format!("ERR unknown command '{name}'").into_bytes()),
        }
    }
}

/// Connector that routes monitor addresses to scripted monitors and the
/// master address to the fake store.
pub struct FakeConnector {
    store: Arc<FakeStore>,
    monitors: HashMap<String, Monitor>,
}

impl FakeConnector {
    pub fn new(store: Arc<FakeStore>) -> Self {
        let mut monitors = HashMap::new();
        monitors.insert(MONITOR.to_string(), Monitor::Reports(MASTER.to_string()));
        FakeConnector { store, monitors }
    }

    pub fn with_monitors(store: Arc<FakeStore>, monitors: &[(&str, Monitor)]) -> Self {
        FakeConnector {
            store,
            monitors: monitors
                .iter()
                .map(|(addr, monitor)| (addr.to_string(), monitor.clone()))
                .collect(),
        }
    }
}

impl Connector for FakeConnector {
    type Conn = FakeConnection;

    fn connect(&self, addr: &str, _timeout: Option<Duration>) -> ClientResult<FakeConnection> {
        if let Some(monitor) = self.monitors.get(addr) {
            return match monitor {
                Monitor::Down => Err(refused()),
                other => Ok(FakeConnection::monitor(other.clone())),
            };
        }
        if addr == MASTER && !self.store.refuse_connects.load(Ordering::SeqCst) {
            return Ok(FakeConnection::master(Arc::clone(&self.store)));
        }
        Err(refused())
    }
}

fn refused() -> ClientError {
    ClientError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"))
}

enum Role {
    Monitor(Monitor),
    Master(Arc<FakeStore>),
}

/// One fake connection, speaking either the monitor or the master dialect.
pub struct FakeConnection {
    id: usize,
    role: Role,
    pending: VecDeque<RespValue>,
    in_multi: bool,
    multi_failed: bool,
    tx_queue: Vec<Vec<Vec<u8>>>,
    dead: bool,
}

impl FakeConnection {
    fn monitor(monitor: Monitor) -> Self {
        FakeConnection {
            id: 0,
            role: Role::Monitor(monitor),
            pending: VecDeque::new(),
            in_multi: false,
            multi_failed: false,
            tx_queue: Vec::new(),
            dead: false,
        }
    }

    fn master(store: Arc<FakeStore>) -> Self {
        let id = store.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        store.open.fetch_add(1, Ordering::SeqCst);
        store.connects.fetch_add(1, Ordering::SeqCst);
        FakeConnection {
            id,
            role: Role::Master(store),
            pending: VecDeque::new(),
            in_multi: false,
            multi_failed: false,
            tx_queue: Vec::new(),
            dead: false,
        }
    }

    /// Identifier of the physical connection, stable across reuse.
    pub fn id(&self) -> usize {
        self.id
    }

    fn master_reply(&mut self, store: &FakeStore, args: Vec<Vec<u8>>) -> RespValue {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        match name.as_str() {
            "WATCH" | "UNWATCH" => RespValue::Simple(b"OK".to_vec()),
            "MULTI" => {
                self.in_multi = true;
                self.multi_failed = false;
                self.tx_queue.clear();
                RespValue::Simple(b"OK".to_vec())
            }
            "DISCARD" => {
                if !self.in_multi {
                    return RespValue::Error(b"ERR DISCARD without MULTI".to_vec());
                }
                self.in_multi = false;
                self.tx_queue.clear();
                RespValue::Simple(b"OK".to_vec())
            }
            "EXEC" => {
                if !self.in_multi {
                    return RespValue::Error(b"ERR EXEC without MULTI".to_vec());
                }
                self.in_multi = false;
                let queued = std::mem::take(&mut self.tx_queue);
                if self.multi_failed {
                    return RespValue::Error(
                        b"EXECABORT Transaction discarded because of previous errors.".to_vec(),
                    );
                }
                if store.conflict_on_exec.load(Ordering::SeqCst) {
                    return RespValue::Nil;
                }
                RespValue::Array(queued.iter().map(|cmd| store.apply(cmd)).collect())
            }
            _ if self.in_multi => {
                self.tx_queue.push(args);
                RespValue::Simple(b"QUEUED".to_vec())
            }
            _ => store.apply(&args),
        }
    }
}

impl Connection for FakeConnection {
    fn send(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        let owned: Vec<Vec<u8>> = args.iter().map(|arg| arg.to_vec()).collect();
        let reply = match &self.role {
            Role::Monitor(Monitor::Reports(addr)) => {
                let (host, port) = addr.rsplit_once(':').unwrap_or((addr.as_str(), ""));
                RespValue::Array(vec![
                    RespValue::Bulk(Some(host.as_bytes().to_vec())),
                    RespValue::Bulk(Some(port.as_bytes().to_vec())),
                ])
            }
            Role::Monitor(_) => RespValue::Nil,
            Role::Master(store) => {
                let store = Arc::clone(store);
                let name = String::from_utf8_lossy(&owned[0]).to_ascii_uppercase();
                let fault = store.record(self.id, &name);
                if self.dead {
                    return Err(reset());
                }
                match fault {
                    Some(FaultKind::Io) => {
                        self.dead = true;
                        return Err(reset());
                    }
                    Some(FaultKind::Reply(message)) => {
                        if self.in_multi {
                            self.multi_failed = true;
                        }
                        RespValue::Error(message.as_bytes().to_vec())
                    }
                    None => self.master_reply(&store, owned),
                }
            }
        };
        self.pending.push_back(reply);
        Ok(())
    }

    fn flush(&mut self) -> ClientResult<()> {
        if self.dead {
            return Err(reset());
        }
        Ok(())
    }

    fn read_reply(&mut self) -> ClientResult<RespValue> {
        if self.dead {
            return Err(reset());
        }
        self.pending
            .pop_front()
            .ok_or_else(|| ClientError::Protocol("no reply pending".to_string()))
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        if let Role::Master(store) = &self.role {
            store.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

fn reset() -> ClientError {
    ClientError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"))
}

/// Small pool on the fake store: eviction off, short waits.
pub fn config(max_total: usize) -> PoolConfig {
    PoolConfig::new([MONITOR], GROUP)
        .with_sizing(max_total, max_total, 0)
        .with_max_wait_millis(200)
        .with_eviction(-1, -1)
}

pub fn pool_with(config: PoolConfig) -> (ConnectionPool<FakeConnector>, Arc<FakeStore>) {
    let store = FakeStore::new();
    let pool = ConnectionPool::with_connector(config, FakeConnector::new(Arc::clone(&store)))
        .expect("pool");
    (pool, store)
}

pub fn pool(max_total: usize) -> (ConnectionPool<FakeConnector>, Arc<FakeStore>) {
    pool_with(config(max_total))
}

/// Every acquire was settled exactly once and nothing is outstanding.
pub fn assert_settled(pool: &ConnectionPool<FakeConnector>) {
    let stats = pool.stats();
    assert_eq!(stats.active, 0, "outstanding leases: {stats:?}");
    assert_eq!(
        stats.acquired,
        stats.released + stats.discarded,
        "unbalanced leases: {stats:?}"
    );
}
