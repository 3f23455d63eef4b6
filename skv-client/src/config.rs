//! # Pool Configuration
//!
//! Purpose: Describe how the pool sizes itself, how long callers may wait,
//! how idle connections age out, and which monitors to ask for the master.
//!
//! ## Notes
//! - Millisecond fields keep the signed convention of the deployments this
//!   client replaces: a negative `eviction_interval_millis` turns the sweep off
//!   even when `min_evictable_idle_millis` is set, and that combination is
//!   honored as written.
//! - Field names serialize in camelCase (`maxTotal`, `monitorEndpoints`, ...).

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Separator accepted by [`PoolConfig::parse_monitor_list`].
pub const MONITOR_LIST_SEPARATOR: char = '|';

/// Pool configuration. Immutable once the pool is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfig {
    /// Maximum connections (idle + in use).
    pub max_total: usize,
    /// Maximum idle connections kept for reuse.
    pub max_idle: usize,
    /// Idle connections the eviction sweep keeps warm.
    pub min_idle: usize,
    /// Upper bound on how long `acquire` blocks. Must not be negative.
    pub max_wait_millis: i64,
    /// Connect timeout, also applied to socket reads and writes. `<= 0` disables it.
    pub connect_timeout_millis: i64,
    /// Idle age after which a connection may be evicted. Negative never evicts.
    pub min_evictable_idle_millis: i64,
    /// Period of the eviction sweep. Negative disables the sweep.
    pub eviction_interval_millis: i64,
    /// Monitor endpoints as `host:port`.
    pub monitor_endpoints: BTreeSet<String>,
    /// Logical group name the monitors track.
    pub master_group_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_total: 500,
            max_idle: 50,
            min_idle: 20,
            max_wait_millis: 10_000,
            connect_timeout_millis: 7_000,
            min_evictable_idle_millis: 1_800_000,
            eviction_interval_millis: -1,
            monitor_endpoints: BTreeSet::new(),
            master_group_name: "master".to_string(),
        }
    }
}

impl PoolConfig {
    /// Creates a configuration for the given monitors and group with default sizing.
    pub fn new<I, S>(monitors: I, group: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PoolConfig {
            monitor_endpoints: monitors.into_iter().map(Into::into).collect(),
            master_group_name: group.into(),
            ..Default::default()
        }
    }

    /// Set pool sizing.
    pub fn with_sizing(mut self, max_total: usize, max_idle: usize, min_idle: usize) -> Self {
        self.max_total = max_total;
        self.max_idle = max_idle;
        self.min_idle = min_idle;
        self
    }

    /// Set the acquire wait bound.
    pub fn with_max_wait_millis(mut self, millis: i64) -> Self {
        self.max_wait_millis = millis;
        self
    }

    /// Set the connect/read timeout.
    pub fn with_connect_timeout_millis(mut self, millis: i64) -> Self {
        self.connect_timeout_millis = millis;
        self
    }

    /// Set the eviction knobs.
    pub fn with_eviction(mut self, min_evictable_idle_millis: i64, interval_millis: i64) -> Self {
        self.min_evictable_idle_millis = min_evictable_idle_millis;
        self.eviction_interval_millis = interval_millis;
        self
    }

    /// Parses a `|`-separated monitor list such as `"10.0.0.1:26379|10.0.0.2:26379"`.
    pub fn parse_monitor_list(list: &str) -> BTreeSet<String> {
        list.split(MONITOR_LIST_SEPARATOR)
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Loads a configuration from a JSON document.
    pub fn from_json_str(json: &str) -> ClientResult<Self> {
        serde_json::from_str(json).map_err(|err| ClientError::Config(format!("invalid JSON: {err}")))
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| ClientError::Config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Checks the invariants the pool relies on.
    pub fn validate(&self) -> ClientResult<()> {
        if self.monitor_endpoints.is_empty() {
            return Err(ClientError::Config(
                "monitor endpoint set is empty; separate several monitors with '|'".to_string(),
            ));
        }
        for endpoint in &self.monitor_endpoints {
            check_endpoint(endpoint)?;
        }
        if self.master_group_name.trim().is_empty() {
            return Err(ClientError::Config("master group name is empty".to_string()));
        }
        if self.max_total == 0 {
            return Err(ClientError::Config("maxTotal must be positive".to_string()));
        }
        if self.min_idle > self.max_idle || self.max_idle > self.max_total {
            return Err(ClientError::Config(format!(
                "expected minIdle <= maxIdle <= maxTotal, got {} / {} / {}",
                self.min_idle, self.max_idle, self.max_total
            )));
        }
        if self.max_wait_millis < 0 {
            return Err(ClientError::Config(
                "maxWaitMillis must not be negative; acquire always has a bound".to_string(),
            ));
        }
        Ok(())
    }

    /// Acquire wait bound.
    pub fn max_wait(&self) -> Duration {
        millis(self.max_wait_millis).unwrap_or(Duration::ZERO)
    }

    /// Connect/read/write timeout, `None` when disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_millis).filter(|timeout| !timeout.is_zero())
    }

    /// Idle age that makes a connection evictable, `None` when age never evicts.
    pub fn min_evictable_idle(&self) -> Option<Duration> {
        millis(self.min_evictable_idle_millis)
    }

    /// Sweep period, `None` when the background sweep is disabled.
    pub fn eviction_interval(&self) -> Option<Duration> {
        millis(self.eviction_interval_millis)
    }
}

fn millis(value: i64) -> Option<Duration> {
    u64::try_from(value).ok().map(Duration::from_millis)
}

fn check_endpoint(endpoint: &str) -> ClientResult<()> {
    let valid = match endpoint.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ClientError::Config(format!(
            "monitor endpoint '{endpoint}' is not host:port"
        )))
    }
}
