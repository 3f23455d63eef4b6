//! # Pooled Client Benchmark Harness
//!
//! Purpose: Drive a repeatable workload through the pooled client against a
//! live monitor-managed deployment, so pool sizing and round-trip costs can
//! be compared over time.
//!
//! ## Design Principles
//! 1. **Deterministic Workload**: Use a fixed PRNG seed for stable comparisons.
//! 2. **Allocation Control**: Pre-build keys/values to keep setup costs off the hot path.
//! 3. **Shared Pool**: Worker threads borrow one client, so the numbers include
//!    lease contention.
//!
//! ## Usage
//!
//! ```text
//! skv-bench <config.json> [ops] [threads] [batch]
//! RUST_LOG=skv_client=debug skv-bench pool.json 100000 8 16
//! ```

use std::env;
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use skv_client::{ClientError, ClientResult, Command, PoolConfig, StoreClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_OP_COUNT: usize = 100_000;
const DEFAULT_THREADS: usize = 4;
const DEFAULT_BATCH: usize = 16;
const KEY_COUNT: usize = 1 << 12;
const KEY_SIZE: usize = 16;
const VALUE_SIZE: usize = 128;
const COUNTER_KEY: &[u8] = b"skv-bench:counter";

struct BenchConfig {
    config_path: String,
    op_count: usize,
    threads: usize,
    batch: usize,
}

impl BenchConfig {
    fn from_args() -> Result<Self> {
        let mut args = env::args().skip(1);
        let Some(config_path) = args.next() else {
            bail!("usage: skv-bench <config.json> [ops] [threads] [batch]");
        };
        Ok(BenchConfig {
            config_path,
            op_count: parse_usize(args.next(), DEFAULT_OP_COUNT),
            threads: parse_usize(args.next(), DEFAULT_THREADS).max(1),
            batch: parse_usize(args.next(), DEFAULT_BATCH).max(1),
        })
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

/// Tiny deterministic PRNG; keeps the workload reproducible.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    #[inline]
    fn next_index(&mut self, mask: usize) -> usize {
        (self.next_u64() as usize) & mask
    }
}

fn build_buffers(count: usize, size: usize, seed: u64) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let mut buffer = vec![0u8; size];
            let bytes = (seed ^ (i as u64)).to_le_bytes();
            let copy_len = buffer.len().min(bytes.len());
            buffer[..copy_len].copy_from_slice(&bytes[..copy_len]);
            buffer
        })
        .collect()
}

fn report(label: &str, ops: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let ops_per_sec = (ops as f64) / secs;
    let micros_per_op = (secs * 1e6) / (ops as f64);
    println!(
        "{label}: {ops} ops in {secs:.3}s ({ops_per_sec:.0} ops/s, {micros_per_op:.1} us/op)"
    );
}

/// Splits `ops` across `threads` workers and reports the phase.
fn run_phase<F>(label: &str, ops: usize, threads: usize, op: F) -> Result<()>
where
    F: Fn(&mut XorShift64) -> ClientResult<()> + Sync,
{
    let per_thread = ops / threads;
    let start = Instant::now();
    thread::scope(|scope| -> Result<()> {
        let workers: Vec<_> = (0..threads)
            .map(|worker| {
                let op = &op;
                scope.spawn(move || {
                    let mut rng = XorShift64::new(0x1234_5678_9ABC_DEF0 ^ worker as u64);
                    for _ in 0..per_thread {
                        op(&mut rng)?;
                    }
                    Ok::<(), ClientError>(())
                })
            })
            .collect();
        for worker in workers {
            match worker.join() {
                Ok(outcome) => outcome.with_context(|| format!("{label} worker failed"))?,
                Err(_) => bail!("{label} worker panicked"),
            }
        }
        Ok(())
    })?;
    report(label, per_thread * threads, start.elapsed());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("skv-bench failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let bench = BenchConfig::from_args()?;
    let config = PoolConfig::from_json_file(&bench.config_path)
        .with_context(|| format!("loading {}", bench.config_path))?;
    let client = StoreClient::with_config(config).context("building client")?;
    info!(
        master = %client.pool().master_addr(),
        ops = bench.op_count,
        threads = bench.threads,
        batch = bench.batch,
        "benchmark starting"
    );

    let keys = build_buffers(KEY_COUNT, KEY_SIZE, 0xA5A5_A5A5_A5A5_A5A5);
    let values = build_buffers(KEY_COUNT, VALUE_SIZE, 0x5A5A_5A5A_5A5A_5A5A);
    let mask = KEY_COUNT - 1;

    run_phase("SET", bench.op_count, bench.threads, |rng| {
        let idx = rng.next_index(mask);
        client.set(&keys[idx], &values[idx])
    })?;

    run_phase("GET", bench.op_count, bench.threads, |rng| {
        let idx = rng.next_index(mask);
        black_box(client.get(&keys[idx])?);
        Ok(())
    })?;

    let batches = bench.op_count / bench.batch;
    run_phase("PIPELINE", batches, bench.threads, |rng| {
        let replies = client.pipeline(|pipe| {
            for _ in 0..bench.batch {
                let idx = rng.next_index(mask);
                pipe.queue(Command::new("GET").arg(&keys[idx]));
            }
            Ok(())
        })?;
        black_box(replies);
        Ok(())
    })?;

    let conflicts = AtomicUsize::new(0);
    run_phase("TRANSACTION", batches, bench.threads, |_rng| {
        let outcome = client.transaction(&[COUNTER_KEY], |tx| {
            tx.queue(Command::new("INCR").arg(COUNTER_KEY))
        })?;
        if outcome.is_none() {
            conflicts.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    })?;

    let stats = client.pool().stats();
    println!(
        "pool: created={} acquired={} released={} discarded={} waits={} timeouts={} conflicts={}",
        stats.created,
        stats.acquired,
        stats.released,
        stats.discarded,
        stats.waits,
        stats.timeouts,
        conflicts.into_inner()
    );
    client.close();
    Ok(())
}
