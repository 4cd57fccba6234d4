//! Synthetic idle-vs-priority workload against an in-process throttle.
//!
//! Idle workers churn through a virtual file set inside an idle region; priority
//! workers fire bursts of writes and deletes inside priority sections, then pause
//! for a random jitter. At the deadline (or on a stop signal) the shared cancel
//! flag is cleared and idle workers exit through their next ping.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::cli::signals::StopSignal;
use crate::core::errors::{Result, ThrottleError};
use crate::facade::probe::{ExistenceProbe, MemoryProbe};
use crate::facade::throttle::{AccessObserver, IoThrottle};
use crate::idle::context::{CancelFlag, IdleContext};
use crate::monitor::stats::StatsSnapshot;

/// Workload shape.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationConfig {
    pub idle_workers: usize,
    pub priority_workers: usize,
    pub duration: Duration,
    pub ceiling: u64,
    /// Accesses per priority section.
    pub burst: u64,
    /// Size of the virtual file set.
    pub files: usize,
    pub max_jitter: Duration,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            idle_workers: 4,
            priority_workers: 1,
            duration: Duration::from_secs(2),
            ceiling: 8,
            burst: 16,
            files: 64,
            max_jitter: Duration::from_millis(50),
            seed: None,
        }
    }
}

/// Outcome of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub elapsed_ms: u64,
    pub idle_ops: u64,
    pub priority_ops: u64,
    pub priority_sections: u64,
    pub idle_workers_cancelled: u64,
    pub impeached: u64,
    pub stopped_by_signal: bool,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Default)]
struct Counters {
    idle_ops: AtomicU64,
    priority_ops: AtomicU64,
    priority_sections: AtomicU64,
    cancelled: AtomicU64,
    impeached: AtomicU64,
}

fn file_path(index: usize) -> PathBuf {
    PathBuf::from(format!("/sim/file-{index:04}"))
}

fn worker_rng(seed: Option<u64>, worker: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(worker)),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Run the workload until the deadline or until `stop` is raised.
pub fn run_simulation(
    throttle: &Arc<IoThrottle>,
    probe: &Arc<MemoryProbe>,
    config: &SimulationConfig,
    stop: &StopSignal,
) -> Result<SimulationReport> {
    if config.files == 0 {
        return Err(ThrottleError::InvalidConfig {
            details: "simulation needs at least one file".to_string(),
        });
    }

    let counters = Arc::new(Counters::default());
    let cancel = CancelFlag::new();
    let priority_done = Arc::new(AtomicBool::new(false));
    let started = Instant::now();
    let mut handles = Vec::new();
    let abort = |details: String| {
        cancel.cancel();
        priority_done.store(true, Ordering::Relaxed);
        ThrottleError::Runtime { details }
    };

    for worker in 0..config.idle_workers {
        let throttle = Arc::clone(throttle);
        let probe = Arc::clone(probe);
        let counters = Arc::clone(&counters);
        let cancel = cancel.clone();
        let config = config.clone();
        let handle = thread::Builder::new()
            .name(format!("iot-idle-{worker}"))
            .spawn(move || {
                let mut rng = worker_rng(config.seed, worker as u64);
                let outcome = throttle.idle(
                    &IdleContext::root(),
                    config.ceiling,
                    None,
                    Some(cancel),
                    |ctx| idle_loop(&throttle, &probe, ctx, &config, &counters, &mut rng),
                );
                if matches!(&outcome, Err(e) if e.is_cancelled()) {
                    counters.cancelled.fetch_add(1, Ordering::Relaxed);
                }
            })
            .map_err(|e| abort(format!("failed to spawn idle worker: {e}")))?;
        handles.push(handle);
    }

    for worker in 0..config.priority_workers {
        let throttle = Arc::clone(throttle);
        let probe = Arc::clone(probe);
        let counters = Arc::clone(&counters);
        let done = Arc::clone(&priority_done);
        let config = config.clone();
        let handle = thread::Builder::new()
            .name(format!("iot-priority-{worker}"))
            .spawn(move || {
                let mut rng = worker_rng(config.seed, 1_000 + worker as u64);
                while !done.load(Ordering::Relaxed) {
                    priority_burst(&throttle, &probe, &config, &counters, &mut rng);
                    let jitter_ms = u64::try_from(config.max_jitter.as_millis()).unwrap_or(0);
                    if jitter_ms > 0 {
                        thread::sleep(Duration::from_millis(rng.random_range(0..=jitter_ms)));
                    }
                }
            })
            .map_err(|e| abort(format!("failed to spawn priority worker: {e}")))?;
        handles.push(handle);
    }

    let deadline = started + config.duration;
    let mut stopped_by_signal = false;
    while Instant::now() < deadline {
        if stop.propagate_to(&cancel) {
            stopped_by_signal = true;
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cancel.cancel();
    priority_done.store(true, Ordering::Relaxed);

    for handle in handles {
        handle.join().map_err(|_| ThrottleError::Runtime {
            details: "simulation worker panicked".to_string(),
        })?;
    }

    let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
    Ok(SimulationReport {
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        idle_ops: read(&counters.idle_ops),
        priority_ops: read(&counters.priority_ops),
        priority_sections: read(&counters.priority_sections),
        idle_workers_cancelled: read(&counters.cancelled),
        impeached: read(&counters.impeached),
        stopped_by_signal,
        stats: throttle.stats(),
    })
}

/// Mixed reads, probes, and reconciliations until a ping reports cancellation.
fn idle_loop(
    throttle: &IoThrottle,
    probe: &MemoryProbe,
    ctx: &IdleContext,
    config: &SimulationConfig,
    counters: &Counters,
    rng: &mut StdRng,
) -> Result<()> {
    loop {
        let path = file_path(rng.random_range(0..config.files));
        throttle.on_read(ctx, &path)?;
        let believed = probe.exists(&path);
        if throttle.impeach_existence(&path, believed) {
            counters.impeached.fetch_add(1, Ordering::Relaxed);
            throttle.check_exists_and_cache(ctx, &path)?;
        }
        counters.idle_ops.fetch_add(1, Ordering::Relaxed);
    }
}

fn priority_burst(
    throttle: &IoThrottle,
    probe: &MemoryProbe,
    config: &SimulationConfig,
    counters: &Counters,
    rng: &mut StdRng,
) {
    let root = IdleContext::root();
    throttle.run_with_priority(|| {
        counters.priority_sections.fetch_add(1, Ordering::Relaxed);
        for _ in 0..config.burst {
            let path = file_path(rng.random_range(0..config.files));
            // The root context has no ceiling, so these pings never wait or fail.
            let observed = if rng.random_bool(0.7) {
                probe.create(path.clone());
                throttle.on_write(&root, &path)
            } else {
                probe.remove(&path);
                throttle.on_delete(&root, &path)
            };
            if observed.is_ok() {
                counters.priority_ops.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}
