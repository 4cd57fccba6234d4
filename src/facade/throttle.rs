//! `IoThrottle`: the service callers hold.
//!
//! Wires the load meter, idle coordinator, and hint cache together behind the
//! access hooks and the existence reconciliation calls. Each instance is
//! independent; share one through `Arc`.

#![allow(missing_docs)]

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::Mutex;

use crate::core::config::ThrottleConfig;
use crate::core::errors::{Result, ThrottleError};
use crate::facade::identity::{IdentityService, PathHashIdentity};
use crate::facade::probe::{ExistenceProbe, FsProbe};
use crate::hints::cache::{FileId, Hint, HintCache};
use crate::idle::context::{CancelFlag, IdleContext, SleepHook};
use crate::idle::coordinator::IdleCoordinator;
use crate::idle::escape::{EscapeHatch, NoEscapeHatch};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, spawn_logger};
use crate::logger::jsonl::JsonlConfig;
use crate::monitor::clock::{Clock, MonotonicClock};
use crate::monitor::load_meter::LoadMeter;
use crate::monitor::stats::{StatsSnapshot, ThrottleStats, bump};

/// Hooks fired for every observed filesystem access.
///
/// Errors are idle-wait cancellations of the calling worker.
pub trait AccessObserver: Send + Sync {
    fn on_read(&self, ctx: &IdleContext, path: &Path) -> Result<()>;
    fn on_write(&self, ctx: &IdleContext, path: &Path) -> Result<()>;
    fn on_delete(&self, ctx: &IdleContext, path: &Path) -> Result<()>;
}

// ──────────────────── builder ────────────────────

/// Assembles an [`IoThrottle`] with custom collaborators.
pub struct IoThrottleBuilder {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    identity: Arc<dyn IdentityService>,
    probe: Arc<dyn ExistenceProbe>,
    escape: Arc<dyn EscapeHatch>,
    logger: Option<ActivityLoggerHandle>,
}

impl IoThrottleBuilder {
    #[must_use]
    pub fn config(mut self, config: ThrottleConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn identity(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn probe(mut self, probe: Arc<dyn ExistenceProbe>) -> Self {
        self.probe = probe;
        self
    }

    #[must_use]
    pub fn escape_hatch(mut self, escape: Arc<dyn EscapeHatch>) -> Self {
        self.escape = escape;
        self
    }

    /// Log through an existing logger instead of spawning one.
    #[must_use]
    pub fn logger(mut self, logger: ActivityLoggerHandle) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Validate the configuration and start the throttle.
    ///
    /// With `logging.enabled` and no explicit logger, a logger thread is spawned
    /// and owned by the throttle until [`IoThrottle::shutdown`].
    pub fn build(self) -> Result<IoThrottle> {
        self.config.validate()?;

        let (logger, logger_thread) = match self.logger {
            Some(handle) => (Some(handle), None),
            None if self.config.logging.enabled => {
                let jsonl = JsonlConfig::from_settings(&self.config.logging, &self.config.paths);
                let (handle, join) = spawn_logger(jsonl, self.config.logging.channel_capacity)?;
                (Some(handle), Some(join))
            }
            None => (None, None),
        };

        let stats = Arc::new(ThrottleStats::new());
        let meter = Arc::new(LoadMeter::new(Arc::clone(&self.clock), self.config.meter.tick()));
        let coordinator = IdleCoordinator::new(
            meter,
            self.escape,
            self.config.idle.poll_interval(),
            Arc::clone(&stats),
            logger.clone(),
        );
        let hints = HintCache::new(
            &self.config.cache,
            Arc::clone(&self.clock),
            Arc::clone(&stats),
            logger.clone(),
        );

        if let Some(handle) = &logger {
            handle.send(ActivityEvent::ThrottleStarted {
                version: env!("CARGO_PKG_VERSION").to_string(),
                config_hash: self.config.stable_hash()?,
            });
        }

        Ok(IoThrottle {
            started: self.clock.now(),
            config: self.config,
            clock: self.clock,
            coordinator,
            hints,
            identity: self.identity,
            probe: self.probe,
            stats,
            logger,
            logger_thread: Mutex::new(logger_thread),
        })
    }
}

impl Default for IoThrottleBuilder {
    fn default() -> Self {
        Self {
            config: ThrottleConfig::default(),
            clock: Arc::new(MonotonicClock),
            identity: Arc::new(PathHashIdentity::new()),
            probe: Arc::new(FsProbe),
            escape: Arc::new(NoEscapeHatch),
            logger: None,
        }
    }
}

impl fmt::Debug for IoThrottleBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoThrottleBuilder")
            .field("config", &self.config)
            .field("logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

// ──────────────────── service ────────────────────

/// Adaptive idle-I/O throttle with a file-existence hint cache.
pub struct IoThrottle {
    config: ThrottleConfig,
    clock: Arc<dyn Clock>,
    coordinator: IdleCoordinator,
    hints: HintCache,
    identity: Arc<dyn IdentityService>,
    probe: Arc<dyn ExistenceProbe>,
    stats: Arc<ThrottleStats>,
    logger: Option<ActivityLoggerHandle>,
    logger_thread: Mutex<Option<JoinHandle<()>>>,
    started: Instant,
}

impl IoThrottle {
    #[must_use]
    pub fn builder() -> IoThrottleBuilder {
        IoThrottleBuilder::default()
    }

    /// Throttle with default collaborators and the given configuration.
    pub fn new(config: ThrottleConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub const fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    #[must_use]
    pub fn identity_of(&self, path: &Path) -> FileId {
        self.identity.identity_of(path)
    }

    /// Ping with the write (or delete) weight once, then record the hint.
    ///
    /// The hint is recorded even when the ping is cancelled: the access it
    /// describes has already happened. The cancellation is still returned.
    pub fn record_hint(&self, ctx: &IdleContext, id: FileId, created: bool) -> Result<Hint> {
        let weight = if created {
            self.config.meter.write_weight
        } else {
            self.config.meter.delete_weight
        };
        let pinged = self.coordinator.ping(ctx, weight);
        let hint = self.hints.insert(id, created);
        pinged.map(|_| hint)
    }

    /// Probe the path directly and overwrite its hint with the answer.
    ///
    /// The probe is a filesystem touch: it pings with the read weight first,
    /// so idle callers wait for their ceiling and cancellation propagates.
    /// Slow probes are logged and counted; they do not change the result.
    pub fn check_exists_and_cache(&self, ctx: &IdleContext, path: &Path) -> Result<bool> {
        self.coordinator.ping(ctx, self.config.meter.read_weight)?;
        bump(&self.stats.existence_probes);
        let id = self.identity.identity_of(path);

        let started = self.clock.now();
        let exists = self.probe.exists(path);
        let elapsed = self.clock.now().saturating_duration_since(started);

        if elapsed >= self.config.probe.slow_threshold() {
            bump(&self.stats.slow_probes);
            self.log(ActivityEvent::SlowProbe {
                path: path.display().to_string(),
                file_id: id.0,
                duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            });
        }

        self.hints.replace(id, exists);
        Ok(exists)
    }

    /// Whether a cached belief about `path` existing must be discarded.
    ///
    /// Consumes the path's hint.
    pub fn impeach_existence(&self, path: &Path, expected_exists: bool) -> bool {
        let id = self.identity.identity_of(path);
        self.hints.impeach_existence(id, expected_exists)
    }

    /// Run `f` as priority work; idle waiters stay parked until it returns.
    pub fn run_with_priority<T>(&self, f: impl FnOnce() -> T) -> T {
        self.coordinator.run_with_priority(f)
    }

    /// Run `block` in an idle region; see [`IdleCoordinator::idle`].
    pub fn idle<T>(
        &self,
        ctx: &IdleContext,
        ceiling: u64,
        on_sleep: Option<SleepHook>,
        cancel: Option<CancelFlag>,
        block: impl FnOnce(&IdleContext) -> T,
    ) -> T {
        self.coordinator.idle(ctx, ceiling, on_sleep, cancel, block)
    }

    /// Wait once for the active ceiling, then run `block` unthrottled.
    pub fn run_at_full_priority<T>(
        &self,
        ctx: &IdleContext,
        block: impl FnOnce(&IdleContext) -> T,
    ) -> Result<T> {
        self.coordinator.run_at_full_priority(ctx, block)
    }

    /// Current decayed load.
    #[must_use]
    pub fn load(&self) -> u64 {
        self.coordinator.meter().peek()
    }

    #[must_use]
    pub fn hint_count(&self) -> usize {
        self.hints.len()
    }

    #[must_use]
    pub fn hint_for(&self, path: &Path) -> Option<Hint> {
        self.hints.peek(self.identity.identity_of(path))
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(
            self.load(),
            self.coordinator.priority_in_flight() as u64,
            self.hints.len() as u64,
        )
    }

    /// Report the stop and, if this throttle spawned its logger, drain and join it.
    ///
    /// Safe to call more than once; later calls only re-send the stop event.
    pub fn shutdown(&self, reason: &str) -> Result<()> {
        let Some(logger) = &self.logger else {
            return Ok(());
        };
        logger.send(ActivityEvent::ThrottleStopped {
            reason: reason.to_string(),
            uptime_secs: self
                .clock
                .now()
                .saturating_duration_since(self.started)
                .as_secs(),
        });

        let Some(join) = self.logger_thread.lock().take() else {
            return Ok(());
        };
        logger.shutdown()?;
        join.join().map_err(|_| ThrottleError::Runtime {
            details: "activity logger thread panicked".to_string(),
        })
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

impl AccessObserver for IoThrottle {
    fn on_read(&self, ctx: &IdleContext, _path: &Path) -> Result<()> {
        self.coordinator
            .ping(ctx, self.config.meter.read_weight)
            .map(|_| ())
    }

    fn on_write(&self, ctx: &IdleContext, path: &Path) -> Result<()> {
        let id = self.identity.identity_of(path);
        self.record_hint(ctx, id, true).map(|_| ())
    }

    fn on_delete(&self, ctx: &IdleContext, path: &Path) -> Result<()> {
        let id = self.identity.identity_of(path);
        self.record_hint(ctx, id, false).map(|_| ())
    }
}

impl fmt::Debug for IoThrottle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoThrottle")
            .field("coordinator", &self.coordinator)
            .field("hints", &self.hints)
            .field("logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::probe::MemoryProbe;
    use crate::monitor::clock::ManualClock;
    use std::time::Duration;

    fn throttle_with_probe(probe: Arc<MemoryProbe>) -> (IoThrottle, ManualClock) {
        let clock = ManualClock::new();
        let throttle = IoThrottle::builder()
            .clock(Arc::new(clock.clone()))
            .identity(Arc::new(PathHashIdentity::with_base("/proj")))
            .probe(probe)
            .build()
            .unwrap();
        (throttle, clock)
    }

    #[test]
    fn write_then_delete_is_ambiguous_and_impeaches() {
        let (throttle, _) = throttle_with_probe(Arc::new(MemoryProbe::new()));
        let ctx = IdleContext::root();
        let path = Path::new("/proj/a.txt");
        throttle.on_write(&ctx, path).unwrap();
        throttle.on_delete(&ctx, path).unwrap();
        assert_eq!(throttle.hint_for(path), Some(Hint::Ambiguous));
        assert!(throttle.impeach_existence(path, true));
        assert_eq!(throttle.hint_for(path), None);
    }

    #[test]
    fn each_write_pings_exactly_once() {
        let (throttle, _) = throttle_with_probe(Arc::new(MemoryProbe::new()));
        let ctx = IdleContext::root();
        throttle.on_write(&ctx, Path::new("/proj/x")).unwrap();
        throttle.on_read(&ctx, Path::new("/proj/x")).unwrap();
        let stats = throttle.stats();
        assert_eq!(stats.pings, 2);
        assert_eq!(stats.load, 3);
        assert_eq!(stats.hints_recorded, 1);
    }

    #[test]
    fn relative_and_absolute_paths_share_hints() {
        let (throttle, _) = throttle_with_probe(Arc::new(MemoryProbe::new()));
        throttle
            .on_delete(&IdleContext::root(), Path::new("b/../c.txt"))
            .unwrap();
        assert!(throttle.impeach_existence(Path::new("/proj/c.txt"), true));
    }

    #[test]
    fn fresh_probe_replaces_ambiguous_hint() {
        let probe = Arc::new(MemoryProbe::new());
        let (throttle, _) = throttle_with_probe(Arc::clone(&probe));
        let ctx = IdleContext::root();
        let path = Path::new("/proj/r");
        throttle.on_write(&ctx, path).unwrap();
        throttle.on_delete(&ctx, path).unwrap();

        probe.create(path);
        assert!(throttle.check_exists_and_cache(&ctx, path).unwrap());
        assert_eq!(throttle.hint_for(path), Some(Hint::Created));
        assert!(!throttle.impeach_existence(path, true));
        assert_eq!(throttle.stats().existence_probes, 1);
    }

    #[test]
    fn existence_check_adds_read_load() {
        let (throttle, _) = throttle_with_probe(Arc::new(MemoryProbe::new()));
        let ctx = IdleContext::root();
        for _ in 0..100 {
            assert!(!throttle.check_exists_and_cache(&ctx, Path::new("/proj/a")).unwrap());
        }
        let stats = throttle.stats();
        assert_eq!(stats.load, 100);
        assert_eq!(stats.pings, 100);
        assert_eq!(stats.existence_probes, 100);
    }

    #[test]
    fn existence_check_in_loaded_idle_region_waits_until_cancelled() {
        let probe = Arc::new(MemoryProbe::new());
        let (throttle, _) = throttle_with_probe(Arc::clone(&probe));
        let throttle = Arc::new(throttle);
        let root = IdleContext::root();
        let path = Path::new("/proj/held");
        probe.create(path);
        throttle.on_read(&root, path).unwrap();
        throttle.on_read(&root, path).unwrap();

        // The manual clock never decays, so a ceiling of 1 is never met.
        let flag = CancelFlag::new();
        let worker = {
            let throttle = Arc::clone(&throttle);
            let flag = flag.clone();
            std::thread::spawn(move || {
                throttle.idle(&IdleContext::root(), 1, None, Some(flag), |ctx| {
                    throttle.check_exists_and_cache(ctx, Path::new("/proj/held"))
                })
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!worker.is_finished());
        assert_eq!(throttle.stats().existence_probes, 0);

        flag.cancel();
        let err = worker.join().unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(throttle.hint_for(path), None);
        assert_eq!(throttle.stats().existence_probes, 0);
    }

    #[test]
    fn cancelled_write_still_records_hint() {
        let (throttle, _) = throttle_with_probe(Arc::new(MemoryProbe::new()));
        let flag = CancelFlag::new();
        flag.cancel();
        let path = Path::new("/proj/cancelled");
        let err = throttle
            .idle(&IdleContext::root(), 5, None, Some(flag), |ctx| {
                throttle.on_write(ctx, path)
            })
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(throttle.hint_for(path), Some(Hint::Created));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = ThrottleConfig::default();
        config.cache.soft_ceiling = config.cache.hard_ceiling + 1;
        let err = IoThrottle::new(config).unwrap_err();
        assert_eq!(err.code(), "IOT-1001");
    }

    #[test]
    fn slow_probe_is_logged_to_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ThrottleConfig::default();
        config.logging.enabled = true;
        config.paths.jsonl_log = dir.path().join("activity.jsonl");
        config.paths.jsonl_fallback = None;
        config.probe.slow_threshold_ms = 5;

        let throttle = IoThrottle::builder()
            .config(config)
            .probe(Arc::new(MemoryProbe::with_latency(Duration::from_millis(20))))
            .build()
            .unwrap();
        assert!(
            !throttle
                .check_exists_and_cache(&IdleContext::root(), Path::new("/nowhere"))
                .unwrap()
        );
        assert_eq!(throttle.stats().slow_probes, 1);
        throttle.shutdown("test").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("activity.jsonl")).unwrap();
        let events: Vec<serde_json::Value> =
            raw.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        let kinds: Vec<&str> = events.iter().map(|e| e["event"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["throttle_start", "slow_probe", "throttle_stop"]);
        assert_eq!(events[1]["path"], "/nowhere");
    }

    #[test]
    fn shutdown_without_logger_is_noop() {
        let (throttle, _) = throttle_with_probe(Arc::new(MemoryProbe::new()));
        throttle.shutdown("done").unwrap();
        throttle.shutdown("again").unwrap();
    }
}
