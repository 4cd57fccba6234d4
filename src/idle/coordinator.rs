//! Idle coordination: load-aware waiting, idle regions, and priority sections.
//!
//! Idle work calls [`IdleCoordinator::ping`] with the context of its idle region.
//! While the shared load sits at or above the region's ceiling, or any priority
//! section is running, the ping parks the worker in bounded slices of the poll
//! interval. Parked workers are woken early when the meter halves a non-zero
//! load and when the last priority section ends.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::{Result, ThrottleError};
use crate::idle::context::{CancelFlag, IdleContext, SleepHook};
use crate::idle::escape::{EscapeHatch, EscapeReason};
use crate::idle::priority::PriorityCounter;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::load_meter::LoadMeter;
use crate::monitor::stats::{ThrottleStats, bump, bump_by};

/// Couples the load meter with the priority counter and escape heuristics.
pub struct IdleCoordinator {
    meter: Arc<LoadMeter>,
    priority: PriorityCounter,
    escape: Arc<dyn EscapeHatch>,
    poll_interval: Duration,
    stats: Arc<ThrottleStats>,
    logger: Option<ActivityLoggerHandle>,
}

impl IdleCoordinator {
    #[must_use]
    pub fn new(
        meter: Arc<LoadMeter>,
        escape: Arc<dyn EscapeHatch>,
        poll_interval: Duration,
        stats: Arc<ThrottleStats>,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            priority: PriorityCounter::new(Arc::clone(&meter)),
            meter,
            escape,
            poll_interval,
            stats,
            logger,
        }
    }

    #[must_use]
    pub fn meter(&self) -> &LoadMeter {
        &self.meter
    }

    #[must_use]
    pub fn priority_in_flight(&self) -> usize {
        self.priority.in_flight()
    }

    /// Report one observed access of `weight`.
    ///
    /// Outside an idle region the weight is added and the new load returned.
    /// Inside one the caller is held until the load falls below the region's
    /// ceiling and the current load is returned without adding anything.
    pub fn ping(&self, ctx: &IdleContext, weight: u64) -> Result<u64> {
        bump(&self.stats.pings);
        match ctx.ceiling() {
            Some(ceiling) => self.wait_until_below(ctx, ceiling),
            None => {
                bump_by(&self.stats.load_added, weight);
                Ok(self.meter.add(weight))
            }
        }
    }

    /// Block until the load is below `limit` with no priority section running.
    ///
    /// Returns the load observed on exit. Fails with `Cancelled` as soon as the
    /// context's cancel flag reads false at the top of an iteration. Escape
    /// hatches that detect (or cannot rule out) a deadlock-prone thread state
    /// end the wait early with `Ok`.
    pub fn wait_until_below(&self, ctx: &IdleContext, limit: u64) -> Result<u64> {
        bump(&self.stats.idle_waits);
        let mut first_pass = true;
        loop {
            if ctx.is_cancelled() {
                let load = self.meter.peek();
                bump(&self.stats.cancellations);
                self.log(ActivityEvent::IdleCancelled {
                    ceiling: limit,
                    load,
                });
                return Err(ThrottleError::Cancelled {
                    ceiling: limit,
                    load,
                });
            }

            let load = self.meter.peek();
            if load < limit && self.priority.in_flight() == 0 {
                return Ok(load);
            }

            if first_pass {
                first_pass = false;
                let init = self.escape.init_in_progress();
                if let Some(reason) = EscapeReason::from_detection(init, EscapeReason::InitInProgress)
                {
                    return Ok(self.escaped(reason, limit, load));
                }
            }

            let held = self.escape.guarded_lock_held();
            if let Some(reason) = EscapeReason::from_detection(held, EscapeReason::GuardedLockHeld) {
                return Ok(self.escaped(reason, limit, load));
            }

            ctx.notify_sleep();
            bump(&self.stats.idle_sleeps);
            self.meter.wait_for_change(self.poll_interval);
        }
    }

    /// Run `block` inside an idle region with the given ceiling.
    ///
    /// The region's ceiling is the larger of `ceiling` and any enclosing one.
    /// `on_sleep` and `cancel` apply to this region only.
    pub fn idle<T>(
        &self,
        ctx: &IdleContext,
        ceiling: u64,
        on_sleep: Option<SleepHook>,
        cancel: Option<CancelFlag>,
        block: impl FnOnce(&IdleContext) -> T,
    ) -> T {
        let region = ctx.enter(ceiling, on_sleep, cancel);
        block(&region)
    }

    /// Wait once for the current ceiling, then run `block` unthrottled.
    ///
    /// Without an active ceiling `block` runs immediately with `ctx`.
    pub fn run_at_full_priority<T>(
        &self,
        ctx: &IdleContext,
        block: impl FnOnce(&IdleContext) -> T,
    ) -> Result<T> {
        match ctx.ceiling() {
            Some(ceiling) => {
                self.wait_until_below(ctx, ceiling)?;
                Ok(block(&ctx.without_ceiling()))
            }
            None => Ok(block(ctx)),
        }
    }

    /// Run `f` as priority work: every idle waiter stays parked until it returns.
    pub fn run_with_priority<T>(&self, f: impl FnOnce() -> T) -> T {
        bump(&self.stats.priority_sections);
        let _section = self.priority.enter();
        f()
    }

    fn escaped(&self, reason: EscapeReason, ceiling: u64, load: u64) -> u64 {
        bump(&self.stats.escapes);
        self.log(ActivityEvent::IdleEscaped {
            reason,
            ceiling,
            load,
        });
        load
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

impl fmt::Debug for IdleCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleCoordinator")
            .field("meter", &self.meter)
            .field("priority", &self.priority.in_flight())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
