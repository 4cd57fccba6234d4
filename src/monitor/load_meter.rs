//! Decaying I/O load estimate shared by every observed access.
//!
//! A single integer is bumped by each observed filesystem touch and halved once
//! per tick, giving a cheap exponential proxy for recent I/O pressure without
//! per-event timestamps. Idle waiters park on the meter's condition variable and
//! are woken whenever a decay step actually lowers the load.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::monitor::clock::Clock;

#[derive(Debug, Clone, Copy)]
struct MeterState {
    load: u64,
    last_decay: Instant,
}

/// Shared decaying load counter with a wake-up monitor for idle waiters.
pub struct LoadMeter {
    clock: Arc<dyn Clock>,
    tick: Duration,
    state: Mutex<MeterState>,
    changed: Condvar,
}

impl LoadMeter {
    /// Create a meter with zero load whose decay clock starts now.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, tick: Duration) -> Self {
        let now = clock.now();
        Self {
            clock,
            tick,
            state: Mutex::new(MeterState {
                load: 0,
                last_decay: now,
            }),
            changed: Condvar::new(),
        }
    }

    /// Decay, then add `weight` and return the resulting load.
    pub fn add(&self, weight: u64) -> u64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let halved = decay(&mut state, now, self.tick);
        state.load = state.load.saturating_add(weight);
        let load = state.load;
        if halved {
            self.changed.notify_all();
        }
        load
    }

    /// Decay, then return the load without adding anything.
    pub fn peek(&self) -> u64 {
        self.add(0)
    }

    /// Length of one decay tick.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        self.tick
    }

    /// Park the calling thread until the load changes or `timeout` elapses.
    pub(crate) fn wait_for_change(&self, timeout: Duration) {
        let mut state = self.state.lock();
        let _ = self.changed.wait_for(&mut state, timeout);
    }

    /// Wake every parked waiter so it re-evaluates its exit condition.
    pub(crate) fn wake_all(&self) {
        let _guard = self.state.lock();
        self.changed.notify_all();
    }
}

impl fmt::Debug for LoadMeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state.lock();
        f.debug_struct("LoadMeter")
            .field("tick", &self.tick)
            .field("load", &state.load)
            .field("last_decay", &state.last_decay)
            .finish_non_exhaustive()
    }
}

/// Halve `load` once per elapsed tick. Returns whether a non-zero load was lowered.
///
/// Once the load reaches zero the decay clock jumps to `now + tick` instead of
/// replaying the remaining ticks, bounding catch-up work after long quiet periods.
fn decay(state: &mut MeterState, now: Instant, tick: Duration) -> bool {
    let mut halved = false;
    while state.last_decay < now {
        state.last_decay += tick;
        if state.load > 0 {
            halved = true;
        }
        state.load /= 2;
        if state.load == 0 {
            state.last_decay = now + tick;
            break;
        }
    }
    halved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::clock::ManualClock;
    use proptest::prelude::*;
    use std::thread;

    const TICK: Duration = Duration::from_millis(100);

    fn manual_meter() -> (LoadMeter, ManualClock) {
        let clock = ManualClock::new();
        (LoadMeter::new(Arc::new(clock.clone()), TICK), clock)
    }

    #[test]
    fn add_accumulates_within_one_tick() {
        let (meter, _clock) = manual_meter();
        assert_eq!(meter.add(1), 1);
        assert_eq!(meter.add(2), 3);
        assert_eq!(meter.peek(), 3);
    }

    #[test]
    fn load_halves_per_tick() {
        let (meter, clock) = manual_meter();
        meter.add(100);
        clock.advance(TICK);
        assert_eq!(meter.peek(), 50);
        clock.advance(TICK * 2);
        assert_eq!(meter.peek(), 12);
    }

    #[test]
    fn partial_tick_rounds_up_to_a_full_halving() {
        let (meter, clock) = manual_meter();
        meter.add(64);
        clock.advance(Duration::from_millis(150));
        assert_eq!(meter.peek(), 16);
        // The decay clock is now ahead of real time; nothing more until it is passed.
        clock.advance(Duration::from_millis(40));
        assert_eq!(meter.peek(), 16);
    }

    #[test]
    fn reaching_zero_snaps_decay_clock_forward() {
        let (meter, clock) = manual_meter();
        meter.add(1);
        clock.advance(Duration::from_secs(3_600));
        assert_eq!(meter.peek(), 0);

        // Fresh load survives a full tick after the snap, then decays normally.
        meter.add(8);
        clock.advance(TICK);
        assert_eq!(meter.peek(), 8);
        clock.advance(TICK);
        assert_eq!(meter.peek(), 4);
    }

    #[test]
    fn add_saturates_instead_of_overflowing() {
        let (meter, _clock) = manual_meter();
        meter.add(u64::MAX);
        assert_eq!(meter.add(5), u64::MAX);
    }

    #[test]
    fn decay_reports_only_real_halvings() {
        let start = Instant::now();
        let mut idle = MeterState {
            load: 0,
            last_decay: start,
        };
        assert!(!decay(&mut idle, start + TICK * 3, TICK));

        let mut busy = MeterState {
            load: 9,
            last_decay: start,
        };
        assert!(decay(&mut busy, start + TICK, TICK));
        assert_eq!(busy.load, 4);
    }

    #[test]
    fn decay_wakes_parked_waiter() {
        let clock = ManualClock::new();
        let meter = Arc::new(LoadMeter::new(Arc::new(clock.clone()), TICK));
        meter.add(10);

        let waiter = {
            let meter = Arc::clone(&meter);
            thread::spawn(move || {
                let started = Instant::now();
                meter.wait_for_change(Duration::from_secs(10));
                started.elapsed()
            })
        };

        // Keep nudging until the waiter is parked and sees the halving.
        let mut load = 10;
        while !waiter.is_finished() {
            thread::sleep(Duration::from_millis(20));
            clock.advance(TICK);
            load = meter.add(load.max(2));
        }
        let waited = waiter.join().expect("waiter thread");
        assert!(waited < Duration::from_secs(10), "waiter timed out: {waited:?}");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Pure time advance never raises the load, and enough of it drains to zero.
        #[test]
        fn decay_is_monotone_and_drains(
            weights in prop::collection::vec(0u64..1_000, 1..50),
            ticks in 1u32..5,
        ) {
            let (meter, clock) = manual_meter();
            for w in &weights {
                meter.add(*w);
            }
            let before = meter.peek();
            clock.advance(TICK * ticks);
            let after = meter.peek();
            prop_assert!(after <= before);

            let mut last = after;
            for _ in 0..70 {
                clock.advance(TICK);
                let now = meter.peek();
                prop_assert!(now <= last);
                last = now;
            }
            prop_assert_eq!(last, 0);
        }
    }
}
