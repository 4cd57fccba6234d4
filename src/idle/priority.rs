//! In-flight priority operations that hold every idle waiter back.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::monitor::load_meter::LoadMeter;

/// Count of priority operations currently running.
#[derive(Debug)]
pub struct PriorityCounter {
    in_flight: AtomicUsize,
    meter: Arc<LoadMeter>,
}

impl PriorityCounter {
    #[must_use]
    pub const fn new(meter: Arc<LoadMeter>) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            meter,
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Mark a priority operation as running until the guard drops.
    #[must_use = "the priority section ends when the guard is dropped"]
    pub fn enter(&self) -> PriorityGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        PriorityGuard { counter: self }
    }
}

/// Decrements the counter on drop, including during unwinding.
#[derive(Debug)]
pub struct PriorityGuard<'a> {
    counter: &'a PriorityCounter,
}

impl Drop for PriorityGuard<'_> {
    fn drop(&mut self) {
        let previous = self.counter.in_flight.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 {
            self.counter.meter.wake_all();
        }
    }
}
