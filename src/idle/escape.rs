//! Deadlock-avoidance escape hatches for idle waiters.
//!
//! An idle waiter must not park while its own thread is in a state another
//! thread may be blocked on: running one-time initialization, or holding a
//! lock that priority work needs. The coordinator asks an [`EscapeHatch`]
//! before sleeping; a detected (or undeterminable) state lets the waiter
//! proceed immediately.

#![allow(missing_docs)]

use std::cell::Cell;
use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

/// Outcome of one heuristic probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Clear,
    Detected,
    /// The probe could not decide. Treated like `Detected`.
    Unknown,
}

/// Why an idle wait was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeReason {
    InitInProgress,
    GuardedLockHeld,
    Undetermined,
}

impl EscapeReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitInProgress => "init_in_progress",
            Self::GuardedLockHeld => "guarded_lock_held",
            Self::Undetermined => "undetermined",
        }
    }

    pub(crate) const fn from_detection(detection: Detection, detected: Self) -> Option<Self> {
        match detection {
            Detection::Clear => None,
            Detection::Detected => Some(detected),
            Detection::Unknown => Some(Self::Undetermined),
        }
    }
}

/// Thread-state probes consulted by idle waiters.
pub trait EscapeHatch: Send + Sync {
    /// Is the calling thread inside one-time initialization? Asked once per wait.
    fn init_in_progress(&self) -> Detection;

    /// Does the calling thread hold a lock other work may need? Asked every iteration.
    fn guarded_lock_held(&self) -> Detection;
}

/// Never escapes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEscapeHatch;

impl EscapeHatch for NoEscapeHatch {
    fn init_in_progress(&self) -> Detection {
        Detection::Clear
    }

    fn guarded_lock_held(&self) -> Detection {
        Detection::Clear
    }
}

// ──────────────────── thread state tracking ────────────────────

thread_local! {
    static INIT_DEPTH: Cell<usize> = const { Cell::new(0) };
    static GUARDED_HELD: Cell<usize> = const { Cell::new(0) };
}

/// Reads the per-thread markers maintained by [`InitScope`] and [`GuardedMutex`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadStateEscapeHatch;

fn probe(key: &'static std::thread::LocalKey<Cell<usize>>) -> Detection {
    match key.try_with(Cell::get) {
        Ok(0) => Detection::Clear,
        Ok(_) => Detection::Detected,
        // Thread-local storage already torn down.
        Err(_) => Detection::Unknown,
    }
}

impl EscapeHatch for ThreadStateEscapeHatch {
    fn init_in_progress(&self) -> Detection {
        probe(&INIT_DEPTH)
    }

    fn guarded_lock_held(&self) -> Detection {
        probe(&GUARDED_HELD)
    }
}

fn adjust(key: &'static std::thread::LocalKey<Cell<usize>>, up: bool) {
    let _ = key.try_with(|depth| {
        let next = if up {
            depth.get().saturating_add(1)
        } else {
            depth.get().saturating_sub(1)
        };
        depth.set(next);
    });
}

/// Marks the current thread as running one-time initialization while alive.
#[derive(Debug)]
#[must_use = "initialization is only marked while the scope is alive"]
pub struct InitScope {
    // Thread-local bookkeeping: the scope must drop on the thread that made it.
    _not_send: std::marker::PhantomData<*const ()>,
}

impl InitScope {
    pub fn enter() -> Self {
        adjust(&INIT_DEPTH, true);
        Self {
            _not_send: std::marker::PhantomData,
        }
    }
}

impl Drop for InitScope {
    fn drop(&mut self) {
        adjust(&INIT_DEPTH, false);
    }
}

/// Mutex whose holders are visible to [`ThreadStateEscapeHatch`].
///
/// Use it for locks that priority work may contend on, so an idle waiter
/// holding one never parks.
#[derive(Debug, Default)]
pub struct GuardedMutex<T> {
    inner: Mutex<T>,
}

impl<T> GuardedMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn lock(&self) -> GuardedMutexGuard<'_, T> {
        let guard = self.inner.lock();
        adjust(&GUARDED_HELD, true);
        GuardedMutexGuard { guard }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Lock guard that clears the held marker on drop.
#[derive(Debug)]
pub struct GuardedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for GuardedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for GuardedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for GuardedMutexGuard<'_, T> {
    fn drop(&mut self) {
        adjust(&GUARDED_HELD, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn no_escape_hatch_is_always_clear() {
        assert_eq!(NoEscapeHatch.init_in_progress(), Detection::Clear);
        assert_eq!(NoEscapeHatch.guarded_lock_held(), Detection::Clear);
    }

    #[test]
    fn init_scope_is_visible_while_alive() {
        let hatch = ThreadStateEscapeHatch;
        assert_eq!(hatch.init_in_progress(), Detection::Clear);
        {
            let _outer = InitScope::enter();
            let _inner = InitScope::enter();
            assert_eq!(hatch.init_in_progress(), Detection::Detected);
        }
        assert_eq!(hatch.init_in_progress(), Detection::Clear);
    }

    #[test]
    fn guarded_lock_is_tracked_per_thread() {
        let hatch = ThreadStateEscapeHatch;
        let lock = GuardedMutex::new(5_u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert_eq!(hatch.guarded_lock_held(), Detection::Detected);
            let other = thread::spawn(move || ThreadStateEscapeHatch.guarded_lock_held())
                .join()
                .unwrap();
            assert_eq!(other, Detection::Clear);
        }
        assert_eq!(hatch.guarded_lock_held(), Detection::Clear);
        assert_eq!(lock.into_inner(), 6);
    }

    #[test]
    fn detection_maps_to_reason() {
        assert_eq!(
            EscapeReason::from_detection(Detection::Detected, EscapeReason::InitInProgress),
            Some(EscapeReason::InitInProgress)
        );
        assert_eq!(
            EscapeReason::from_detection(Detection::Unknown, EscapeReason::GuardedLockHeld),
            Some(EscapeReason::Undetermined)
        );
        assert_eq!(
            EscapeReason::from_detection(Detection::Clear, EscapeReason::GuardedLockHeld),
            None
        );
    }
}
