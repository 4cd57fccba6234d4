//! Per-worker idle context: ceiling, on-sleep hook, and cancel flag.
//!
//! A context is an explicit value handed down the call chain. Entering an idle
//! region derives a child; the parent is never modified, so leaving the region
//! (normally, with an error, or by unwinding) leaves the caller exactly as it was.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Callback invoked each time an idle waiter is about to park.
pub type SleepHook = Arc<dyn Fn() + Send + Sync>;

/// Shared "keep going" flag. Idle waits abort once it reads `false`.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    live: Arc<AtomicBool>,
}

impl CancelFlag {
    /// A flag that starts live.
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Ask every holder of this flag to stop waiting.
    pub fn cancel(&self) {
        self.live.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Idle state carried by a worker.
#[derive(Clone, Default)]
pub struct IdleContext {
    ceiling: Option<u64>,
    on_sleep: Option<SleepHook>,
    cancel: Option<CancelFlag>,
}

impl IdleContext {
    /// Context of a worker outside any idle region.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Child context for a nested idle region.
    ///
    /// The effective ceiling is the larger of the current one and `ceiling`:
    /// a nested region tolerates at least as much load as its parent. The hook
    /// and flag are replaced.
    #[must_use]
    pub fn enter(
        &self,
        ceiling: u64,
        on_sleep: Option<SleepHook>,
        cancel: Option<CancelFlag>,
    ) -> Self {
        let ceiling = self.ceiling.map_or(ceiling, |current| current.max(ceiling));
        Self {
            ceiling: Some(ceiling),
            on_sleep,
            cancel,
        }
    }

    /// Same hook and flag, no ceiling.
    #[must_use]
    pub fn without_ceiling(&self) -> Self {
        Self {
            ceiling: None,
            on_sleep: self.on_sleep.clone(),
            cancel: self.cancel.clone(),
        }
    }

    #[must_use]
    pub const fn ceiling(&self) -> Option<u64> {
        self.ceiling
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.ceiling.is_some()
    }

    #[must_use]
    pub fn cancel_flag(&self) -> Option<&CancelFlag> {
        self.cancel.as_ref()
    }

    /// Whether the cancel flag (if any) has been cleared.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| !flag.is_live())
    }

    pub(crate) fn notify_sleep(&self) {
        if let Some(hook) = &self.on_sleep {
            hook();
        }
    }
}

impl fmt::Debug for IdleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleContext")
            .field("ceiling", &self.ceiling)
            .field("on_sleep", &self.on_sleep.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}
