//! SIGTERM/SIGINT handling for long-running CLI commands.
//!
//! Uses `signal-hook` to raise a stop flag; the command loop polls it and
//! cancels idle workers through their [`CancelFlag`].

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::idle::context::CancelFlag;

/// Stop request raised by SIGINT/SIGTERM or programmatically.
#[derive(Debug, Clone)]
pub struct StopSignal {
    stop_flag: Arc<AtomicBool>,
}

impl StopSignal {
    /// Register SIGINT and SIGTERM. Failures are reported but not fatal.
    #[must_use]
    pub fn register() -> Self {
        let signal = Self::detached();
        for (sig, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(sig, Arc::clone(&signal.stop_flag)) {
                eprintln!("[IOT-SIGNAL] failed to register {name}: {e}");
            }
        }
        signal
    }

    /// A stop flag with no OS signals attached.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Cancel `flag` if a stop was requested. Returns whether it was.
    pub fn propagate_to(&self, flag: &CancelFlag) -> bool {
        let stop = self.should_stop();
        if stop {
            flag.cancel();
        }
        stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_stop_cancels_idle_flag() {
        let signal = StopSignal::detached();
        let flag = CancelFlag::new();
        assert!(!signal.propagate_to(&flag));
        assert!(flag.is_live());

        signal.clone().request_stop();
        assert!(signal.propagate_to(&flag));
        assert!(!flag.is_live());
    }
}
