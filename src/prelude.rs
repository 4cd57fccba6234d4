//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use iothrottle::prelude::*;
//! ```

// Core
pub use crate::core::config::ThrottleConfig;
pub use crate::core::errors::{Result, ThrottleError};

// Facade
pub use crate::facade::identity::{IdentityService, PathHashIdentity};
pub use crate::facade::probe::{ExistenceProbe, FsProbe, MemoryProbe};
pub use crate::facade::throttle::{AccessObserver, IoThrottle, IoThrottleBuilder};

// Hints
pub use crate::hints::cache::{FileId, Hint};

// Idle
pub use crate::idle::context::{CancelFlag, IdleContext, SleepHook};
pub use crate::idle::escape::{
    Detection, EscapeHatch, GuardedMutex, InitScope, NoEscapeHatch, ThreadStateEscapeHatch,
};

// Monitor
pub use crate::monitor::clock::{Clock, ManualClock, MonotonicClock};
pub use crate::monitor::stats::StatsSnapshot;
