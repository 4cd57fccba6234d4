#![forbid(unsafe_code)]

//! iothrottle: adaptive idle-I/O throttle with a file-existence hint cache.
//!
//! Two cooperating pieces:
//! 1. **Idle throttle**: background work inside an idle region yields while the
//!    shared, decaying I/O load is above its ceiling or priority work is running
//! 2. **Hint cache**: recent create/delete observations per file, used to
//!    impeach stale existence beliefs after writes and deletes
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use iothrottle::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use iothrottle::core::config::ThrottleConfig;
//! use iothrottle::facade::throttle::{AccessObserver, IoThrottle};
//! ```

pub mod prelude;

#[cfg(feature = "cli")]
pub mod cli;
pub mod core;
pub mod facade;
pub mod hints;
pub mod idle;
pub mod logger;
pub mod monitor;
