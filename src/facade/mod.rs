//! Caller-facing service: access hooks, identity, and existence probing.

pub mod identity;
pub mod probe;
pub mod throttle;
