//! Idle regions, priority sections, and the wait loop that couples them.

pub mod context;
pub mod coordinator;
pub mod escape;
pub mod priority;
