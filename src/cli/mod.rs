//! CLI support shared by the `iothrottle` binary: workload simulation and signal handling.
#![allow(missing_docs)]

pub mod signals;
pub mod simulate;
