//! Load sensing: time sources, the decaying load meter, and cumulative counters.

pub mod clock;
pub mod load_meter;
pub mod stats;
