//! Cumulative throttle counters and their serializable snapshot.
//!
//! Counters are plain relaxed atomics: they feed reports and the CLI, never
//! control flow, so no ordering with other state is required.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters shared by the meter, cache, and coordinator.
#[derive(Debug, Default)]
pub struct ThrottleStats {
    pub(crate) pings: AtomicU64,
    pub(crate) load_added: AtomicU64,
    pub(crate) idle_waits: AtomicU64,
    pub(crate) idle_sleeps: AtomicU64,
    pub(crate) cancellations: AtomicU64,
    pub(crate) escapes: AtomicU64,
    pub(crate) hints_recorded: AtomicU64,
    pub(crate) ambiguous_merges: AtomicU64,
    pub(crate) hints_consumed: AtomicU64,
    pub(crate) impeachments: AtomicU64,
    pub(crate) hard_evictions: AtomicU64,
    pub(crate) soft_evictions: AtomicU64,
    pub(crate) existence_probes: AtomicU64,
    pub(crate) slow_probes: AtomicU64,
    pub(crate) priority_sections: AtomicU64,
}

/// Point-in-time copy of [`ThrottleStats`] plus live gauges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSnapshot {
    pub load: u64,
    pub priority_in_flight: u64,
    pub cached_hints: u64,
    pub pings: u64,
    pub load_added: u64,
    pub idle_waits: u64,
    pub idle_sleeps: u64,
    pub cancellations: u64,
    pub escapes: u64,
    pub hints_recorded: u64,
    pub ambiguous_merges: u64,
    pub hints_consumed: u64,
    pub impeachments: u64,
    pub hard_evictions: u64,
    pub soft_evictions: u64,
    pub existence_probes: u64,
    pub slow_probes: u64,
    pub priority_sections: u64,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub(crate) fn bump_by(counter: &AtomicU64, amount: u64) {
    counter.fetch_add(amount, Ordering::Relaxed);
}

impl ThrottleStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy every counter; gauges are supplied by the owner.
    #[must_use]
    pub fn snapshot(&self, load: u64, priority_in_flight: u64, cached_hints: u64) -> StatsSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            load,
            priority_in_flight,
            cached_hints,
            pings: read(&self.pings),
            load_added: read(&self.load_added),
            idle_waits: read(&self.idle_waits),
            idle_sleeps: read(&self.idle_sleeps),
            cancellations: read(&self.cancellations),
            escapes: read(&self.escapes),
            hints_recorded: read(&self.hints_recorded),
            ambiguous_merges: read(&self.ambiguous_merges),
            hints_consumed: read(&self.hints_consumed),
            impeachments: read(&self.impeachments),
            hard_evictions: read(&self.hard_evictions),
            soft_evictions: read(&self.soft_evictions),
            existence_probes: read(&self.existence_probes),
            slow_probes: read(&self.slow_probes),
            priority_sections: read(&self.priority_sections),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps_and_gauges() {
        let stats = ThrottleStats::new();
        bump(&stats.pings);
        bump(&stats.pings);
        bump_by(&stats.load_added, 7);
        bump(&stats.cancellations);

        let snap = stats.snapshot(3, 1, 12);
        assert_eq!(snap.pings, 2);
        assert_eq!(snap.load_added, 7);
        assert_eq!(snap.cancellations, 1);
        assert_eq!(snap.load, 3);
        assert_eq!(snap.priority_in_flight, 1);
        assert_eq!(snap.cached_hints, 12);
        assert_eq!(snap.escapes, 0);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snap = ThrottleStats::new().snapshot(0, 0, 0);
        let json = serde_json::to_string(&snap).expect("serialize snapshot");
        assert!(json.contains("\"idle_waits\":0"));
        let back: StatsSnapshot = serde_json::from_str(&json).expect("deserialize snapshot");
        assert_eq!(back, snap);
    }
}
