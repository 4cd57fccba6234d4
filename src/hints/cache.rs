//! File-existence hint cache: recent create/delete observations per file identity.
//!
//! Entries are ephemeral. They are inserted by observed writes and deletes,
//! consumed (read-and-removed) when a caller reconciles a cached existence
//! belief, and dropped en masse by eviction:
//!
//! - **Hard ceiling**: a cache larger than `hard_ceiling` is cleared on the next insert.
//! - **Soft ceiling**: on the removal path, at most once per `shrink_interval`, a
//!   cache larger than `soft_ceiling` is cleared. Every recorded hint pushes the
//!   next soft sweep back, so write bursts suppress it.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::CacheConfig;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::monitor::clock::Clock;
use crate::monitor::stats::{ThrottleStats, bump};

/// Stable integer identity of a canonical file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Most recent belief about a file's existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    Created,
    Deleted,
    /// Conflicting observations; existence must be treated as unknown.
    Ambiguous,
}

impl Hint {
    /// Hint for a single observation of `exists`.
    #[must_use]
    pub const fn observed(exists: bool) -> Self {
        if exists { Self::Created } else { Self::Deleted }
    }

    /// The existence this hint asserts, or `None` when ambiguous.
    #[must_use]
    pub const fn exists(self) -> Option<bool> {
        match self {
            Self::Created => Some(true),
            Self::Deleted => Some(false),
            Self::Ambiguous => None,
        }
    }
}

/// Why the cache was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    HardCeiling,
    SoftCeiling,
}

impl EvictionReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HardCeiling => "hard_ceiling",
            Self::SoftCeiling => "soft_ceiling",
        }
    }
}

/// Concurrent id → hint map with size- and time-triggered eviction.
pub struct HintCache {
    entries: DashMap<FileId, Hint>,
    clock: Arc<dyn Clock>,
    hard_ceiling: usize,
    soft_ceiling: usize,
    shrink_interval: Duration,
    last_shrink: Mutex<Instant>,
    stats: Arc<ThrottleStats>,
    logger: Option<ActivityLoggerHandle>,
}

impl HintCache {
    #[must_use]
    pub fn new(
        config: &CacheConfig,
        clock: Arc<dyn Clock>,
        stats: Arc<ThrottleStats>,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        let now = clock.now();
        Self {
            entries: DashMap::new(),
            clock,
            hard_ceiling: config.hard_ceiling,
            soft_ceiling: config.soft_ceiling,
            shrink_interval: config.shrink_interval(),
            last_shrink: Mutex::new(now),
            stats,
            logger,
        }
    }

    /// Record a create (`created = true`) or delete observation for `id`.
    ///
    /// A conflicting observation on an existing entry turns it `Ambiguous`;
    /// repeating the same observation leaves it unchanged. Returns the stored hint.
    pub fn insert(&self, id: FileId, created: bool) -> Hint {
        self.enforce_hard_ceiling();

        let observed = Hint::observed(created);
        let stored = match self.entries.entry(id) {
            Entry::Vacant(vacant) => {
                vacant.insert(observed);
                observed
            }
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                if current != observed && current != Hint::Ambiguous {
                    occupied.insert(Hint::Ambiguous);
                    bump(&self.stats.ambiguous_merges);
                    Hint::Ambiguous
                } else {
                    current
                }
            }
        };

        *self.last_shrink.lock() = self.clock.now();
        bump(&self.stats.hints_recorded);
        stored
    }

    /// Remove and return the hint for `id`, running the periodic soft sweep first.
    pub fn consume(&self, id: FileId) -> Option<Hint> {
        self.maybe_soft_shrink();
        let removed = self.entries.remove(&id).map(|(_, hint)| hint);
        if removed.is_some() {
            bump(&self.stats.hints_consumed);
        }
        removed
    }

    /// Whether a cached belief that the file exists (`expected_exists`) must be dropped.
    ///
    /// Consumes the hint. No hint → `false`; ambiguous → `true`; otherwise the
    /// belief is impeached when it disagrees with the hint.
    pub fn impeach_existence(&self, id: FileId, expected_exists: bool) -> bool {
        let impeached = match self.consume(id) {
            None => false,
            Some(hint) => hint.exists().is_none_or(|exists| exists != expected_exists),
        };
        if impeached {
            bump(&self.stats.impeachments);
        }
        impeached
    }

    /// Overwrite the entry for `id` with a fresh existence observation.
    ///
    /// Unlike [`insert`](Self::insert) this never merges into `Ambiguous`: a
    /// direct observation replaces whatever was recorded before.
    pub fn replace(&self, id: FileId, exists: bool) {
        self.enforce_hard_ceiling();
        self.entries.remove(&id);
        self.entries.insert(id, Hint::observed(exists));
    }

    /// Current hint for `id` without consuming it.
    #[must_use]
    pub fn peek(&self, id: FileId) -> Option<Hint> {
        self.entries.get(&id).map(|entry| *entry.value())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn enforce_hard_ceiling(&self) {
        let size = self.entries.len();
        if size > self.hard_ceiling {
            self.clear(EvictionReason::HardCeiling, size);
        }
    }

    fn maybe_soft_shrink(&self) {
        let now = self.clock.now();
        let due = {
            let mut last = self.last_shrink.lock();
            let due = now.saturating_duration_since(*last) > self.shrink_interval;
            *last = now;
            due
        };
        if due {
            let size = self.entries.len();
            if size > self.soft_ceiling {
                self.clear(EvictionReason::SoftCeiling, size);
            }
        }
    }

    fn clear(&self, reason: EvictionReason, size: usize) {
        self.entries.clear();
        match reason {
            EvictionReason::HardCeiling => bump(&self.stats.hard_evictions),
            EvictionReason::SoftCeiling => bump(&self.stats.soft_evictions),
        }
        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::CacheCleared {
                reason,
                entries: size,
            });
        }
    }
}

impl fmt::Debug for HintCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HintCache")
            .field("len", &self.entries.len())
            .field("hard_ceiling", &self.hard_ceiling)
            .field("soft_ceiling", &self.soft_ceiling)
            .field("shrink_interval", &self.shrink_interval)
            .finish_non_exhaustive()
    }
}
