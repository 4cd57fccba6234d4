//! Activity logger: a dedicated thread owns the `JsonlWriter`.
//!
//! Throttle components send `ActivityEvent`s through a bounded crossbeam channel.
//! `send()` uses `try_send()` so an idle waiter or an access hook is never
//! blocked by logging back-pressure; overflow is counted and reported later.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, ThrottleError};
use crate::hints::cache::EvictionReason;
use crate::idle::escape::EscapeReason;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Events recorded in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ThrottleStarted {
        version: String,
        config_hash: String,
    },
    ThrottleStopped {
        reason: String,
        uptime_secs: u64,
    },
    CacheCleared {
        reason: EvictionReason,
        entries: usize,
    },
    SlowProbe {
        path: String,
        file_id: u64,
        duration_ms: u64,
    },
    IdleCancelled {
        ceiling: u64,
        load: u64,
    },
    IdleEscaped {
        reason: EscapeReason,
        ceiling: u64,
        load: u64,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable, non-blocking handle to the logger thread.
#[derive(Debug, Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event. Drops (and counts) it when the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Ask the logger thread to flush and stop.
    pub fn shutdown(&self) -> Result<()> {
        self.tx
            .send(ActivityEvent::Shutdown)
            .map_err(|_| ThrottleError::ChannelClosed {
                component: "activity-logger",
            })
    }
}

/// Spawn the logger thread and return its handle and join handle.
pub fn spawn_logger(
    config: JsonlConfig,
    channel_capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(channel_capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("iot-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped_clone))
        .map_err(|e| ThrottleError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.flush();
    jsonl.fsync();
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ThrottleStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::ThrottleStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e
        }
        ActivityEvent::ThrottleStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::ThrottleStop, Severity::Info);
            e.reason = Some(reason.clone());
            e.details = Some(format!("uptime={uptime_secs}s"));
            e
        }
        ActivityEvent::CacheCleared { reason, entries } => {
            let severity = match reason {
                EvictionReason::HardCeiling => Severity::Warning,
                EvictionReason::SoftCeiling => Severity::Info,
            };
            let mut e = LogEntry::new(EventType::CacheClear, severity);
            e.reason = Some(reason.as_str().to_string());
            e.entries = Some(*entries as u64);
            e
        }
        ActivityEvent::SlowProbe {
            path,
            file_id,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::SlowProbe, Severity::Warning);
            e.path = Some(path.clone());
            e.file_id = Some(*file_id);
            e.duration_ms = Some(*duration_ms);
            e
        }
        ActivityEvent::IdleCancelled { ceiling, load } => {
            let mut e = LogEntry::new(EventType::IdleCancel, Severity::Info);
            e.ceiling = Some(*ceiling);
            e.load = Some(*load);
            e
        }
        ActivityEvent::IdleEscaped {
            reason,
            ceiling,
            load,
        } => {
            let mut e = LogEntry::new(EventType::IdleEscape, Severity::Info);
            e.reason = Some(reason.as_str().to_string());
            e.ceiling = Some(*ceiling);
            e.load = Some(*load);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::ThrottleStop, Severity::Info),
    }
}
