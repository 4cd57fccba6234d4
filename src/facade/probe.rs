//! Raw existence probes.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

/// Answers "does this path exist right now?" without consulting any cache.
pub trait ExistenceProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// Asks the filesystem. Errors (permission denied, broken parents) read as absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl ExistenceProbe for FsProbe {
    fn exists(&self, path: &Path) -> bool {
        path.try_exists().unwrap_or(false)
    }
}

/// In-memory file set with optional artificial latency, for simulations and tests.
#[derive(Debug, Default)]
pub struct MemoryProbe {
    files: RwLock<HashSet<PathBuf>>,
    latency: Duration,
}

impl MemoryProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            files: RwLock::new(HashSet::new()),
            latency,
        }
    }

    pub fn create(&self, path: impl Into<PathBuf>) {
        self.files.write().insert(path.into());
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files.write().remove(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl ExistenceProbe for MemoryProbe {
    fn exists(&self, path: &Path) -> bool {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        self.files.read().contains(path)
    }
}
