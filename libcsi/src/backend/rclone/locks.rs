//! Per-target-path serialisation of node operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes keyed by target path.  Entries exist only while some call
/// holds or waits for them.
#[derive(Debug, Default)]
pub struct TargetLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other call works on `path`.
    pub async fn lock(&self, path: &Path) -> TargetGuard<'_> {
        let mutex = Arc::clone(self.locks.entry(path.to_path_buf()).or_default().value());
        let guard = mutex.lock_owned().await;
        TargetGuard {
            locks: &self.locks,
            path: path.to_path_buf(),
            guard: Some(guard),
        }
    }

    /// Number of paths currently locked or contended.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of one publish/unpublish call.
pub struct TargetGuard<'a> {
    locks: &'a DashMap<PathBuf, Arc<Mutex<()>>>,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so a count of one means nobody
        // else needs the entry.  `entry()` and `remove_if` share the shard
        // lock, so no new waiter can slip in between.
        self.locks
            .remove_if(&self.path, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
