//! Per-path mutual exclusion for the ingestion pipeline.
//!
//! Two imports (or an import and a retry) may reach the same file at the
//! same time. Everything between reading a record and writing it back runs
//! under that path's guard, so pipeline writes for one path never
//! interleave.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};

use tracing::{trace, warn};

#[derive(Default)]
pub struct PathLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no other guard for `path` is alive.
    pub fn lock(&self, path: &Path) -> PathGuard<'_> {
        let mut held = self.held();
        while held.contains(path) {
            trace!("Waiting for {}", path.display());
            held = self.released.wait(held).unwrap_or_else(|poisoned| {
                warn!("Path lock table was poisoned, recovering");
                poisoned.into_inner()
            });
        }
        held.insert(path.to_path_buf());
        PathGuard {
            locks: self,
            path: path.to_path_buf(),
        }
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        self.held().contains(path)
    }

    fn held(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.held.lock().unwrap_or_else(|poisoned| {
            warn!("Path lock table was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[must_use = "the path is unlocked as soon as the guard is dropped"]
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    path: PathBuf,
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.path);
        self.locks.released.notify_all();
    }
}
