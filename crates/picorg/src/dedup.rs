//! In-memory duplicate index.
//!
//! Maps content fingerprints to the paths that share them. The index is
//! derived state: the per-record fingerprint in the store is authoritative
//! and [`DuplicateIndex::rebuild`] reproduces the live index from it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::db::DatabaseError;
use crate::hash::Fingerprint;
use crate::store::{ImageFilter, ImageIter, MetadataStore};

/// Page size used when streaming fingerprints out of the store.
const REBUILD_PAGE_SIZE: u32 = 500;

/// A set of two or more paths with identical content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    /// Sorted by path.
    pub paths: Vec<PathBuf>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Copies beyond the first.
    pub fn redundant_copies(&self) -> usize {
        self.paths.len().saturating_sub(1)
    }
}

#[derive(Debug, Default)]
struct IndexState {
    /// Paths per fingerprint, in registration order.
    by_fingerprint: HashMap<Fingerprint, Vec<PathBuf>>,
    by_path: HashMap<PathBuf, Fingerprint>,
}

impl IndexState {
    fn remove_path(&mut self, path: &Path) -> Option<Fingerprint> {
        let fingerprint = self.by_path.remove(path)?;
        if let Some(paths) = self.by_fingerprint.get_mut(&fingerprint) {
            paths.retain(|p| p != path);
            if paths.is_empty() {
                self.by_fingerprint.remove(&fingerprint);
            }
        }
        Some(fingerprint)
    }

    fn insert(&mut self, fingerprint: Fingerprint, path: PathBuf) -> bool {
        match self.by_path.get(&path) {
            Some(existing) if *existing == fingerprint => return false,
            Some(_) => {
                self.remove_path(&path);
            }
            None => {}
        }
        self.by_fingerprint
            .entry(fingerprint.clone())
            .or_default()
            .push(path.clone());
        self.by_path.insert(path, fingerprint);
        true
    }
}

/// Thread-safe fingerprint → paths index.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    state: RwLock<IndexState>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Duplicate index lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Duplicate index lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Adds `path` under `fingerprint`.
    ///
    /// Re-registering the same pair is a no-op. A path already registered
    /// under another fingerprint is moved. Returns true if the index changed.
    pub fn register(&self, fingerprint: Fingerprint, path: impl Into<PathBuf>) -> bool {
        self.write().insert(fingerprint, path.into())
    }

    /// Removes `path` from its group. Returns the fingerprint it had.
    pub fn unregister(&self, path: &Path) -> Option<Fingerprint> {
        self.write().remove_path(path)
    }

    /// All groups with at least two members, largest first, ties broken by
    /// first path.
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        let state = self.read();
        let mut groups: Vec<DuplicateGroup> = state
            .by_fingerprint
            .iter()
            .filter(|(_, paths)| paths.len() >= 2)
            .map(|(fingerprint, paths)| {
                let mut paths = paths.clone();
                paths.sort();
                DuplicateGroup {
                    fingerprint: fingerprint.clone(),
                    paths,
                }
            })
            .collect();
        drop(state);

        groups.sort_by(|a, b| {
            b.paths
                .len()
                .cmp(&a.paths.len())
                .then_with(|| a.paths[0].cmp(&b.paths[0]))
        });
        groups
    }

    /// The duplicate group containing `path`, if it has company.
    pub fn group_of(&self, path: &Path) -> Option<DuplicateGroup> {
        let state = self.read();
        let fingerprint = state.by_path.get(path)?;
        let paths = state.by_fingerprint.get(fingerprint)?;
        if paths.len() < 2 {
            return None;
        }
        let mut paths = paths.clone();
        paths.sort();
        Some(DuplicateGroup {
            fingerprint: fingerprint.clone(),
            paths,
        })
    }

    pub fn fingerprint_of(&self, path: &Path) -> Option<Fingerprint> {
        self.read().by_path.get(path).cloned()
    }

    /// Paths registered under `fingerprint`, in registration order.
    pub fn paths_for(&self, fingerprint: &Fingerprint) -> Vec<PathBuf> {
        self.read()
            .by_fingerprint
            .get(fingerprint)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of indexed paths.
    pub fn len(&self) -> usize {
        self.read().by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of paths that belong to some duplicate group.
    pub fn duplicate_count(&self) -> usize {
        self.read()
            .by_fingerprint
            .values()
            .filter(|paths| paths.len() >= 2)
            .map(Vec::len)
            .sum()
    }

    /// Replaces the contents with every (fingerprint, path) pair in `store`.
    ///
    /// Records are read page by page in path order. On error the current
    /// contents are left untouched.
    pub fn rebuild(&self, store: &dyn MetadataStore) -> Result<usize, DatabaseError> {
        let filter = ImageFilter {
            has_fingerprint: Some(true),
            ..ImageFilter::default()
        };

        let mut fresh = IndexState::default();
        for record in ImageIter::new(store, filter, REBUILD_PAGE_SIZE) {
            let record = record?;
            if let Some(fingerprint) = record.fingerprint {
                fresh.insert(fingerprint, record.path);
            }
        }

        let indexed = fresh.by_path.len();
        *self.write() = fresh;
        log::info!("Duplicate index rebuilt with {} path(s)", indexed);
        Ok(indexed)
    }
}
