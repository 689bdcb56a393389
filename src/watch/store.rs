use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use super::queue::ItemStatus;

/// Terminal handling of one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    pub status: ItemStatus,
    pub completed_at: SystemTime,
}

/// Paths handled to Done or Failed during this process lifetime
///
/// Shared between the poller, which consults it before enqueueing, and the
/// completion handler, which records each finished lease.
#[derive(Debug, Clone, Default)]
pub struct CompletionStore {
    inner: Arc<RwLock<HashMap<PathBuf, CompletionRecord>>>,
}

impl CompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, CompletionRecord>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, CompletionRecord>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, path: &Path, status: ItemStatus) {
        self.record_at(path, status, SystemTime::now());
    }

    pub fn record_at(&self, path: &Path, status: ItemStatus, completed_at: SystemTime) {
        self.write().insert(
            path.to_path_buf(),
            CompletionRecord {
                status,
                completed_at,
            },
        );
    }

    pub fn get(&self, path: &Path) -> Option<CompletionRecord> {
        self.read().get(path).copied()
    }

    /// Skip a completed path unless it was modified after completion
    pub fn should_skip(&self, path: &Path, modified: Option<SystemTime>) -> bool {
        match (self.get(path), modified) {
            (None, _) => false,
            (Some(record), Some(modified)) => modified <= record.completed_at,
            (Some(_), None) => true,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
