use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::store::CompletionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// A stable video file discovered in the input directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchItem {
    pub path: PathBuf,
    pub discovered_at: DateTime<Utc>,
    pub status: ItemStatus,
}

impl WatchItem {
    fn pending(path: PathBuf) -> Self {
        Self {
            path,
            discovered_at: Utc::now(),
            status: ItemStatus::Pending,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<WatchItem>,
    active: Option<PathBuf>,
    /// Pending and in-progress paths
    tracked: HashSet<PathBuf>,
}

#[derive(Debug, Default)]
struct QueueInner {
    state: Mutex<QueueState>,
    changed: Notify,
}

/// FIFO of discovered videos handing out at most one lease at a time
#[derive(Debug, Clone, Default)]
pub struct WatchQueue {
    inner: Arc<QueueInner>,
}

impl WatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append `path` unless it is already pending or in progress
    pub fn enqueue(&self, path: PathBuf) -> bool {
        {
            let mut state = self.state();
            if !state.tracked.insert(path.clone()) {
                return false;
            }
            debug!("Enqueued {}", path.display());
            state.pending.push_back(WatchItem::pending(path));
        }
        self.inner.changed.notify_waiters();
        true
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.state().tracked.contains(path)
    }

    /// Number of items waiting behind the active one
    pub fn depth(&self) -> usize {
        self.state().pending.len()
    }

    pub fn active(&self) -> Option<PathBuf> {
        self.state().active.clone()
    }

    /// Take the head item if no other lease is outstanding
    pub fn try_next(&self) -> Option<Lease> {
        let mut state = self.state();
        if state.active.is_some() {
            return None;
        }
        let mut item = state.pending.pop_front()?;
        item.status = ItemStatus::InProgress;
        state.active = Some(item.path.clone());

        Some(Lease {
            queue: self.clone(),
            item,
            finished: false,
        })
    }

    /// Wait for the head item and the single-flight slot
    ///
    /// Cancel safe: dropping the future before it resolves leaves the queue unchanged.
    pub async fn next(&self) -> Lease {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent notify_waiters is not lost
            notified.as_mut().enable();

            if let Some(lease) = self.try_next() {
                return lease;
            }
            notified.await;
        }
    }

    fn release(&self, path: &Path) {
        {
            let mut state = self.state();
            state.active = None;
            state.tracked.remove(path);
        }
        self.inner.changed.notify_waiters();
    }

    fn requeue_front(&self, mut item: WatchItem) {
        {
            let mut state = self.state();
            state.active = None;
            item.status = ItemStatus::Pending;
            state.pending.push_front(item);
        }
        self.inner.changed.notify_waiters();
    }
}

/// Exclusive handle on the in-progress item
///
/// Dropping an unfinished lease puts the item back at the head of the queue.
#[derive(Debug)]
pub struct Lease {
    queue: WatchQueue,
    item: WatchItem,
    finished: bool,
}

impl Lease {
    pub fn item(&self) -> &WatchItem {
        &self.item
    }

    pub fn path(&self) -> &Path {
        &self.item.path
    }

    /// Record the terminal status, then free the single-flight slot
    pub fn complete(mut self, status: ItemStatus, store: &CompletionStore) {
        let status = if status.is_terminal() {
            status
        } else {
            warn!("Lease for {} completed as {:?}, recording Failed", self.item.path.display(), status);
            ItemStatus::Failed
        };

        store.record(&self.item.path, status);
        self.item.status = status;
        self.finished = true;
        self.queue.release(&self.item.path);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("Lease for {} dropped, requeueing", self.item.path.display());
        self.queue.requeue_front(self.item.clone());
    }
}
