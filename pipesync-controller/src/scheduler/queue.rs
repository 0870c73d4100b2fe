//! Work queue
//!
//! Deduplicating FIFO of resource keys. A key handed to a worker is not handed
//! out again until that worker calls [`WorkQueue::done`]; adds in between are
//! folded into one re-run.

use parking_lot::Mutex;
use pipesync_core::{NamespaceName, ResourceKind};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One unit of reconcile work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub kind: ResourceKind,
    pub key: NamespaceName,
}

impl WorkItem {
    pub fn new(kind: ResourceKind, key: NamespaceName) -> Self {
        Self { kind, key }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.key)
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<WorkItem>,
    /// Items in `pending`
    queued: HashSet<WorkItem>,
    /// Items currently held by a worker
    active: HashSet<WorkItem>,
    /// Active items added again while being processed
    dirty: HashSet<WorkItem>,
    shut_down: bool,
}

impl QueueState {
    fn enqueue(&mut self, item: WorkItem) -> bool {
        if self.shut_down || self.queued.contains(&item) {
            return false;
        }
        if self.active.contains(&item) {
            self.dirty.insert(item);
            return false;
        }
        self.queued.insert(item.clone());
        self.pending.push_back(item);
        true
    }
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, item: WorkItem) {
        if self.state.lock().enqueue(item) {
            self.notify.notify_one();
        }
    }

    /// Adds `item` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, item: WorkItem, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Waits for the next item; `None` once the queue is shut down and drained
    pub async fn next(&self) -> Option<WorkItem> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if let Some(item) = state.pending.pop_front() {
                    state.queued.remove(&item);
                    state.active.insert(item.clone());
                    return Some(item);
                }
                if state.shut_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Releases `item`; a re-add that arrived meanwhile is queued now
    pub fn done(&self, item: &WorkItem) {
        let mut state = self.state.lock();
        state.active.remove(item);
        if state.dirty.remove(item) && state.enqueue(item.clone()) {
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops accepting items and wakes every waiting worker
    pub fn shutdown(&self) {
        self.state.lock().shut_down = true;
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
