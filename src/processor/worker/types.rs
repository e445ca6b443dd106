use crate::records::record::{MessageRef, WorkItem};
use std::collections::VecDeque;
use tokio::sync::mpsc;

use super::shared::InFlightGuard;

/// Capacity of a worker's private inbox: exactly one assignment at a time.
pub(crate) const INBOX_CAPACITY: usize = 1;

/// Move-only token representing one idle worker. Whoever holds it may hand
/// that worker exactly one item; dropping it retires the worker by closing its
/// inbox.
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    inbox: mpsc::Sender<Assignment>,
}

impl WorkerHandle {
    pub(crate) fn new(id: usize, inbox: mpsc::Sender<Assignment>) -> Self {
        Self { id, inbox }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Delivers `item` to the worker, moving this handle back to it.
    pub(crate) async fn assign(
        self,
        item: WorkItem,
        attempt: u32,
        guard: InFlightGuard,
    ) -> Result<(), Assignment> {
        let inbox = self.inbox.clone();
        let assignment = Assignment {
            item,
            attempt,
            guard,
            handle: self,
        };
        inbox.send(assignment).await.map_err(|err| err.0)
    }
}

/// A work item in transit to a worker, together with that worker's handle
/// and the guard that keeps the item counted as in flight.
#[derive(Debug)]
pub struct Assignment {
    pub(crate) item: WorkItem,
    pub(crate) attempt: u32,
    pub(crate) guard: InFlightGuard,
    pub(crate) handle: WorkerHandle,
}

impl Assignment {
    pub fn item(&self) -> &WorkItem {
        &self.item
    }
}

pub(crate) type InboxReceiver = mpsc::Receiver<Assignment>;

pub(crate) fn worker_inbox(id: usize) -> (WorkerHandle, InboxReceiver) {
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    (WorkerHandle::new(id, tx), rx)
}

/// Finite, closed sequence of items fed to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
}

impl WorkQueue {
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter().map(WorkItem::new).collect()
    }

    pub fn from_refs(refs: &[MessageRef]) -> Self {
        refs.iter().map(WorkItem::from).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }
}

impl FromIterator<WorkItem> for WorkQueue {
    fn from_iter<T: IntoIterator<Item = WorkItem>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Per-worker counters returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub published: usize,
    pub failures: usize,
    pub handoffs: usize,
}

pub(super) enum HandOffOutcome {
    Delivered { peer: usize },
    Retained,
    Cancelled,
}
