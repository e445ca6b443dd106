use crate::mailbox::client::MessageSource;
use crate::processor::availability::AvailabilitySlot;
use crate::processor::backoff::FailureCooldown;
use crate::records::record::Record;
use crate::runtime::telemetry::Telemetry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// State shared by every worker of one pool run.
#[derive(Clone)]
pub(crate) struct WorkerShared {
    pub(super) source: Arc<dyn MessageSource>,
    pub(super) slot: Arc<AvailabilitySlot>,
    pub(super) telemetry: Arc<Telemetry>,
    pub(super) output: mpsc::Sender<Record>,
    pub(super) cooldown: FailureCooldown,
}

pub(crate) struct WorkerSharedParams {
    pub(crate) source: Arc<dyn MessageSource>,
    pub(crate) slot: Arc<AvailabilitySlot>,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) output: mpsc::Sender<Record>,
    pub(crate) cooldown: FailureCooldown,
}

impl WorkerShared {
    pub(crate) fn new(params: WorkerSharedParams) -> Self {
        Self {
            source: params.source,
            slot: params.slot,
            telemetry: params.telemetry,
            output: params.output,
            cooldown: params.cooldown,
        }
    }
}

/// Counts items that have been dispatched but not yet published, including
/// items bouncing between workers after a failure.
#[derive(Debug, Default)]
pub(crate) struct InFlightTracker {
    outstanding: AtomicUsize,
    notify: Notify,
}

impl InFlightTracker {
    pub(crate) fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            tracker: Arc::clone(self),
        }
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) async fn wait_until_idle(&self) {
        loop {
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }

            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// Keeps one item counted as in flight until dropped.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}
