//! Bounded FIFO of idle worker handles.
//!
//! A handle is present here iff its worker is idle. Acquiring a handle is the
//! only way to hand a worker an item, so the slot doubles as the admission
//! control for the pool: at most `capacity` items are processed concurrently.

use crate::processor::worker::WorkerHandle;
use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub struct AvailabilitySlot {
    capacity: usize,
    idle: Mutex<VecDeque<WorkerHandle>>,
    permits: Semaphore,
}

impl AvailabilitySlot {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            permits: Semaphore::new(0),
        }
    }

    /// Registers an idle worker.
    pub fn release(&self, handle: WorkerHandle) -> Result<()> {
        {
            let mut idle = self.idle.lock().expect("availability slot mutex poisoned");
            if idle.len() >= self.capacity {
                bail!(
                    "availability slot full ({} handles); worker {} registered twice",
                    self.capacity,
                    handle.id()
                );
            }
            idle.push_back(handle);
        }
        self.permits.add_permits(1);
        Ok(())
    }

    /// Takes the longest-idle worker, waiting until one registers. Returns
    /// `None` once `shutdown` is cancelled.
    pub async fn acquire(&self, shutdown: &CancellationToken) -> Option<WorkerHandle> {
        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return None,
            permit = self.permits.acquire() => permit.ok()?,
        };
        permit.forget();
        self.pop()
    }

    /// Takes the longest-idle worker without waiting.
    pub fn try_acquire(&self) -> Option<WorkerHandle> {
        let permit = self.permits.try_acquire().ok()?;
        permit.forget();
        self.pop()
    }

    /// Number of handles currently waiting in the slot.
    pub(crate) fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    fn pop(&self) -> Option<WorkerHandle> {
        self.idle
            .lock()
            .expect("availability slot mutex poisoned")
            .pop_front()
    }
}
