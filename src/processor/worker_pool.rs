//! Pool manager: spawns the workers, runs the dispatch loop, and owns the
//! shutdown protocol.
//!
//! The dispatcher hands every queued item to an idle worker. Once the queue is
//! exhausted it waits until no item is in flight (retries included), then
//! takes every worker handle out of the availability slot and drops it, which
//! closes that worker's inbox. The output channel closes once the last worker
//! task drops its sender.

use crate::mailbox::client::MessageSource;
use crate::processor::availability::AvailabilitySlot;
use crate::processor::backoff::FailureCooldown;
use crate::processor::worker::{
    panic_message, worker_inbox, InFlightTracker, WorkQueue, Worker, WorkerShared,
    WorkerSharedParams, WorkerStats,
};
use crate::records::record::Record;
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Context, Result};
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    InvalidConfiguration { reason: String },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::InvalidConfiguration { reason } => {
                write!(f, "invalid pool configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for PoolError {}

impl PoolError {
    pub(crate) fn zero_workers() -> Self {
        PoolError::InvalidConfiguration {
            reason: "worker_count must be greater than zero".to_string(),
        }
    }
}

/// Outcome of one pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub queued: usize,
    pub dispatched: usize,
    pub published: usize,
    pub failures: usize,
    pub handoffs: usize,
    pub cancelled: bool,
}

impl PoolSummary {
    /// Items that never produced a record.
    pub fn abandoned(&self) -> usize {
        self.queued.saturating_sub(self.published)
    }
}

pub struct WorkerPool {
    source: Arc<dyn MessageSource>,
    telemetry: Arc<Telemetry>,
    cooldown: FailureCooldown,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(source: Arc<dyn MessageSource>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            source,
            telemetry,
            cooldown: FailureCooldown::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: FailureCooldown) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Runs are cancelled when `token` is.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts `worker_count` workers over `queue`, publishing records to
    /// `output`. The channel closes after every worker has exited.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run(
        &self,
        worker_count: usize,
        queue: WorkQueue,
        output: mpsc::Sender<Record>,
    ) -> Result<PoolRun> {
        if worker_count == 0 {
            return Err(PoolError::zero_workers().into());
        }

        let run_token = self.shutdown.child_token();
        let slot = Arc::new(AvailabilitySlot::new(worker_count));
        let in_flight = Arc::new(InFlightTracker::default());
        let queued = queue.len();

        tracing::info!(workers = worker_count, items = queued, "starting worker pool");

        let shared = WorkerShared::new(WorkerSharedParams {
            source: self.source.clone(),
            slot: slot.clone(),
            telemetry: self.telemetry.clone(),
            output,
            cooldown: self.cooldown,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let (handle, inbox) = worker_inbox(worker_id);
            let worker = Worker::new(
                worker_id,
                handle,
                inbox,
                shared.clone(),
                run_token.clone(),
            );
            workers.push(spawn_worker(worker_id, worker, run_token.clone()));
        }
        // Workers now own every output sender.
        drop(shared);

        let dispatcher = tokio::spawn(dispatch(DispatchParams {
            queue,
            slot,
            in_flight,
            telemetry: self.telemetry.clone(),
            shutdown: run_token.clone(),
            worker_count,
        }));

        Ok(PoolRun {
            queued,
            dispatcher,
            workers,
            shutdown: run_token,
        })
    }
}

fn spawn_worker(
    worker_id: usize,
    worker: Worker,
    run_token: CancellationToken,
) -> JoinHandle<Result<WorkerStats>> {
    tokio::spawn(async move {
        let result = AssertUnwindSafe(worker.run()).catch_unwind().await;

        match result {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(err)) => {
                tracing::error!(
                    worker = worker_id,
                    error = %err,
                    "worker task exited with error"
                );
                run_token.cancel();
                Err(err.context(format!("worker {worker_id} exited with error")))
            }
            Err(panic_payload) => {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(
                    worker = worker_id,
                    panic = %panic_msg,
                    "worker task panicked"
                );
                run_token.cancel();
                Err(anyhow!("worker {worker_id} panicked: {panic_msg}"))
            }
        }
    })
}

struct DispatchParams {
    queue: WorkQueue,
    slot: Arc<AvailabilitySlot>,
    in_flight: Arc<InFlightTracker>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    worker_count: usize,
}

async fn dispatch(params: DispatchParams) -> usize {
    let DispatchParams {
        mut queue,
        slot,
        in_flight,
        telemetry,
        shutdown,
        worker_count,
    } = params;
    let mut dispatched = 0usize;

    while let Some(item) = queue.pop() {
        let Some(handle) = slot.acquire(&shutdown).await else {
            tracing::warn!(
                abandoned = queue.len() + 1,
                "dispatch cancelled before the queue was exhausted"
            );
            return dispatched;
        };
        let worker_id = handle.id();
        let guard = in_flight.enter();

        if let Err(undelivered) = handle.assign(item, 1, guard).await {
            tracing::warn!(
                worker = worker_id,
                message_id = undelivered.item().id(),
                "worker inbox closed during dispatch; cancelling run"
            );
            shutdown.cancel();
            return dispatched;
        }
        dispatched += 1;
        telemetry.record_dispatched();
        tracing::trace!(worker = worker_id, idle = slot.idle(), "item dispatched");
    }

    tracing::debug!(dispatched, "work queue exhausted; waiting for in-flight items");
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => return dispatched,
        _ = in_flight.wait_until_idle() => {}
    }

    for _ in 0..worker_count {
        match slot.acquire(&shutdown).await {
            Some(handle) => {
                tracing::trace!(worker = handle.id(), "retiring worker");
                drop(handle);
            }
            None => break,
        }
    }
    dispatched
}

/// A started pool. The caller must keep draining the output channel while
/// awaiting [`PoolRun::wait`], otherwise workers block on publishing.
pub struct PoolRun {
    queued: usize,
    dispatcher: JoinHandle<usize>,
    workers: Vec<JoinHandle<Result<WorkerStats>>>,
    shutdown: CancellationToken,
}

impl PoolRun {
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    /// Token scoped to this run; cancelling it stops only this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Waits for the dispatcher and every worker to finish.
    pub async fn wait(self) -> Result<PoolSummary> {
        let dispatched = self.dispatcher.await.context("dispatcher task failed")?;

        let mut summary = PoolSummary {
            queued: self.queued,
            dispatched,
            ..PoolSummary::default()
        };
        let mut first_error = None;

        for (worker_id, outcome) in futures::future::join_all(self.workers)
            .await
            .into_iter()
            .enumerate()
        {
            match outcome {
                Ok(Ok(stats)) => {
                    summary.published += stats.published;
                    summary.failures += stats.failures;
                    summary.handoffs += stats.handoffs;
                }
                Ok(Err(err)) => {
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    first_error.get_or_insert(
                        anyhow::Error::new(join_err)
                            .context(format!("worker {worker_id} task failed")),
                    );
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        summary.cancelled = self.shutdown.is_cancelled();
        if summary.abandoned() > 0 {
            tracing::warn!(
                abandoned = summary.abandoned(),
                published = summary.published,
                "pool finished with unprocessed items"
            );
        }
        tracing::info!(
            dispatched = summary.dispatched,
            published = summary.published,
            failures = summary.failures,
            handoffs = summary.handoffs,
            cancelled = summary.cancelled,
            "worker pool finished"
        );
        Ok(summary)
    }
}
