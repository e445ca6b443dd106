use crate::mailbox::client::MessageSource;
use crate::records::parser::parse;
use crate::records::record::{Record, WorkItem};
use anyhow::{anyhow, bail, Context, Result};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;

use super::shared::{InFlightGuard, WorkerShared};
use super::types::{Assignment, HandOffOutcome, InboxReceiver, WorkerHandle, WorkerStats};

/// One execution lane of the pool.
///
/// The worker registers its handle in the availability slot, waits for an
/// assignment, fetches and parses the message, publishes the record, and
/// registers again. It exits when its inbox closes (the dispatcher retired
/// its handle) or when the run is cancelled.
pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(super) handle: Option<WorkerHandle>,
    pub(super) inbox: InboxReceiver,
    pub(super) shared: WorkerShared,
    pub(super) shutdown: CancellationToken,
    pub(super) stats: WorkerStats,
}

enum Step {
    Continue,
    Exit,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        handle: WorkerHandle,
        inbox: InboxReceiver,
        shared: WorkerShared,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            handle: Some(handle),
            inbox,
            shared,
            shutdown,
            stats: WorkerStats::default(),
        }
    }

    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub(crate) async fn run(mut self) -> Result<WorkerStats> {
        tracing::debug!("worker task started");

        loop {
            if let Some(handle) = self.handle.take() {
                self.shared
                    .slot
                    .release(handle)
                    .with_context(|| format!("worker {} failed to register", self.id))?;
            }

            let assignment = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("shutdown requested; exiting worker loop");
                    break;
                }
                next = self.inbox.recv() => match next {
                    Some(assignment) => assignment,
                    None => {
                        tracing::debug!("inbox closed; worker retired");
                        break;
                    }
                },
            };

            match self.handle_assignment(assignment).await? {
                Step::Continue => continue,
                Step::Exit => break,
            }
        }

        tracing::debug!(
            published = self.stats.published,
            failures = self.stats.failures,
            handoffs = self.stats.handoffs,
            "worker task exited"
        );
        Ok(self.stats)
    }

    async fn handle_assignment(&mut self, assignment: Assignment) -> Result<Step> {
        let Assignment {
            item,
            attempt,
            guard,
            handle,
        } = assignment;
        if handle.id() != self.id {
            bail!(
                "worker {} received handle of worker {}",
                self.id,
                handle.id()
            );
        }
        self.handle = Some(handle);

        match self.process_one(&item).await {
            Ok(record) => Ok(self.publish(record, guard).await),
            Err(err) => {
                self.stats.failures += 1;
                self.shared.telemetry.record_fetch_failure();
                tracing::warn!(
                    message_id = item.id(),
                    attempt,
                    cooldown_ms = self.shared.cooldown.delay().as_millis() as u64,
                    error = format!("{err:#}"),
                    "message fetch failed; cooling down before handing it off"
                );

                match self.hand_off(item, attempt, guard).await? {
                    HandOffOutcome::Delivered { peer } => {
                        tracing::debug!(peer, "failed item handed off");
                        Ok(Step::Continue)
                    }
                    HandOffOutcome::Retained => {
                        tracing::debug!("no idle peer; retrying failed item locally");
                        Ok(Step::Continue)
                    }
                    HandOffOutcome::Cancelled => Ok(Step::Exit),
                }
            }
        }
    }

    /// Fetches and parses one message. Panics raised by the fetch are turned
    /// into errors so they follow the same handoff path as ordinary failures.
    pub(super) async fn process_one(&self, item: &WorkItem) -> Result<Record> {
        let id = item.id();
        let attempt = AssertUnwindSafe(fetch_and_parse(self.shared.source.as_ref(), id))
            .catch_unwind()
            .await;

        match attempt {
            Ok(result) => result,
            Err(panic) => {
                self.shared.telemetry.record_recovered_panic();
                Err(anyhow!(
                    "fetch of message {id} panicked: {}",
                    panic_message(panic.as_ref())
                ))
            }
        }
    }

    async fn publish(&mut self, record: Record, guard: InFlightGuard) -> Step {
        let message_id = record.id.clone();
        let sent = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Step::Exit,
            sent = self.shared.output.send(record) => sent,
        };

        if sent.is_err() {
            tracing::warn!(message_id, "record consumer went away; cancelling run");
            self.shutdown.cancel();
            return Step::Exit;
        }

        drop(guard);
        self.stats.published += 1;
        self.shared.telemetry.record_fetched_record();
        tracing::trace!(message_id, "record published");
        Step::Continue
    }

    /// Waits out the cooldown, then gives the item to the longest-idle peer.
    /// When no peer is idle the worker keeps the item and retries it itself,
    /// so a failure never waits on a lane that may never free up.
    pub(super) async fn hand_off(
        &mut self,
        item: WorkItem,
        attempt: u32,
        guard: InFlightGuard,
    ) -> Result<HandOffOutcome> {
        if !self.shared.cooldown.wait(&self.shutdown).await {
            return Ok(HandOffOutcome::Cancelled);
        }

        let (target, retained) = match self.shared.slot.try_acquire() {
            Some(peer) => (peer, false),
            None => {
                let own = self.handle.take().with_context(|| {
                    format!("worker {} lost its handle before handoff", self.id)
                })?;
                (own, true)
            }
        };
        let target_id = target.id();

        if let Err(undelivered) = target.assign(item, attempt.saturating_add(1), guard).await {
            tracing::debug!(
                peer = target_id,
                message_id = undelivered.item().id(),
                "inbox closed during handoff"
            );
            return Ok(HandOffOutcome::Cancelled);
        }

        self.stats.handoffs += 1;
        self.shared.telemetry.record_retry_handoff();
        if retained {
            Ok(HandOffOutcome::Retained)
        } else {
            Ok(HandOffOutcome::Delivered { peer: target_id })
        }
    }
}

async fn fetch_and_parse(source: &dyn MessageSource, id: &str) -> Result<Record> {
    let raw = source.fetch_message(id).await?;
    if raw.id != id {
        bail!("mailbox returned message {:?} for requested id {id}", raw.id);
    }
    Ok(parse(&raw))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
