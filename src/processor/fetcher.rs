//! `FetchAll` entry point: turns a list of message refs into records.
//!
//! `MessageFetcher` builds the work queue, starts a [`WorkerPool`] run and
//! drains its output into memory and, when configured, a JSON-lines sink. Sink
//! errors are caller-visible: they cancel the run and are returned once every
//! worker has exited.

use crate::mailbox::client::MessageSource;
use crate::processor::backoff::FailureCooldown;
use crate::processor::worker::WorkQueue;
use crate::processor::worker_pool::{PoolSummary, WorkerPool};
use crate::records::record::{MessageRef, Record};
use crate::records::sink::JsonLinesSink;
use crate::runtime::config::FetchConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub records: Vec<Record>,
    pub summary: PoolSummary,
}

pub struct MessageFetcher {
    pool: WorkerPool,
    telemetry: Arc<Telemetry>,
    worker_count: usize,
    output_path: Option<PathBuf>,
}

impl MessageFetcher {
    pub fn new(source: Arc<dyn MessageSource>, worker_count: usize) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        Self {
            pool: WorkerPool::new(source, telemetry.clone()),
            telemetry,
            worker_count,
            output_path: None,
        }
    }

    /// Applies worker count, cooldown and sink path from `config`.
    pub fn from_config(
        source: Arc<dyn MessageSource>,
        config: &FetchConfig,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            pool: WorkerPool::new(source, telemetry.clone())
                .with_cooldown(FailureCooldown::new(config.failure_cooldown())),
            telemetry,
            worker_count: config.worker_count(),
            output_path: config.output_path().map(PathBuf::from),
        }
    }

    pub fn with_cooldown(mut self, cooldown: FailureCooldown) -> Self {
        self.pool = self.pool.with_cooldown(cooldown);
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.pool = self.pool.with_cancellation_token(token);
        self
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.pool.cancellation_token()
    }

    /// Fetches every ref, returning records in completion order.
    pub async fn fetch_all(&self, refs: &[MessageRef]) -> Result<FetchReport> {
        let mut sink = match &self.output_path {
            Some(path) => Some(JsonLinesSink::open(path).await?),
            None => None,
        };

        let queue = WorkQueue::from_refs(refs);
        let (tx, rx) = mpsc::channel(self.worker_count.max(1));
        let run = self.pool.run(self.worker_count, queue, tx)?;
        let run_token = run.cancellation_token();

        let (drained, summary) = tokio::join!(
            drain_records(rx, sink.as_mut(), run_token),
            run.wait()
        );
        let records = drained?;
        let summary = summary?;

        if let Some(sink) = sink {
            let path = sink.path().display().to_string();
            let written = sink.finish().await?;
            tracing::info!(path = %path, written, "record sink flushed");
        }

        Ok(FetchReport { records, summary })
    }
}

async fn drain_records(
    mut rx: mpsc::Receiver<Record>,
    mut sink: Option<&mut JsonLinesSink>,
    run_token: CancellationToken,
) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        if let Some(sink) = sink.as_deref_mut() {
            if let Err(err) = sink.write(&record).await {
                run_token.cancel();
                return Err(err).context("record sink failed; run cancelled");
            }
        }
        records.push(record);
    }
    Ok(records)
}
