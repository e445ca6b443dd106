use crate::mailbox::client::{MailboxClient, MessageLister, MessageSource};
use crate::mailbox::listing::list_message_refs_observed;
use crate::processor::fetcher::{FetchReport, MessageFetcher};
use crate::processor::worker_pool::PoolSummary;
use crate::runtime::config::FetchConfig;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Lists the mailbox, fetches every listed message through the worker pool and
/// handles OS signals for graceful shutdowns.
pub struct Runner {
    config: FetchConfig,
    lister: Arc<dyn MessageLister>,
    source: Arc<dyn MessageSource>,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Creates a runner backed by a [`MailboxClient`] built from `config`.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = MailboxClient::from_config(&config)
            .context("failed to construct mailbox client")?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    /// Creates a runner over any client that can both list and fetch messages.
    pub fn with_client<C>(config: FetchConfig, client: Arc<C>) -> Self
    where
        C: MessageSource + MessageLister + 'static,
    {
        let source: Arc<dyn MessageSource> = client.clone();
        let lister: Arc<dyn MessageLister> = client;
        Self {
            config,
            lister,
            source,
            telemetry: Arc::new(Telemetry::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Lists message ids, then fetches them all. Returns once the pool has
    /// drained or the shutdown token is cancelled.
    pub async fn run(&self) -> Result<FetchReport> {
        let reporter_token = self.shutdown.child_token();
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            reporter_token.clone(),
            self.config.metrics_interval(),
        );

        let result = self.list_and_fetch().await;

        reporter_token.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task failed");
        }
        result
    }

    /// Runs until the work is done, a Ctrl-C (SIGINT) is received, or the
    /// shutdown token is cancelled elsewhere. Records fetched before the
    /// interrupt are still returned.
    pub async fn run_until_ctrl_c(&self) -> Result<FetchReport> {
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
                self.shutdown.cancel();
                run.await
            }
        }
    }

    async fn list_and_fetch(&self) -> Result<FetchReport> {
        let request = self.config.list_request();
        let listed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            refs = list_message_refs_observed(
                self.lister.as_ref(),
                &request,
                Some(self.telemetry.as_ref()),
            ) => Some(refs.context("failed to list messages")?),
        };

        let Some(refs) = listed else {
            tracing::info!("runner cancelled while listing messages");
            return Ok(FetchReport {
                records: Vec::new(),
                summary: PoolSummary {
                    cancelled: true,
                    ..PoolSummary::default()
                },
            });
        };

        tracing::info!(
            refs = refs.len(),
            workers = self.config.worker_count(),
            "fetching listed messages"
        );

        let fetcher =
            MessageFetcher::from_config(self.source.clone(), &self.config, self.telemetry.clone())
                .with_cancellation_token(self.shutdown.clone());
        fetcher.fetch_all(&refs).await
    }
}
