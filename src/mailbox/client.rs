//! Mailbox REST client and the collaborator traits consumed by the worker
//! pool (`MessageSource`) and the listing pager (`MessageLister`).

use crate::mailbox::auth::build_auth_headers;
use crate::mailbox::metrics::{MailboxMetrics, MailboxMetricsSnapshot};
use crate::mailbox::options::MailboxClientOptions;
use crate::mailbox::payload::{MessagePage, RawMessage};
use crate::runtime::config::FetchConfig;
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::time::{timeout, Instant};

const GET_METHOD: &str = "messages.get";
const LIST_METHOD: &str = "messages.list";

#[derive(Debug)]
pub enum MailboxError {
    Timeout { method: &'static str },
    Status { method: &'static str, status: StatusCode },
}

impl std::fmt::Display for MailboxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MailboxError::Timeout { method } => write!(f, "mailbox {method} timed out"),
            MailboxError::Status { method, status } => {
                write!(f, "mailbox {method} returned HTTP {status}")
            }
        }
    }
}

impl std::error::Error for MailboxError {}

/// Fetches one message by id. Implementations must tolerate concurrent calls.
pub trait MessageSource: Send + Sync {
    fn fetch_message<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<RawMessage>>;
}

/// Returns one page of message ids matching `query`.
pub trait MessageLister: Send + Sync {
    fn list_page<'a>(
        &'a self,
        query: &'a str,
        page_size: usize,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<MessagePage>>;
}

#[derive(Debug, Clone)]
pub struct MailboxClient {
    base_url: Arc<String>,
    client: Client,
    options: MailboxClientOptions,
    metrics: Arc<MailboxMetrics>,
}

impl MessageSource for MailboxClient {
    fn fetch_message<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<RawMessage>> {
        Box::pin(self.get_message(id))
    }
}

impl MessageLister for MailboxClient {
    fn list_page<'a>(
        &'a self,
        query: &'a str,
        page_size: usize,
        page_token: Option<&'a str>,
    ) -> BoxFuture<'a, Result<MessagePage>> {
        Box::pin(self.list_messages(query, page_size, page_token))
    }
}

impl MailboxClient {
    pub fn new(base_url: impl Into<String>, access_token: &str) -> Result<Self> {
        Self::with_options(base_url, access_token, MailboxClientOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        access_token: &str,
        options: MailboxClientOptions,
    ) -> Result<Self> {
        options.validate()?;

        let base_url = base_url.into().trim().trim_end_matches('/').to_owned();
        let headers = build_auth_headers(access_token)?;
        let client = Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(options.max_idle_connections)
            .build()
            .map_err(|err| anyhow!("failed to build mailbox client: {err}"))?;

        Ok(Self {
            base_url: Arc::new(base_url),
            client,
            options,
            metrics: Arc::new(MailboxMetrics::default()),
        })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        config.validate()?;
        let options = MailboxClientOptions {
            request_timeout: config.request_timeout(),
            max_idle_connections: std::cmp::max(32, config.worker_count().saturating_mul(2)),
            user_id: config.user_id().to_owned(),
        };
        Self::with_options(config.api_base_url(), config.access_token(), options)
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> MailboxMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/gmail/v1/users/{}/messages",
            self.base_url, self.options.user_id
        )
    }

    pub async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let request = self
            .client
            .get(format!("{}/{id}", self.messages_url()))
            .query(&[("format", "full")]);
        let message: RawMessage = self
            .execute(GET_METHOD, request)
            .await
            .with_context(|| format!("failed to fetch message {id}"))?;
        tracing::trace!(message_id = id, "message fetched");
        Ok(message)
    }

    pub async fn list_messages(
        &self,
        query: &str,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let mut params = vec![
            ("q", query.to_owned()),
            ("maxResults", page_size.to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_owned()));
        }

        let request = self.client.get(self.messages_url()).query(&params);
        let page: MessagePage = self
            .execute(LIST_METHOD, request)
            .await
            .context("failed to list messages")?;
        tracing::debug!(
            count = page.messages.len(),
            has_more = page.cursor().is_some(),
            "message page listed"
        );
        Ok(page)
    }

    async fn execute<R>(&self, method: &'static str, request: reqwest::RequestBuilder) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let outcome = timeout(
            self.options.request_timeout,
            send_and_decode::<R>(method, request),
        )
        .await;

        let elapsed = start.elapsed();
        match outcome {
            Err(_) => {
                self.metrics.record_timeout(elapsed);
                Err(MailboxError::Timeout { method }.into())
            }
            Ok(Err(err)) => {
                match err.downcast_ref::<MailboxError>() {
                    Some(MailboxError::Status { .. }) => self.metrics.record_status_error(elapsed),
                    _ => self.metrics.record_failure(elapsed),
                }
                Err(err)
            }
            Ok(Ok(value)) => {
                self.metrics.record_success(elapsed);
                Ok(value)
            }
        }
    }
}

async fn send_and_decode<R>(method: &'static str, request: reqwest::RequestBuilder) -> Result<R>
where
    R: DeserializeOwned,
{
    let response = request
        .send()
        .await
        .map_err(|err| anyhow!("mailbox {method} request failed: {err}"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(MailboxError::Status { method, status }.into());
    }
    response
        .json::<R>()
        .await
        .map_err(|err| anyhow!("mailbox {method} returned an undecodable body: {err}"))
}
