use crate::mailbox::listing::{ListRequest, DEFAULT_MAX_RESULTS, MAX_PAGE_SIZE};
use crate::mailbox::options::DEFAULT_USER_ID;
use crate::processor::backoff::DEFAULT_FAILURE_COOLDOWN;
use crate::processor::worker_pool::PoolError;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PAGE_SIZE: usize = MAX_PAGE_SIZE;

/// Runtime configuration for a mailbox fetch run.
///
/// All instances must be constructed via [`FetchConfig::builder`] or [`FetchConfig::new`]
/// so invariants are validated before any consumer observes the values. Credentials are
/// always injected here; nothing in the crate carries a default token or account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    api_base_url: String,
    access_token: String,
    user_id: String,
    worker_count: usize,
    failure_cooldown: Duration,
    request_timeout: Duration,
    metrics_interval: Duration,
    max_results: usize,
    page_size: usize,
    query: String,
    output_path: Option<PathBuf>,
}

pub struct FetchConfigParams {
    pub api_base_url: String,
    pub access_token: String,
    pub user_id: String,
    pub worker_count: usize,
    pub failure_cooldown: Duration,
    pub request_timeout: Duration,
    pub metrics_interval: Duration,
    pub max_results: usize,
    pub page_size: usize,
    pub query: String,
    pub output_path: Option<PathBuf>,
}

impl FetchConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`FetchConfig::builder`] when most values use defaults.
    pub fn new(params: FetchConfigParams) -> Result<Self> {
        let FetchConfigParams {
            api_base_url,
            access_token,
            user_id,
            worker_count,
            failure_cooldown,
            request_timeout,
            metrics_interval,
            max_results,
            page_size,
            query,
            output_path,
        } = params;

        let config = Self {
            api_base_url: trimmed_string(api_base_url),
            access_token: trimmed_string(access_token),
            user_id: trimmed_string(user_id),
            worker_count,
            failure_cooldown,
            request_timeout,
            metrics_interval,
            max_results,
            page_size,
            query: trimmed_string(query),
            output_path,
        };

        config.validate()?;
        Ok(config)
    }

    /// Base URL of the mailbox REST API, without the `/gmail/v1` suffix.
    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    /// OAuth bearer token sent with every request.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Mailbox identifier; `me` addresses the token owner.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Pause a worker takes after a failed fetch before handing the item on.
    pub fn failure_cooldown(&self) -> Duration {
        self.failure_cooldown
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Extra search terms appended to the base listing query.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// JSON-lines file records are appended to, if any.
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn list_request(&self) -> ListRequest {
        ListRequest::new()
            .query(&self.query)
            .max_results(self.max_results)
            .page_size(self.page_size)
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.api_base_url)?;
        ensure_not_empty(&self.access_token, "access_token")?;
        ensure_not_empty(&self.user_id, "user_id")?;

        if self.worker_count == 0 {
            return Err(PoolError::zero_workers().into());
        }

        if self.failure_cooldown.is_zero() {
            bail!("failure_cooldown must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.max_results == 0 {
            bail!("max_results must be greater than 0");
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            bail!("page_size must be between 1 and {MAX_PAGE_SIZE}");
        }

        if let Some(path) = &self.output_path {
            if path.as_os_str().is_empty() {
                bail!("output_path cannot be empty");
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct FetchConfigBuilder {
    api_base_url: Option<String>,
    access_token: Option<String>,
    user_id: Option<String>,
    worker_count: Option<usize>,
    failure_cooldown: Option<Duration>,
    request_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    max_results: Option<usize>,
    page_size: Option<usize>,
    query: Option<String>,
    output_path: Option<PathBuf>,
}

impl FetchConfigBuilder {
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn failure_cooldown(mut self, cooldown: Duration) -> Self {
        self.failure_cooldown = Some(cooldown);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<FetchConfig> {
        let params = FetchConfigParams {
            api_base_url: self.api_base_url.context("api_base_url is required")?,
            access_token: self.access_token.context("access_token is required")?,
            user_id: self.user_id.unwrap_or_else(|| DEFAULT_USER_ID.to_owned()),
            worker_count: self.worker_count.unwrap_or_else(default_worker_count),
            failure_cooldown: self.failure_cooldown.unwrap_or(DEFAULT_FAILURE_COOLDOWN),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            max_results: self.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
            page_size: self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            query: self.query.unwrap_or_default(),
            output_path: self.output_path,
        };

        FetchConfig::new(params)
    }
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("api_base_url must start with http:// or https://");
    }
    Ok(())
}
