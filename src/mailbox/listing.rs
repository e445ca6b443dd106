//! Cursor-based pagination over `MessageLister`, producing the ordered id
//! list that seeds the worker pool.

use crate::mailbox::client::MessageLister;
use crate::records::record::MessageRef;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Context, Result};

pub const BASE_QUERY: &str = "-is:chat";
pub const DEFAULT_MAX_RESULTS: usize = 100;
pub const MAX_PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    query: String,
    max_results: usize,
    page_size: usize,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            query: BASE_QUERY.to_owned(),
            max_results: DEFAULT_MAX_RESULTS,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Narrows the search; the terms are appended to the base query.
    pub fn query(mut self, terms: &str) -> Self {
        let terms = terms.trim();
        if !terms.is_empty() {
            self.query = format!("{} {terms}", self.query);
        }
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn search_query(&self) -> &str {
        &self.query
    }

    pub fn limit(&self) -> usize {
        self.max_results
    }

    fn validate(&self) -> Result<()> {
        if self.max_results == 0 {
            bail!("max_results must be greater than 0");
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            bail!("page_size must be between 1 and {MAX_PAGE_SIZE}");
        }
        Ok(())
    }
}

/// Follows continuation cursors until `max_results` refs are collected or the
/// listing is exhausted. Order matches the listing order.
pub async fn list_message_refs(
    lister: &dyn MessageLister,
    request: &ListRequest,
) -> Result<Vec<MessageRef>> {
    list_message_refs_observed(lister, request, None).await
}

/// Same as [`list_message_refs`], counting pages and refs in `telemetry`.
pub async fn list_message_refs_observed(
    lister: &dyn MessageLister,
    request: &ListRequest,
    telemetry: Option<&Telemetry>,
) -> Result<Vec<MessageRef>> {
    request.validate()?;

    let mut refs: Vec<MessageRef> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let remaining = request.max_results.saturating_sub(refs.len());
        let page_size = remaining.min(request.page_size);
        let page = lister
            .list_page(&request.query, page_size, cursor.as_deref())
            .await
            .with_context(|| format!("listing page {} failed", pages + 1))?;
        pages += 1;
        if let Some(telemetry) = telemetry {
            telemetry.record_listed_page(page.messages.len());
        }

        refs.extend(
            page.messages
                .iter()
                .map(|listed| MessageRef::new(listed.id.clone(), listed.thread_id.clone())),
        );
        cursor = page.cursor().map(str::to_owned);

        if refs.len() >= request.max_results || cursor.is_none() {
            break;
        }
    }

    refs.truncate(request.max_results);
    tracing::info!(
        query = %request.query,
        pages,
        listed = refs.len(),
        "message listing complete"
    );
    Ok(refs)
}
