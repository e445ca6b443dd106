//! Authorization header wiring for the injected OAuth access token.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

pub(crate) fn build_auth_headers(access_token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut value = HeaderValue::from_str(&format!("Bearer {}", access_token.trim()))
        .context("failed to build Authorization header")?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
