//! Configurable knobs for the mailbox client along with validation so callers
//! can reason about timeouts and connection limits.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_USER_ID: &str = "me";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_IDLE_CONNECTIONS: usize = 32;

#[derive(Debug, Clone)]
pub struct MailboxClientOptions {
    pub request_timeout: Duration,
    pub max_idle_connections: usize,
    pub user_id: String,
}

impl Default for MailboxClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            user_id: DEFAULT_USER_ID.to_owned(),
        }
    }
}

impl MailboxClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_idle_connections == 0 {
            bail!("max_idle_connections must be greater than 0");
        }
        if self.user_id.trim().is_empty() {
            bail!("user_id cannot be empty");
        }
        Ok(())
    }
}
