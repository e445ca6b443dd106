//! Mailbox collaborators: REST client, authentication, request metrics,
//! listing pagination, and the raw wire payloads.

pub mod auth;
pub mod client;
pub mod listing;
pub mod metrics;
pub mod options;
pub mod payload;

pub use client::{MailboxClient, MailboxError, MessageLister, MessageSource};
pub use listing::{list_message_refs, ListRequest};
pub use metrics::MailboxMetricsSnapshot;
pub use options::MailboxClientOptions;
pub use payload::{Header, MessagePage, MessagePart, RawMessage};
