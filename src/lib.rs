pub mod mailbox;
pub mod processor;
pub mod records;
pub mod runtime;

pub use mailbox::client::{MailboxClient, MailboxError, MessageLister, MessageSource};
pub use mailbox::listing::{list_message_refs, ListRequest};
pub use mailbox::metrics::MailboxMetricsSnapshot;
pub use mailbox::payload::RawMessage;
pub use processor::backoff::FailureCooldown;
pub use processor::fetcher::{FetchReport, MessageFetcher};
pub use processor::worker::WorkQueue;
pub use processor::worker_pool::{PoolError, PoolRun, PoolSummary, WorkerPool};
pub use records::parser::parse;
pub use records::record::{MessageRef, Record, WorkItem};
pub use records::sink::JsonLinesSink;
pub use runtime::config::{FetchConfig, FetchConfigBuilder, FetchConfigParams};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
