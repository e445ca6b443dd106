//! Counters for mailbox requests. Failures are split by cause: the service
//! answering with a non-success status, the call timing out, or anything else
//! (connection errors, undecodable bodies).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct MailboxMetrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_latency_ns: AtomicU64,
    total_timeouts: AtomicU64,
    total_status_errors: AtomicU64,
}

impl MailboxMetrics {
    pub(crate) fn record_success(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// The service answered, but with a non-success HTTP status.
    pub(crate) fn record_status_error(&self, latency: Duration) {
        self.record_failure(latency);
        self.total_status_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MailboxMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let average_latency_ms = if total_requests == 0 {
            0.0
        } else {
            (total_latency_ns as f64 / total_requests as f64) / 1_000_000.0
        };

        let error_rate = if total_requests == 0 {
            0.0
        } else {
            total_errors as f64 / total_requests as f64
        };

        let total_timeouts = self.total_timeouts.load(Ordering::Relaxed);
        let total_status_errors = self.total_status_errors.load(Ordering::Relaxed);

        MailboxMetricsSnapshot {
            total_requests,
            total_errors,
            average_latency_ms,
            error_rate,
            total_timeouts,
            total_status_errors,
            total_transport_errors: total_errors
                .saturating_sub(total_timeouts)
                .saturating_sub(total_status_errors),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct MailboxMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
    pub total_timeouts: u64,
    pub total_status_errors: u64,
    /// Failures that were neither a timeout nor an HTTP status.
    pub total_transport_errors: u64,
}
