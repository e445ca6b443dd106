use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    listed_pages: AtomicU64,
    listed_refs: AtomicU64,
    dispatched: AtomicU64,
    fetched_records: AtomicU64,
    fetch_failures: AtomicU64,
    retry_handoffs: AtomicU64,
    recovered_panics: AtomicU64,
}

impl Telemetry {
    pub fn record_listed_page(&self, refs: usize) {
        self.listed_pages.fetch_add(1, Ordering::Relaxed);
        self.listed_refs.fetch_add(refs as u64, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetched_record(&self) {
        self.fetched_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_handoff(&self) {
        self.retry_handoffs.fetch_add(1, Ordering::Relaxed);
    }

    /// A panic inside a fetch was caught and converted into a failure.
    pub fn record_recovered_panic(&self) {
        self.recovered_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            listed_pages: self.listed_pages.load(Ordering::Relaxed),
            listed_refs: self.listed_refs.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            fetched_records: self.fetched_records.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            retry_handoffs: self.retry_handoffs.load(Ordering::Relaxed),
            recovered_panics: self.recovered_panics.load(Ordering::Relaxed),
        }
    }

    pub fn fetched_records(&self) -> u64 {
        self.fetched_records.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub listed_pages: u64,
    pub listed_refs: u64,
    pub dispatched: u64,
    pub fetched_records: u64,
    pub fetch_failures: u64,
    pub retry_handoffs: u64,
    pub recovered_panics: u64,
}

impl TelemetrySnapshot {
    /// Dispatched items that have not produced a record yet.
    pub fn in_flight(&self) -> u64 {
        self.dispatched.saturating_sub(self.fetched_records)
    }
}

/// Spawns a background task that periodically logs throughput, in-flight items, and failures.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "mailmeta::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let fetched_delta = current_snapshot
                        .fetched_records
                        .saturating_sub(last_snapshot.fetched_records);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        fetched_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "mailmeta::metrics",
                        throughput = format!("{throughput:.2}"),
                        fetched = current_snapshot.fetched_records,
                        in_flight = current_snapshot.in_flight(),
                        fetch_failures = current_snapshot.fetch_failures,
                        retry_handoffs = current_snapshot.retry_handoffs,
                        recovered_panics = current_snapshot.recovered_panics,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
