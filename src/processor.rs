//! Processor orchestration: the worker pool, its availability slot, per-worker
//! failure cooldown, and the `MessageFetcher` entry point that drives a run.

pub mod availability;
pub mod backoff;
pub mod fetcher;
pub mod worker;
pub mod worker_pool;
