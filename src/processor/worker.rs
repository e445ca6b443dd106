//! Worker module split across focused submodules:
//! - `types`: worker handles, assignments and the work queue
//! - `shared`: state shared across workers (source, slot, output, in-flight tracking)
//! - `process`: worker struct plus the fetch/publish/hand-off loop
//! - `tests`: worker integration tests against stub sources

mod process;
mod shared;
mod types;


pub(crate) use process::panic_message;
pub(crate) use process::Worker;
pub(crate) use shared::{InFlightGuard, InFlightTracker, WorkerShared, WorkerSharedParams};
pub(crate) use types::{worker_inbox, Assignment};
pub use types::{WorkQueue, WorkerHandle, WorkerStats};
