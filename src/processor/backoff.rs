use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Pause applied to a worker after a failed fetch, before it hands the item on.
pub const DEFAULT_FAILURE_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCooldown {
    delay: Duration,
}

impl Default for FailureCooldown {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_COOLDOWN)
    }
}

impl FailureCooldown {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleeps for the cooldown. Returns `false` if `shutdown` fired first.
    pub async fn wait(&self, shutdown: &CancellationToken) -> bool {
        if shutdown.is_cancelled() {
            return false;
        }

        if self.delay.is_zero() {
            yield_now().await;
            return !shutdown.is_cancelled();
        }

        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = sleep(self.delay) => true,
        }
    }
}
