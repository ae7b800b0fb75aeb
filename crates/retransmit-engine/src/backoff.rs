//! Retry pacing.
//!
//! The sender retries forever and the receiver's accept loop never gives
//! up, so both pause between attempts. The pause length comes from a
//! [`Backoff`] and the pause itself from a [`Clock`], which lets tests run
//! hundreds of reconnects without waiting.

use std::time::Duration;

use async_trait::async_trait;

/// How long to wait before retry number `attempt` (1-based, consecutive
/// failures since the last success).
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Same pause after every failure.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Default for FixedBackoff {
    fn default() -> Self {
        FixedBackoff(Duration::from_secs(1))
    }
}

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time, via the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
