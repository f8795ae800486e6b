//! Wall-clock [`Clock`] for production poll loops.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use recon_harness_core::poll::Clock;

/// Reads `Instant::now()` and sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
