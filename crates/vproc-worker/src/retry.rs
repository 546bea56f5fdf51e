//! Startup connection retry.
//!
//! A backend that is still coming up (database restarting, network not yet
//! routed) yields transient errors; those are retried with doubling delays.
//! Anything else, such as a bad URL or failed authentication, fails at once.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use vproc_queue::QueueResult;

/// How long to keep trying to reach a backend at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetry {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl ConnectRetry {
    /// Delay before retry number `retry` (zero-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay)
    }

    /// Run `connect` until it succeeds, fails permanently, or the retries
    /// are spent.
    pub async fn run<T, F, Fut>(&self, backend: &str, mut connect: F) -> QueueResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = QueueResult<T>>,
    {
        let mut retry = 0;
        loop {
            match connect().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let delay = self.delay(retry);
                    retry += 1;
                    warn!(
                        backend,
                        "Connect attempt {} failed, retrying in {:?}: {}", retry, delay, e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(backend, attempts = retry + 1, "Giving up on connect: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
