//! Polling worker loop.
//!
//! One job at a time: claim, execute, repeat. Empty polls back off
//! geometrically up to a cap; a claimed job resets the interval. Shutdown is
//! observed between iterations and during backoff sleeps, never inside a
//! running pipeline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::orchestrator::Orchestrator;

/// Consecutive claim errors logged before the rest are suppressed.
const MAX_LOGGED_CLAIM_FAILURES: u32 = 5;

/// Poll interval growth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            max_backoff: Duration::from_millis(12_000),
            multiplier: 1.5,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_backoff: config.max_backoff,
            multiplier: config.backoff_multiplier,
        }
    }

    /// Interval following `current` after another empty poll.
    pub fn next(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_backoff)
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A job was claimed and executed
    Processed { success: bool },
    /// The queue was empty
    Idle,
    /// The claim itself failed
    ClaimFailed,
}

/// Sequential polling worker.
pub struct Worker {
    orchestrator: Arc<Orchestrator>,
    policy: BackoffPolicy,
    backoff: Duration,
    /// Consecutive claim errors, reset by any successful claim
    claim_failures: u32,
}

impl Worker {
    pub fn new(orchestrator: Arc<Orchestrator>, policy: BackoffPolicy) -> Self {
        Self {
            orchestrator,
            backoff: policy.poll_interval,
            policy,
            claim_failures: 0,
        }
    }

    /// Interval the next empty poll will sleep for.
    pub fn current_backoff(&self) -> Duration {
        self.backoff
    }

    /// Run until `shutdown` turns true.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Worker polling {} source (poll {:?}, max backoff {:?}, x{})",
            self.orchestrator.source().name(),
            self.policy.poll_interval,
            self.policy.max_backoff,
            self.policy.multiplier
        );

        while !*shutdown.borrow() {
            match self.poll_once().await {
                PollOutcome::Processed { .. } => continue,
                PollOutcome::Idle | PollOutcome::ClaimFailed => {
                    let delay = self.backoff;
                    self.backoff = self.policy.next(delay);
                    debug!("No job; sleeping {:?}", delay);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!("Worker loop stopped");
    }

    /// Consecutive claim errors seen so far.
    pub fn claim_failures(&self) -> u32 {
        self.claim_failures
    }

    fn claims_recovered(&mut self) {
        if self.claim_failures > MAX_LOGGED_CLAIM_FAILURES {
            info!("Claims recovered after {} failures", self.claim_failures);
        }
        self.claim_failures = 0;
    }

    /// Claim and execute at most one job. Never sleeps.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let claimed = self.orchestrator.source().claim().await;
        let job = match claimed {
            Ok(job) => {
                self.claims_recovered();
                match job {
                    Some(job) => job,
                    None => return PollOutcome::Idle,
                }
            }
            Err(e) => {
                self.claim_failures += 1;
                if self.claim_failures <= MAX_LOGGED_CLAIM_FAILURES {
                    warn!("Failed to claim job: {}", e);
                } else if self.claim_failures == MAX_LOGGED_CLAIM_FAILURES + 1 {
                    warn!(
                        "Claims still failing after {} attempts; muting until the source recovers",
                        MAX_LOGGED_CLAIM_FAILURES
                    );
                }
                return PollOutcome::ClaimFailed;
            }
        };

        self.backoff = self.policy.poll_interval;

        // Run on its own task so a panic inside a stage is contained.
        let orchestrator = Arc::clone(&self.orchestrator);
        let job_id = job.id.clone();
        let handle = tokio::spawn(async move { orchestrator.execute(&job).await });

        match handle.await {
            Ok(result) => PollOutcome::Processed {
                success: result.success,
            },
            Err(e) => {
                error!(job_id = %job_id, "Job execution aborted: {}", e);
                PollOutcome::Processed { success: false }
            }
        }
    }
}
