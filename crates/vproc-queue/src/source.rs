//! Job source port.

use async_trait::async_trait;

use vproc_models::{Job, JobId, VideoId};

use crate::error::QueueResult;

/// Maximum number of jobs returned by `get_pending_jobs`.
pub const PENDING_JOBS_LIMIT: i64 = 10;

/// A backend that hands out jobs and records their outcome.
///
/// `claim` must return each pending job to at most one caller, across tasks
/// and across processes. An empty queue is `Ok(None)`, not an error.
/// Push-based sources may always return `None` and deliver jobs out of band.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Source name for logs and status output.
    fn name(&self) -> &'static str;

    /// Atomically take the oldest pending job, mark it processing and
    /// increment its attempt counter.
    async fn claim(&self) -> QueueResult<Option<Job>>;

    async fn complete(&self, job_id: &JobId, video_id: &VideoId) -> QueueResult<()>;

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()>;

    /// Monitoring only.
    async fn get_job_info(&self, job_id: &JobId) -> QueueResult<Option<Job>>;

    /// Monitoring only. Oldest first, at most [`PENDING_JOBS_LIMIT`].
    async fn get_pending_jobs(&self) -> QueueResult<Vec<Job>>;

    async fn health_check(&self) -> QueueResult<()>;
}
