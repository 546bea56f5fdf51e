//! In-process job source.

use async_trait::async_trait;
use parking_lot::Mutex;

use vproc_models::{Job, JobId, JobStatus, VideoId};

use crate::error::{QueueError, QueueResult};
use crate::source::{JobSource, PENDING_JOBS_LIMIT};

#[derive(Debug, Default)]
struct State {
    /// Submission order; ties on `created_at` resolve by position
    jobs: Vec<Job>,
    unavailable: bool,
}

/// Job source holding jobs in memory. Claims are serialized by a mutex, so
/// concurrent callers never receive the same job.
#[derive(Debug, Default)]
pub struct InMemoryJobSource {
    state: Mutex<State>,
}

impl InMemoryJobSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a job to the queue.
    pub fn submit(&self, job: Job) {
        self.state.lock().jobs.push(job);
    }

    /// Put a failed job back into the queue. Its attempt counter is kept.
    pub fn resubmit(&self, job_id: &JobId) -> bool {
        let mut state = self.state.lock();
        match state
            .jobs
            .iter_mut()
            .find(|j| &j.id == job_id && j.status == JobStatus::Failed)
        {
            Some(job) => {
                job.status = JobStatus::Pending;
                true
            }
            None => false,
        }
    }

    /// Make every call fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> QueueResult<T> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(QueueError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "job source unavailable",
            )));
        }
        Ok(f(&mut state))
    }
}

#[async_trait]
impl JobSource for InMemoryJobSource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn claim(&self) -> QueueResult<Option<Job>> {
        self.with_state(|state| {
            let oldest = state
                .jobs
                .iter_mut()
                .enumerate()
                .filter(|(_, j)| j.status == JobStatus::Pending)
                .min_by_key(|(i, j)| (j.created_at, *i))
                .map(|(_, j)| j)?;

            oldest.status = JobStatus::Processing;
            oldest.attempts += 1;
            Some(oldest.clone())
        })
    }

    async fn complete(&self, job_id: &JobId, _video_id: &VideoId) -> QueueResult<()> {
        self.with_state(|state| {
            if let Some(job) = state.jobs.iter_mut().find(|j| &j.id == job_id) {
                job.status = JobStatus::Done;
            }
        })
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        self.with_state(|state| {
            if let Some(job) = state.jobs.iter_mut().find(|j| &j.id == job_id) {
                job.status = JobStatus::Failed;
                job.error = Some(error.to_string());
            }
        })
    }

    async fn get_job_info(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        self.with_state(|state| state.jobs.iter().find(|j| &j.id == job_id).cloned())
    }

    async fn get_pending_jobs(&self) -> QueueResult<Vec<Job>> {
        self.with_state(|state| {
            let mut pending: Vec<(usize, Job)> = state
                .jobs
                .iter()
                .enumerate()
                .filter(|(_, j)| j.status == JobStatus::Pending)
                .map(|(i, j)| (i, j.clone()))
                .collect();
            pending.sort_by_key(|(i, j)| (j.created_at, *i));
            pending
                .into_iter()
                .take(PENDING_JOBS_LIMIT as usize)
                .map(|(_, j)| j)
                .collect()
        })
    }

    async fn health_check(&self) -> QueueResult<()> {
        self.with_state(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_empty_queue_returns_none() {
        let source = InMemoryJobSource::new();
        assert!(source.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claims_oldest_first_and_increments_attempts() {
        let source = InMemoryJobSource::new();
        let now = Utc::now();
        source.submit(Job::new("new", "v2").with_created_at(now));
        source.submit(Job::new("old", "v1").with_created_at(now - Duration::seconds(30)));

        let job = source.claim().await.unwrap().unwrap();
        assert_eq!(job.id.as_str(), "old");
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);

        let job = source.claim().await.unwrap().unwrap();
        assert_eq!(job.id.as_str(), "new");
        assert!(source.claim().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        let source = Arc::new(InMemoryJobSource::new());
        source.submit(Job::new("only", "v1"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let source = Arc::clone(&source);
                tokio::spawn(async move { source.claim().await.unwrap() })
            })
            .collect();

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn test_fail_then_resubmit_keeps_attempts() {
        let source = InMemoryJobSource::new();
        source.submit(Job::new("j1", "v1"));

        let job = source.claim().await.unwrap().unwrap();
        source.fail(&job.id, "Attempt 1 failed: boom").await.unwrap();
        assert!(source.claim().await.unwrap().is_none());

        assert!(source.resubmit(&job.id));
        let again = source.claim().await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_complete_marks_done() {
        let source = InMemoryJobSource::new();
        source.submit(Job::new("j1", "v1"));
        let job = source.claim().await.unwrap().unwrap();

        source.complete(&job.id, &job.video_id).await.unwrap();
        let info = source.get_job_info(&job.id).await.unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Done);
        assert!(!source.resubmit(&job.id));
    }

    #[tokio::test]
    async fn test_pending_jobs_bounded() {
        let source = InMemoryJobSource::new();
        for i in 0..15 {
            source.submit(Job::new(format!("j{}", i), "v"));
        }
        assert_eq!(source.get_pending_jobs().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_unavailable_is_transient() {
        let source = InMemoryJobSource::new();
        source.set_unavailable(true);
        let err = source.claim().await.unwrap_err();
        assert!(err.is_transient());
        assert!(source.health_check().await.is_err());
    }
}
