//! Postgres job source.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never block on,
//! or double-claim, the same row.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use vproc_models::{Job, JobId, JobStatus, VideoId, VideoStatus};

use crate::error::{QueueError, QueueResult};
use crate::source::{JobSource, PENDING_JOBS_LIMIT};

const JOB_COLUMNS: &str = "id, video_id, status, attempts, error, created_at";

const CLAIM_SQL: &str = r#"
    WITH next AS (
        SELECT id
        FROM jobs
        WHERE status = 'pending'
        ORDER BY created_at
        FOR UPDATE SKIP LOCKED
        LIMIT 1
    )
    UPDATE jobs j
    SET status = 'processing',
        attempts = COALESCE(j.attempts, 0) + 1
    FROM next
    WHERE j.id = next.id
    RETURNING j.id, j.video_id, j.status, j.attempts, j.error, j.created_at
"#;

/// Connection settings for the Postgres source.
#[derive(Debug, Clone)]
pub struct PostgresQueueConfig {
    pub database_url: String,
    pub pool_size: u32,
    /// Connect and acquire timeout in seconds
    pub timeout_secs: u64,
}

impl PostgresQueueConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool_size: 5,
            timeout_secs: 10,
        }
    }
}

/// Job source backed by the `jobs` table.
#[derive(Clone)]
pub struct PostgresJobSource {
    pool: PgPool,
}

impl PostgresJobSource {
    /// Connect, then prepare the schema extensions the pipeline relies on.
    pub async fn connect(config: &PostgresQueueConfig) -> QueueResult<Self> {
        if config.database_url.is_empty() {
            return Err(QueueError::config_error("DATABASE_URL not set"));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.max(1))
            .acquire_timeout(Duration::from_secs(config.timeout_secs))
            .connect(&config.database_url)
            .await?;

        info!(pool_size = config.pool_size, "Connected to Postgres job source");

        let source = Self::from_pool(pool);
        source.bootstrap().await?;
        Ok(source)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Pool shared with the Postgres storage backend.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enable pgvector and migrate a legacy integer `frames.phash` column to
    /// hex text.
    pub async fn bootstrap(&self) -> QueueResult<()> {
        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
        {
            warn!("Could not create pgvector extension: {}", e);
        }

        let phash_type: Option<String> = sqlx::query_scalar(
            r#"
            SELECT data_type::text
            FROM information_schema.columns
            WHERE table_name = 'frames' AND column_name = 'phash'
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        if phash_type.as_deref() == Some("bigint") {
            info!("Migrating frames.phash from BIGINT to TEXT");
            sqlx::query(
                "ALTER TABLE frames ALTER COLUMN phash TYPE TEXT USING lpad(to_hex(phash), 16, '0')",
            )
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Put a failed job back into the queue. Its attempt counter is kept.
    pub async fn resubmit(&self, job_id: &JobId) -> QueueResult<bool> {
        let result = sqlx::query("UPDATE jobs SET status = 'pending' WHERE id = $1 AND status = 'failed'")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Map a `jobs` row onto a [`Job`].
fn job_from_row(row: &PgRow) -> QueueResult<Job> {
    let id: String = row.try_get("id")?;
    let video_id: String = row.try_get("video_id")?;
    let status: String = row.try_get("status")?;
    let attempts: Option<i32> = row.try_get("attempts")?;
    let error: Option<String> = row.try_get("error")?;
    let created_at: Option<DateTime<Utc>> = row.try_get("created_at")?;

    let status: JobStatus = status
        .parse()
        .map_err(|e| QueueError::invalid_job(format!("job {}: {}", id, e)))?;

    let mut job = Job::new(id, video_id)
        .with_status(status)
        .with_attempts(attempts.unwrap_or(0).max(0) as u32);
    job.error = error;
    job.created_at = created_at;
    Ok(job)
}

#[async_trait]
impl JobSource for PostgresJobSource {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn claim(&self) -> QueueResult<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query(CLAIM_SQL).fetch_optional(&mut *tx).await? else {
            // Nothing pending; dropping the transaction rolls it back.
            return Ok(None);
        };
        let job = job_from_row(&row)?;

        sqlx::query("UPDATE videos SET status = $1 WHERE id = $2")
            .bind(VideoStatus::Processing.as_str())
            .bind(job.video_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(job_id = %job.id, attempts = job.attempts, "Claimed job");
        Ok(Some(job))
    }

    async fn complete(&self, job_id: &JobId, video_id: &VideoId) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE jobs SET status = 'done' WHERE id = $1")
            .bind(job_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE videos SET status = $1 WHERE id = $2")
            .bind(VideoStatus::Ready.as_str())
            .bind(video_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE jobs SET status = 'failed', error = $2 WHERE id = $1")
            .bind(job_id.as_str())
            .bind(error)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE videos SET status = $1 WHERE id = (SELECT video_id FROM jobs WHERE id = $2)")
            .bind(VideoStatus::Failed.as_str())
            .bind(job_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_job_info(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn get_pending_jobs(&self) -> QueueResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM jobs WHERE status = 'pending' ORDER BY created_at LIMIT $1",
            JOB_COLUMNS
        ))
        .bind(PENDING_JOBS_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn health_check(&self) -> QueueResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
