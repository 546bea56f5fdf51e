//! Postgres job source integration tests.

use std::sync::Arc;

use sqlx::PgPool;

use vproc_models::{JobId, JobStatus};
use vproc_queue::{JobSource, PostgresJobSource, PostgresQueueConfig};

const SCHEMA: &str = include_str!("../../vproc-storage/sql/schema.sql");

async fn connect() -> PostgresJobSource {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let source = PostgresJobSource::connect(&PostgresQueueConfig::new(url))
        .await
        .expect("connect");
    sqlx::raw_sql(SCHEMA)
        .execute(source.pool())
        .await
        .expect("apply schema");
    source
}

/// Clear pending jobs left by other runs so claims only see this test's rows.
async fn isolate(pool: &PgPool) {
    sqlx::query("UPDATE jobs SET status = 'failed' WHERE status = 'pending'")
        .execute(pool)
        .await
        .expect("isolate");
}

async fn insert_job(pool: &PgPool) -> JobId {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let video_id = format!("it_video_{}", suffix);
    let job_id = format!("it_job_{}", suffix);

    sqlx::query("INSERT INTO videos (id, original_path) VALUES ($1, 'uploads/x.mp4')")
        .bind(&video_id)
        .execute(pool)
        .await
        .expect("insert video");
    sqlx::query("INSERT INTO jobs (id, video_id) VALUES ($1, $2)")
        .bind(&job_id)
        .bind(&video_id)
        .execute(pool)
        .await
        .expect("insert job");

    JobId::from(job_id)
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_concurrent_claims_are_exclusive() {
    let source = Arc::new(connect().await);
    isolate(source.pool()).await;
    let job_id = insert_job(source.pool()).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let source = Arc::clone(&source);
            tokio::spawn(async move { source.claim().await.expect("claim") })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(job) = handle.await.expect("join") {
            claimed.push(job);
        }
    }

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, job_id);
    assert_eq!(claimed[0].attempts, 1);
    assert_eq!(claimed[0].status, JobStatus::Processing);
}

#[tokio::test]
#[ignore = "requires Postgres"]
async fn test_fail_resubmit_and_complete() {
    let source = connect().await;
    isolate(source.pool()).await;
    let job_id = insert_job(source.pool()).await;

    let job = source.claim().await.unwrap().expect("job");
    source.fail(&job.id, "Attempt 1 failed: boom").await.unwrap();

    let info = source.get_job_info(&job_id).await.unwrap().expect("info");
    assert_eq!(info.status, JobStatus::Failed);
    assert_eq!(info.error.as_deref(), Some("Attempt 1 failed: boom"));

    assert!(source.resubmit(&job_id).await.unwrap());
    let pending = source.get_pending_jobs().await.unwrap();
    assert!(pending.iter().any(|j| j.id == job_id));

    let job = source.claim().await.unwrap().expect("job");
    assert_eq!(job.attempts, 2);

    source.complete(&job.id, &job.video_id).await.unwrap();
    let video_status: String = sqlx::query_scalar("SELECT status FROM videos WHERE id = $1")
        .bind(job.video_id.as_str())
        .fetch_one(source.pool())
        .await
        .unwrap();
    assert_eq!(video_status, "ready");
}
