//! Worker assembly: backends from configuration, then the run loop.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use vproc_models::Job;
use vproc_queue::{
    JobSource, PostgresJobSource, PostgresQueueConfig, SqsConfig, SqsJobSource, WebhookConfig,
    WebhookJobSource,
};
use vproc_storage::{PostgresStorage, S3Config, S3Storage, StorageBackend};

use crate::config::{JobSourceType, StorageType, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::http::{self, StatusState};
use crate::metrics;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::retry::ConnectRetry;
use crate::stages::Stages;
use crate::worker::{BackoffPolicy, Worker};

/// A fully wired worker.
pub struct WorkerService {
    config: WorkerConfig,
    orchestrator: Arc<Orchestrator>,
    /// Set when jobs are pushed over HTTP instead of polled
    webhook: Option<Arc<WebhookJobSource>>,
}

impl WorkerService {
    /// Connect the configured job source and storage and build the stages.
    pub async fn from_config(config: WorkerConfig) -> WorkerResult<Self> {
        let source_type = config.job_source_type()?;
        let storage_type = config.storage_type()?;

        // One pool serves both the job source and the storage when both are
        // Postgres.
        let mut postgres: Option<PostgresJobSource> = None;
        let mut webhook = None;

        let source: Arc<dyn JobSource> = match source_type {
            JobSourceType::Postgres => Arc::new(shared_postgres(&mut postgres, &config).await?),
            JobSourceType::Sqs => {
                let queue_url = config
                    .sqs_queue_url
                    .clone()
                    .ok_or_else(|| WorkerError::config_error("AWS_SQS_QUEUE_URL not set"))?;
                Arc::new(
                    SqsJobSource::new(SqsConfig {
                        queue_url,
                        region: config.aws_region.clone(),
                        max_messages: config.sqs_max_messages,
                        wait_time_secs: config.sqs_wait_time_secs,
                    })
                    .await?,
                )
            }
            JobSourceType::Webhook => {
                let source = Arc::new(WebhookJobSource::new(WebhookConfig {
                    port: config.webhook_port,
                    secret: config.webhook_secret.clone(),
                    public_url: config.webhook_url.clone(),
                    ..Default::default()
                }));
                webhook = Some(Arc::clone(&source));
                source
            }
        };

        let storage: Arc<dyn StorageBackend> = match storage_type {
            StorageType::Postgres => {
                let pg = shared_postgres(&mut postgres, &config).await?;
                Arc::new(PostgresStorage::new(pg.pool().clone()))
            }
            StorageType::S3 => {
                let bucket = config
                    .s3_bucket
                    .clone()
                    .ok_or_else(|| WorkerError::config_error("AWS_S3_BUCKET not set"))?;
                Arc::new(
                    S3Storage::new(S3Config {
                        bucket,
                        prefix: config.s3_prefix.clone(),
                        region: config.aws_region.clone(),
                        endpoint_url: config.s3_endpoint_url.clone(),
                    })
                    .await?,
                )
            }
        };

        info!(
            job_source = source.name(),
            storage = storage.name(),
            "Backends ready"
        );

        let stages = Stages::from_config(&config)?;
        let orchestrator = Arc::new(Orchestrator::new(
            source,
            storage,
            stages,
            OrchestratorConfig {
                max_attempts: config.max_attempts,
                vision_concurrency: config.vision_concurrency,
                data_dir: config.data_dir.clone(),
            },
        ));

        Ok(Self {
            config,
            orchestrator,
            webhook,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Run until `shutdown` turns true. A job in flight always finishes.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        let mut background = Vec::new();

        if self.config.dev_http {
            let metrics_handle = match metrics::init_metrics() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Metrics disabled: {}", e);
                    None
                }
            };
            let state = StatusState::new(Arc::clone(&self.orchestrator), &self.config);
            let port = self.config.http_port;
            let rx = shutdown.clone();
            background.push(tokio::spawn(async move {
                if let Err(e) = http::serve(port, state, metrics_handle, rx).await {
                    error!("Status server failed: {}", e);
                }
            }));
        }

        match self.webhook {
            Some(webhook) => {
                let receiver = webhook
                    .take_receiver()
                    .ok_or_else(|| WorkerError::config_error("Webhook job channel already taken"))?;

                let server = Arc::clone(&webhook);
                let rx = shutdown.clone();
                background.push(tokio::spawn(async move {
                    if let Err(e) = server.serve(rx).await {
                        error!("Webhook server failed: {}", e);
                    }
                }));

                let processed =
                    run_webhook_consumer(self.orchestrator, webhook, receiver, shutdown).await;
                info!("Webhook consumer stopped after {} jobs", processed);
            }
            None => {
                let mut worker =
                    Worker::new(self.orchestrator, BackoffPolicy::from_config(&self.config));
                worker.run(shutdown).await;
            }
        }

        for task in background {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        info!("Worker service stopped");
        Ok(())
    }
}

/// Connect to Postgres once, retrying while the database comes up.
async fn shared_postgres(
    slot: &mut Option<PostgresJobSource>,
    config: &WorkerConfig,
) -> WorkerResult<PostgresJobSource> {
    if let Some(existing) = slot {
        return Ok(existing.clone());
    }

    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| WorkerError::config_error("DATABASE_URL not set"))?;
    let pg_config = PostgresQueueConfig {
        database_url,
        pool_size: config.postgres_pool_size,
        timeout_secs: config.postgres_timeout.as_secs(),
    };

    let source = ConnectRetry::default()
        .run("postgres", || PostgresJobSource::connect(&pg_config))
        .await?;

    *slot = Some(source.clone());
    Ok(source)
}

/// Feed pushed jobs through the orchestrator one at a time until shutdown.
///
/// Returns the number of jobs executed.
pub async fn run_webhook_consumer(
    orchestrator: Arc<Orchestrator>,
    webhook: Arc<WebhookJobSource>,
    mut receiver: mpsc::Receiver<Job>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut processed = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = tokio::select! {
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let job = webhook.begin(job);
        let job_id = job.id.clone();
        let orchestrator = Arc::clone(&orchestrator);
        if let Err(e) = tokio::spawn(async move { orchestrator.execute(&job).await }).await {
            error!(job_id = %job_id, "Job execution aborted: {}", e);
        }
        processed += 1;
    }

    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use vproc_models::{JobId, JobStatus};
    use vproc_storage::InMemoryStorage;

    use crate::config::StageToggles;

    fn push(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/job")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn wait_for_status(source: &WebhookJobSource, id: &str, status: JobStatus) {
        for _ in 0..200 {
            let job = source.get_job_info(&JobId::from(id)).await.unwrap();
            if job.map(|j| j.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn test_webhook_jobs_run_through_orchestrator() {
        let config = WorkerConfig {
            stages: StageToggles {
                normalize: false,
                transcription: false,
                vision: false,
                embeddings: false,
            },
            ..Default::default()
        };
        let webhook = Arc::new(WebhookJobSource::new(WebhookConfig::default()));
        let orchestrator = Arc::new(Orchestrator::new(
            webhook.clone(),
            Arc::new(InMemoryStorage::new()),
            Stages::from_config(&config).unwrap(),
            OrchestratorConfig::default(),
        ));
        let receiver = webhook.take_receiver().unwrap();
        let (tx, rx) = watch::channel(false);

        let consumer = tokio::spawn(run_webhook_consumer(
            Arc::clone(&orchestrator),
            Arc::clone(&webhook),
            receiver,
            rx,
        ));

        for body in [r#"{"id":"j1","video_id":"v1"}"#, r#"{"id":"j2","video_id":"v2"}"#] {
            let response = webhook.router().oneshot(push(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }

        // Neither video exists, so both jobs fail after one attempt.
        wait_for_status(&webhook, "j1", JobStatus::Failed).await;
        wait_for_status(&webhook, "j2", JobStatus::Failed).await;

        tx.send(true).unwrap();
        assert_eq!(consumer.await.unwrap(), 2);

        let job = webhook.get_job_info(&JobId::from("j2")).await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert!(job.error.unwrap().starts_with("Attempt 1 failed"));
        assert_eq!(orchestrator.get_stats().jobs_failed, 2);
    }

    #[tokio::test]
    async fn test_webhook_consumer_stops_on_shutdown() {
        let webhook = Arc::new(WebhookJobSource::new(WebhookConfig::default()));
        let config = WorkerConfig {
            stages: StageToggles {
                normalize: false,
                transcription: false,
                vision: false,
                embeddings: false,
            },
            ..Default::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(
            webhook.clone(),
            Arc::new(InMemoryStorage::new()),
            Stages::from_config(&config).unwrap(),
            OrchestratorConfig::default(),
        ));
        let receiver = webhook.take_receiver().unwrap();
        let (tx, rx) = watch::channel(false);

        let consumer = tokio::spawn(run_webhook_consumer(orchestrator, webhook, receiver, rx));
        tx.send(true).unwrap();

        assert_eq!(consumer.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_backend_is_rejected() {
        let config = WorkerConfig {
            job_source: "redis".to_string(),
            ..Default::default()
        };
        let err = WorkerService::from_config(config).await.err().unwrap();
        assert!(err.to_string().contains("redis"));
    }
}
