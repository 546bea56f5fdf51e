//! SQS job source.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use vproc_models::{Job, JobId, JobStatus, VideoId};

use crate::error::{QueueError, QueueResult};
use crate::source::JobSource;

/// Configuration for the SQS source.
#[derive(Debug, Clone)]
pub struct SqsConfig {
    pub queue_url: String,
    pub region: String,
    /// Messages requested per receive (1..=10)
    pub max_messages: i32,
    /// Long-poll wait in seconds (0..=20)
    pub wait_time_secs: i32,
}

impl SqsConfig {
    pub fn new(queue_url: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            region: "us-east-1".to_string(),
            max_messages: 1,
            wait_time_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobPayload {
    id: String,
    video_id: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    job: JobPayload,
}

/// Parse a message body: `{"job": {...}}` or a bare job object.
pub fn parse_message_body(body: &str) -> QueueResult<Job> {
    let payload = match serde_json::from_str::<Envelope>(body) {
        Ok(envelope) => envelope.job,
        Err(_) => serde_json::from_str::<JobPayload>(body)
            .map_err(|e| QueueError::invalid_job(format!("unrecognised message body: {}", e)))?,
    };

    if payload.id.is_empty() || payload.video_id.is_empty() {
        return Err(QueueError::invalid_job("job id and video_id are required"));
    }

    let mut job = Job::new(payload.id, payload.video_id);
    job.metadata = payload.metadata;
    Ok(job)
}

fn receive_count(message: &Message) -> u32 {
    message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|count| count.parse().ok())
        .unwrap_or(1)
}

/// Job source polling an SQS queue.
///
/// SQS has no job rows: a claimed message stays invisible for the queue's
/// visibility timeout, `attempts` is the message receive count, and both
/// `complete` and `fail` delete the message.
pub struct SqsJobSource {
    client: Client,
    config: SqsConfig,
    receipts: Mutex<HashMap<String, String>>,
}

impl SqsJobSource {
    /// Create a client using the default AWS credential chain.
    pub async fn new(config: SqsConfig) -> QueueResult<Self> {
        if config.queue_url.is_empty() {
            return Err(QueueError::config_error("AWS_SQS_QUEUE_URL not set"));
        }

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        Ok(Self::from_client(Client::new(&sdk_config), config))
    }

    pub fn from_client(client: Client, config: SqsConfig) -> Self {
        Self {
            client,
            config,
            receipts: Mutex::new(HashMap::new()),
        }
    }

    async fn delete_message(&self, receipt_handle: &str) -> QueueResult<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::sqs(e.to_string()))?;
        Ok(())
    }

    async fn release(&self, job_id: &JobId) -> QueueResult<()> {
        let receipt = self.receipts.lock().remove(job_id.as_str());
        match receipt {
            Some(handle) => self.delete_message(&handle).await,
            None => {
                warn!(job_id = %job_id, "No receipt handle for job, ignoring");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl JobSource for SqsJobSource {
    fn name(&self) -> &'static str {
        "sqs"
    }

    async fn claim(&self) -> QueueResult<Option<Job>> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(self.config.max_messages.clamp(1, 10))
            .wait_time_seconds(self.config.wait_time_secs.clamp(0, 20))
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(|e| QueueError::sqs(e.to_string()))?;

        let messages = response.messages();
        let Some(message) = messages.first() else {
            return Ok(None);
        };
        if messages.len() > 1 {
            debug!(
                "Received {} messages, the rest become visible again after the timeout",
                messages.len()
            );
        }

        let receipt_handle = message.receipt_handle().unwrap_or_default().to_string();
        let body = message.body().unwrap_or_default();

        let job = match parse_message_body(body) {
            Ok(job) => job,
            Err(e) => {
                warn!("Dropping malformed SQS message: {}", e);
                if !receipt_handle.is_empty() {
                    self.delete_message(&receipt_handle).await?;
                }
                return Ok(None);
            }
        };

        let job = job
            .with_status(JobStatus::Processing)
            .with_attempts(receive_count(message));

        self.receipts
            .lock()
            .insert(job.id.as_str().to_string(), receipt_handle);

        info!(job_id = %job.id, attempts = job.attempts, "Received job from SQS");
        Ok(Some(job))
    }

    async fn complete(&self, job_id: &JobId, _video_id: &VideoId) -> QueueResult<()> {
        self.release(job_id).await
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        warn!(job_id = %job_id, "Job failed: {}", error);
        self.release(job_id).await
    }

    async fn get_job_info(&self, _job_id: &JobId) -> QueueResult<Option<Job>> {
        Ok(None)
    }

    async fn get_pending_jobs(&self) -> QueueResult<Vec<Job>> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> QueueResult<()> {
        self.client
            .get_queue_attributes()
            .queue_url(&self.config.queue_url)
            .send()
            .await
            .map_err(|e| QueueError::sqs(e.to_string()))?;
        Ok(())
    }
}
