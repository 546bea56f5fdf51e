//! Push-based job source.
//!
//! Jobs arrive over HTTP and are queued on a bounded channel. A single
//! consumer drains the channel, so jobs run one at a time exactly as they do
//! under the polling loop. `claim` always returns `None`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use vproc_models::{Job, JobId, JobStatus, VideoId};

use crate::error::{QueueError, QueueResult};
use crate::source::{JobSource, PENDING_JOBS_LIMIT};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex HMAC of the body>`.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Configuration for the webhook source.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub port: u16,
    /// HMAC-SHA256 secret; signatures are not checked when unset
    pub secret: Option<String>,
    /// Public URL advertised to senders
    pub public_url: Option<String>,
    /// Jobs buffered before the endpoint answers 503
    pub channel_capacity: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            secret: None,
            public_url: None,
            channel_capacity: 100,
        }
    }
}

/// Compute the signature header value for a body.
pub fn sign_payload(secret: &str, body: &[u8]) -> QueueResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| QueueError::config_error(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` signature against the body.
pub fn verify_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(signature) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Deserialize)]
struct WebhookJobRequest {
    id: String,
    video_id: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

struct WebhookState {
    secret: Option<String>,
    sender: mpsc::Sender<Job>,
    jobs: Mutex<HashMap<String, Job>>,
}

/// Job source fed by `POST /webhook/job`.
pub struct WebhookJobSource {
    config: WebhookConfig,
    state: Arc<WebhookState>,
    receiver: Mutex<Option<mpsc::Receiver<Job>>>,
}

impl WebhookJobSource {
    pub fn new(config: WebhookConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_capacity.max(1));
        let state = Arc::new(WebhookState {
            secret: config.secret.clone().filter(|s| !s.is_empty()),
            sender,
            jobs: Mutex::new(HashMap::new()),
        });

        Self {
            config,
            state,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Take the receiving end of the job channel. Only one consumer may
    /// exist; later calls return `None`.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Job>> {
        self.receiver.lock().take()
    }

    /// Mark a delivered job as started and return the updated record.
    pub fn begin(&self, job: Job) -> Job {
        let mut jobs = self.state.jobs.lock();
        let attempts = jobs
            .get(job.id.as_str())
            .map(|j| j.attempts)
            .unwrap_or(job.attempts);
        let job = job
            .with_status(JobStatus::Processing)
            .with_attempts(attempts + 1);
        jobs.insert(job.id.as_str().to_string(), job.clone());
        job
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhook/job", post(receive_job))
            .route("/webhook/health", get(webhook_health))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve the webhook endpoints until `shutdown` turns true.
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(
            "Webhook listening on {} (public url: {})",
            addr,
            self.config.public_url.as_deref().unwrap_or("unset")
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                while !*shutdown.borrow() {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| QueueError::Server(e.to_string()))
    }

    fn set_outcome(&self, job_id: &JobId, status: JobStatus, error: Option<&str>) {
        if let Some(job) = self.state.jobs.lock().get_mut(job_id.as_str()) {
            job.status = status;
            job.error = error.map(str::to_string);
        }
    }
}

async fn receive_job(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = &state.secret {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, &body, header) {
            warn!("Rejected webhook with invalid signature");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid signature" })),
            )
                .into_response();
        }
    }

    let request: WebhookJobRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid job payload: {}", e) })),
            )
                .into_response();
        }
    };
    if request.id.is_empty() || request.video_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "id and video_id are required" })),
        )
            .into_response();
    }

    let mut job = Job::new(request.id, request.video_id);
    job.metadata = request.metadata;
    if let Some(created_at) = request.created_at {
        job = job.with_created_at(created_at);
    }
    let job_id = job.id.clone();

    let previous = state.jobs.lock().get(job_id.as_str()).cloned();
    let attempts = previous.map(|j| j.attempts).unwrap_or(0);
    let record = job.clone().with_attempts(attempts);

    match state.sender.try_send(job) {
        Ok(()) => {
            state
                .jobs
                .lock()
                .insert(job_id.as_str().to_string(), record);
            info!(job_id = %job_id, "Webhook job received");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "received", "job_id": job_id })),
            )
                .into_response()
        }
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(job_id = %job_id, "Webhook queue full, rejecting job");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "queue full" })),
            )
                .into_response()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "worker shutting down" })),
        )
            .into_response(),
    }
}

async fn webhook_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy", "adapter": "webhook" }))
}

#[async_trait]
impl JobSource for WebhookJobSource {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn claim(&self) -> QueueResult<Option<Job>> {
        Ok(None)
    }

    async fn complete(&self, job_id: &JobId, _video_id: &VideoId) -> QueueResult<()> {
        self.set_outcome(job_id, JobStatus::Done, None);
        Ok(())
    }

    async fn fail(&self, job_id: &JobId, error: &str) -> QueueResult<()> {
        self.set_outcome(job_id, JobStatus::Failed, Some(error));
        Ok(())
    }

    async fn get_job_info(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.state.jobs.lock().get(job_id.as_str()).cloned())
    }

    async fn get_pending_jobs(&self) -> QueueResult<Vec<Job>> {
        let mut pending: Vec<Job> = self
            .state
            .jobs
            .lock()
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.created_at);
        pending.truncate(PENDING_JOBS_LIMIT as usize);
        Ok(pending)
    }

    async fn health_check(&self) -> QueueResult<()> {
        if self.state.sender.is_closed() {
            return Err(QueueError::Server("job channel closed".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn job_request(body: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook/job")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header(SIGNATURE_HEADER, sig);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"id":"j1","video_id":"v1"}"#;
        let signature = sign_payload("s3cret", body).unwrap();
        assert!(signature.starts_with("sha256="));
        assert!(verify_signature("s3cret", body, Some(&signature)));
        assert!(!verify_signature("other", body, Some(&signature)));
        assert!(!verify_signature("s3cret", b"tampered", Some(&signature)));
        assert!(!verify_signature("s3cret", body, Some("sha256=zz")));
        assert!(!verify_signature("s3cret", body, None));
    }

    #[tokio::test]
    async fn test_accepts_job_and_queues_it() {
        let source = WebhookJobSource::new(WebhookConfig::default());
        let mut receiver = source.take_receiver().unwrap();

        let response = source
            .router()
            .oneshot(job_request(r#"{"id":"j1","video_id":"v1"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.id.as_str(), "j1");
        assert_eq!(source.get_pending_jobs().await.unwrap().len(), 1);

        let started = source.begin(job);
        assert_eq!(started.attempts, 1);
        assert_eq!(started.status, JobStatus::Processing);
        assert!(source.get_pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let source = WebhookJobSource::new(WebhookConfig {
            secret: Some("s3cret".to_string()),
            ..Default::default()
        });
        let body = r#"{"id":"j1","video_id":"v1"}"#;

        let response = source
            .router()
            .oneshot(job_request(body, Some("sha256=00")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let signature = sign_payload("s3cret", body.as_bytes()).unwrap();
        let response = source
            .router()
            .oneshot(job_request(body, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_full_channel_returns_503() {
        let source = WebhookJobSource::new(WebhookConfig {
            channel_capacity: 1,
            ..Default::default()
        });
        let _receiver = source.take_receiver().unwrap();

        let first = source
            .router()
            .oneshot(job_request(r#"{"id":"j1","video_id":"v1"}"#, None))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = source
            .router()
            .oneshot(job_request(r#"{"id":"j2","video_id":"v2"}"#, None))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_400() {
        let source = WebhookJobSource::new(WebhookConfig::default());
        let response = source
            .router()
            .oneshot(job_request(r#"{"video_id":"v1"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_claim_is_always_empty_and_outcomes_recorded() {
        let source = WebhookJobSource::new(WebhookConfig::default());
        let mut receiver = source.take_receiver().unwrap();
        assert!(source.take_receiver().is_none());

        source
            .router()
            .oneshot(job_request(r#"{"id":"j1","video_id":"v1"}"#, None))
            .await
            .unwrap();
        let job = source.begin(receiver.recv().await.unwrap());

        assert!(source.claim().await.unwrap().is_none());
        source.fail(&job.id, "Attempt 1 failed: boom").await.unwrap();

        let info = source.get_job_info(&job.id).await.unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert_eq!(info.error.as_deref(), Some("Attempt 1 failed: boom"));
    }

    #[tokio::test]
    async fn test_health_route() {
        let source = WebhookJobSource::new(WebhookConfig::default());
        let response = source
            .router()
            .oneshot(
                Request::builder()
                    .uri("/webhook/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
