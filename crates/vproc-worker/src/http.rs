//! Health and status endpoints for local runs and probes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::orchestrator::Orchestrator;

/// Shared state for the status routes.
#[derive(Clone)]
pub struct StatusState {
    pub orchestrator: Arc<Orchestrator>,
    /// Non-secret configuration echoed by `/stats`
    pub worker: Arc<Value>,
}

impl StatusState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: &WorkerConfig) -> Self {
        Self {
            orchestrator,
            worker: Arc::new(config.summary()),
        }
    }
}

pub fn create_router(state: StatusState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/jobs/peek", get(peek_jobs))
        .route("/stats", get(stats))
        .route("/stats/reset", post(reset_stats))
        .with_state(state)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

/// Serve the status routes on `port` until `shutdown` turns true.
pub async fn serve(
    port: u16,
    state: StatusState,
    metrics_handle: Option<PrometheusHandle>,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Status server listening on {}", addr);

    axum::serve(listener, create_router(state, metrics_handle))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!("Status server stopped");
    Ok(())
}

async fn healthz(State(state): State<StatusState>) -> Response {
    match state.orchestrator.source().health_check().await {
        Ok(()) => Json(json!({ "ok": true, "status": "healthy" })).into_response(),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "status": "unhealthy", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn peek_jobs(State(state): State<StatusState>) -> Response {
    match state.orchestrator.source().get_pending_jobs().await {
        Ok(jobs) => Json(json!({ "count": jobs.len(), "jobs": jobs })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn stats(State(state): State<StatusState>) -> Json<Value> {
    let storage = match state.orchestrator.storage().get_stats().await {
        Ok(stats) => stats,
        Err(e) => json!({ "error": e.to_string() }),
    };

    Json(json!({
        "worker": state.worker.as_ref(),
        "orchestrator": state.orchestrator.get_stats(),
        "storage": storage,
    }))
}

async fn reset_stats(State(state): State<StatusState>) -> Json<Value> {
    state.orchestrator.reset_stats();
    info!("Orchestrator statistics reset");
    Json(json!({ "ok": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use vproc_models::Job;
    use vproc_queue::{InMemoryJobSource, JobSource};
    use vproc_storage::InMemoryStorage;

    use crate::config::StageToggles;
    use crate::orchestrator::OrchestratorConfig;
    use crate::stages::Stages;

    fn setup() -> (Arc<InMemoryJobSource>, StatusState) {
        let config = WorkerConfig {
            stages: StageToggles {
                normalize: false,
                transcription: false,
                vision: false,
                embeddings: false,
            },
            ..Default::default()
        };
        let source = Arc::new(InMemoryJobSource::new());
        let orchestrator = Arc::new(Orchestrator::new(
            source.clone(),
            Arc::new(InMemoryStorage::new()),
            Stages::from_config(&config).unwrap(),
            OrchestratorConfig::default(),
        ));
        (source, StatusState::new(orchestrator, &config))
    }

    async fn call(state: StatusState, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = create_router(state, None)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_healthz_follows_job_source() {
        let (source, state) = setup();

        let (status, body) = call(state.clone(), "GET", "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "ok": true, "status": "healthy" }));

        source.set_unavailable(true);
        let (status, body) = call(state, "GET", "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_peek_lists_pending_jobs() {
        let (source, state) = setup();
        source.submit(Job::new("j1", "v1"));
        source.submit(Job::new("j2", "v2"));

        let (status, body) = call(state, "GET", "/jobs/peek").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["jobs"][0]["id"], "j1");
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let (source, state) = setup();
        source.submit(Job::new("j1", "unknown"));
        let job = source.claim().await.unwrap().unwrap();
        state.orchestrator.execute(&job).await;

        let (status, body) = call(state.clone(), "GET", "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["orchestrator"]["jobs_failed"], 1);
        assert_eq!(body["storage"]["backend"], "memory");
        assert_eq!(body["worker"]["job_source"], "postgres");
        assert!(body["worker"].get("openai_api_key").is_none());

        let (status, _) = call(state.clone(), "POST", "/stats/reset").await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(state, "GET", "/stats").await;
        assert_eq!(body["orchestrator"]["jobs_failed"], 0);
    }

    #[tokio::test]
    async fn test_metrics_route_absent_without_recorder() {
        let (_, state) = setup();
        let response = create_router(state, None)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
