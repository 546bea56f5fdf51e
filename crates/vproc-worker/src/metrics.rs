//! Prometheus metrics for the worker.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use vproc_models::Stage;

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> WorkerResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| WorkerError::config_error(format!("Failed to install Prometheus recorder: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_PROCESSED_TOTAL: &str = "vproc_jobs_processed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vproc_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "vproc_job_duration_seconds";
    pub const STAGE_FAILURES_TOTAL: &str = "vproc_stage_failures_total";
    pub const FRAMES_DEGRADED_TOTAL: &str = "vproc_frames_degraded_total";
}

/// Record a successful job.
pub fn record_job_processed(duration_secs: f64) {
    counter!(names::JOBS_PROCESSED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed job and the stage it failed in (`None` before any stage).
pub fn record_job_failed(stage: Option<Stage>, duration_secs: f64) {
    counter!(names::JOBS_FAILED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);

    let stage = stage.map(|s| s.as_str()).unwrap_or("start");
    counter!(names::STAGE_FAILURES_TOTAL, "stage" => stage).increment(1);
}

pub fn record_frames_degraded(count: usize) {
    if count > 0 {
        counter!(names::FRAMES_DEGRADED_TOTAL).increment(count as u64);
    }
}
