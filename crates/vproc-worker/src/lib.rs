//! Video processing worker.
//!
//! This crate provides:
//! - Configuration from the environment
//! - The pipeline orchestrator (normalize, transcribe, scenes, frames,
//!   vision, embeddings) with processing statistics
//! - A polling worker loop with geometric backoff and a webhook consumer
//! - Health and status endpoints
//! - Graceful shutdown

pub mod config;
pub mod embedding;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod service;
pub mod stages;
pub mod worker;

pub use config::{JobSourceType, StageToggles, StorageType, WorkerConfig};
pub use error::{ErrorKind, WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use orchestrator::{Orchestrator, OrchestratorConfig, StatsSnapshot};
pub use service::WorkerService;
pub use stages::Stages;
pub use worker::{BackoffPolicy, Worker};
