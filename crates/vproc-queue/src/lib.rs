//! Job sources for the video processing worker.
//!
//! This crate provides:
//! - The `JobSource` port used by the worker loop and orchestrator
//! - A Postgres source claiming rows with `FOR UPDATE SKIP LOCKED`
//! - An SQS source with long polling
//! - A push-based webhook source with HMAC signature checks
//! - An in-memory source for tests and local runs

pub mod error;
pub mod memory;
pub mod postgres;
pub mod source;
pub mod sqs;
pub mod webhook;

pub use error::{QueueError, QueueResult};
pub use memory::InMemoryJobSource;
pub use postgres::{PostgresJobSource, PostgresQueueConfig};
pub use source::{JobSource, PENDING_JOBS_LIMIT};
pub use sqs::{SqsConfig, SqsJobSource};
pub use webhook::{sign_payload, verify_signature, WebhookConfig, WebhookJobSource};
