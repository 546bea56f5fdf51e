//! Artifact storage for the video processing pipeline.
//!
//! This crate provides:
//! - The `StorageBackend` port used by the orchestrator
//! - A Postgres backend (`sqlx`, pgvector embeddings)
//! - An S3 backend storing JSON documents under a key prefix
//! - An in-memory backend for tests and local runs

pub mod backend;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod s3;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryStorage;
pub use postgres::{vector_literal, PostgresStorage};
pub use s3::{KeyLayout, S3Config, S3Storage, DEFAULT_S3_PREFIX};
