//! Worker configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vproc_media::DEFAULT_DATA_DIR;
use vproc_ml_client::DEFAULT_BASE_URL;
use vproc_storage::DEFAULT_S3_PREFIX;

use crate::error::{WorkerError, WorkerResult};

/// Where jobs come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSourceType {
    Postgres,
    Sqs,
    Webhook,
}

impl FromStr for JobSourceType {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(JobSourceType::Postgres),
            "sqs" => Ok(JobSourceType::Sqs),
            "webhook" => Ok(JobSourceType::Webhook),
            other => Err(WorkerError::config_error(format!(
                "Unknown JOB_SOURCE_TYPE '{}' (expected postgres, sqs or webhook)",
                other
            ))),
        }
    }
}

impl fmt::Display for JobSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSourceType::Postgres => write!(f, "postgres"),
            JobSourceType::Sqs => write!(f, "sqs"),
            JobSourceType::Webhook => write!(f, "webhook"),
        }
    }
}

/// Where pipeline artifacts are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Postgres,
    S3,
}

impl FromStr for StorageType {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageType::Postgres),
            "s3" => Ok(StorageType::S3),
            other => Err(WorkerError::config_error(format!(
                "Unknown STORAGE_TYPE '{}' (expected postgres or s3)",
                other
            ))),
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Postgres => write!(f, "postgres"),
            StorageType::S3 => write!(f, "s3"),
        }
    }
}

/// Per-stage switches. Scene detection and frame extraction always run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageToggles {
    pub normalize: bool,
    pub transcription: bool,
    pub vision: bool,
    pub embeddings: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            normalize: true,
            transcription: true,
            vision: true,
            embeddings: true,
        }
    }
}

impl StageToggles {
    /// Whether any stage needs the AI API.
    pub fn needs_ai(&self) -> bool {
        self.transcription || self.vision || self.embeddings
    }
}

/// Worker configuration.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Raw `JOB_SOURCE_TYPE`; parsed by [`WorkerConfig::job_source_type`]
    pub job_source: String,
    /// Raw `STORAGE_TYPE`; parsed by [`WorkerConfig::storage_type`]
    pub storage: String,

    pub database_url: Option<String>,
    pub postgres_pool_size: u32,
    pub postgres_timeout: Duration,

    pub sqs_queue_url: Option<String>,
    pub aws_region: String,
    pub sqs_max_messages: i32,
    pub sqs_wait_time_secs: i32,

    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_port: u16,

    pub s3_bucket: Option<String>,
    pub s3_prefix: String,
    pub s3_endpoint_url: Option<String>,

    /// Frames kept per video after deduplication
    pub max_frames_per_video: usize,
    /// Hamming distance at or below which frames are duplicates
    pub frame_dedup_threshold: u32,

    /// Initial and reset poll interval
    pub poll_interval: Duration,
    /// Attempts before a failure is permanent
    pub max_attempts: u32,
    /// Backoff growth per empty poll (> 1)
    pub backoff_multiplier: f64,
    /// Backoff cap
    pub max_backoff: Duration,

    pub stages: StageToggles,
    /// Concurrent vision requests per job
    pub vision_concurrency: usize,

    pub openai_api_key: Option<String>,
    pub openai_base_url: String,

    /// Serve the health/status endpoints
    pub dev_http: bool,
    pub http_port: u16,

    /// Working data directory
    pub data_dir: PathBuf,
}

impl fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("job_source", &self.job_source)
            .field("storage", &self.storage)
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("sqs_queue_url", &self.sqs_queue_url)
            .field("aws_region", &self.aws_region)
            .field("webhook_port", &self.webhook_port)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "<set>"))
            .field("s3_bucket", &self.s3_bucket)
            .field("s3_prefix", &self.s3_prefix)
            .field("max_frames_per_video", &self.max_frames_per_video)
            .field("frame_dedup_threshold", &self.frame_dedup_threshold)
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_backoff", &self.max_backoff)
            .field("stages", &self.stages)
            .field("vision_concurrency", &self.vision_concurrency)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<set>"))
            .field("openai_base_url", &self.openai_base_url)
            .field("dev_http", &self.dev_http)
            .field("http_port", &self.http_port)
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            job_source: "postgres".to_string(),
            storage: "postgres".to_string(),
            database_url: None,
            postgres_pool_size: 5,
            postgres_timeout: Duration::from_secs(10),
            sqs_queue_url: None,
            aws_region: "us-east-1".to_string(),
            sqs_max_messages: 1,
            sqs_wait_time_secs: 20,
            webhook_url: None,
            webhook_secret: None,
            webhook_port: 8080,
            s3_bucket: None,
            s3_prefix: DEFAULT_S3_PREFIX.to_string(),
            s3_endpoint_url: None,
            max_frames_per_video: 50,
            frame_dedup_threshold: 6,
            poll_interval: Duration::from_millis(1500),
            max_attempts: 3,
            backoff_multiplier: 1.5,
            max_backoff: Duration::from_millis(12_000),
            stages: StageToggles::default(),
            vision_concurrency: 5,
            openai_api_key: None,
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            dev_http: false,
            http_port: 8000,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }
}

/// Parse a boolean flag: `true`/`1`/`yes` and `false`/`0`/`no`, any case.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|s| parse_bool(&s))
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            job_source: env_string("JOB_SOURCE_TYPE").unwrap_or(defaults.job_source),
            storage: env_string("STORAGE_TYPE").unwrap_or(defaults.storage),
            database_url: env_string("DATABASE_URL"),
            postgres_pool_size: env_parse("POSTGRES_POOL_SIZE", defaults.postgres_pool_size),
            postgres_timeout: Duration::from_secs(env_parse("POSTGRES_TIMEOUT", 10)),
            sqs_queue_url: env_string("AWS_SQS_QUEUE_URL"),
            aws_region: env_string("AWS_REGION").unwrap_or(defaults.aws_region),
            sqs_max_messages: env_parse("SQS_MAX_MESSAGES", defaults.sqs_max_messages).clamp(1, 10),
            sqs_wait_time_secs: env_parse("SQS_WAIT_TIME", defaults.sqs_wait_time_secs).clamp(0, 20),
            webhook_url: env_string("WEBHOOK_URL"),
            webhook_secret: env_string("WEBHOOK_SECRET"),
            webhook_port: env_parse("WEBHOOK_PORT", defaults.webhook_port),
            s3_bucket: env_string("AWS_S3_BUCKET"),
            s3_prefix: env_string("S3_PREFIX").unwrap_or(defaults.s3_prefix),
            s3_endpoint_url: env_string("S3_ENDPOINT_URL"),
            max_frames_per_video: env_parse("MAX_FRAMES_PER_VIDEO", defaults.max_frames_per_video),
            frame_dedup_threshold: env_parse("FRAME_DEDUP_THRESHOLD", defaults.frame_dedup_threshold),
            poll_interval: Duration::from_millis(env_parse("WORKER_POLL_MS", 1500)),
            max_attempts: env_parse("WORKER_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_multiplier: env_parse("WORKER_BACKOFF_MULTIPLIER", defaults.backoff_multiplier),
            max_backoff: Duration::from_millis(env_parse("WORKER_MAX_BACKOFF_MS", 12_000)),
            stages: StageToggles {
                normalize: env_bool("ENABLE_NORMALIZE", true),
                transcription: env_bool("ENABLE_TRANSCRIPTION", true),
                vision: env_bool("ENABLE_VISION_ANALYSIS", true),
                embeddings: env_bool("ENABLE_EMBEDDINGS", true),
            },
            vision_concurrency: env_parse("VISION_CONCURRENCY", defaults.vision_concurrency).max(1),
            openai_api_key: env_string("OPENAI_API_KEY"),
            openai_base_url: env_string("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            dev_http: env_bool("WORKER_DEV_HTTP", false),
            http_port: env_parse("WORKER_HTTP_PORT", defaults.http_port),
            data_dir: env_string("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        }
    }

    pub fn job_source_type(&self) -> WorkerResult<JobSourceType> {
        self.job_source.parse()
    }

    pub fn storage_type(&self) -> WorkerResult<StorageType> {
        self.storage.parse()
    }

    /// Check that every variable the selected backends need is present.
    ///
    /// All problems are reported together in one configuration error.
    pub fn validate(&self) -> WorkerResult<()> {
        let mut problems = Vec::new();
        let mut missing = Vec::new();

        let source = match self.job_source_type() {
            Ok(source) => Some(source),
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };
        let storage = match self.storage_type() {
            Ok(storage) => Some(storage),
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        };

        let needs_database =
            source == Some(JobSourceType::Postgres) || storage == Some(StorageType::Postgres);
        if needs_database && self.database_url.is_none() {
            missing.push("DATABASE_URL");
        }
        if storage == Some(StorageType::S3) && self.s3_bucket.is_none() {
            missing.push("AWS_S3_BUCKET");
        }
        if source == Some(JobSourceType::Sqs) && self.sqs_queue_url.is_none() {
            missing.push("AWS_SQS_QUEUE_URL");
        }
        if self.stages.needs_ai() && self.openai_api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }

        if !missing.is_empty() {
            problems.push(format!("Missing required variables: {}", missing.join(", ")));
        }
        if self.backoff_multiplier <= 1.0 {
            problems.push(format!(
                "WORKER_BACKOFF_MULTIPLIER must be greater than 1 (got {})",
                self.backoff_multiplier
            ));
        }
        if self.max_attempts == 0 {
            problems.push("WORKER_MAX_ATTEMPTS must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::config_error(problems.join("; ")))
        }
    }

    /// Settings safe to expose on the status server. Secrets and connection
    /// strings are left out.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "job_source": self.job_source,
            "storage": self.storage,
            "aws_region": self.aws_region,
            "s3_bucket": self.s3_bucket,
            "s3_prefix": self.s3_prefix,
            "webhook_port": self.webhook_port,
            "max_frames_per_video": self.max_frames_per_video,
            "frame_dedup_threshold": self.frame_dedup_threshold,
            "poll_interval_ms": self.poll_interval.as_millis() as u64,
            "max_attempts": self.max_attempts,
            "backoff_multiplier": self.backoff_multiplier,
            "max_backoff_ms": self.max_backoff.as_millis() as u64,
            "stages": {
                "normalize": self.stages.normalize,
                "transcription": self.stages.transcription,
                "vision": self.stages.vision,
                "embeddings": self.stages.embeddings,
            },
            "vision_concurrency": self.vision_concurrency,
            "data_dir": self.data_dir.display().to_string(),
        })
    }
}
