//! Policy-gated object migration between S3-compatible storage endpoints.
//!
//! Producers enqueue per-object [`MigrationTask`]s into a [`TaskStore`]; a
//! [`QueueProcessor`] drains the queue one task per tick, copying each object
//! from its source endpoint to its destination endpoint with idempotence
//! checks, growing-file detection, and throttle-aware retries, then records
//! the outcome through injected metrics and alert sinks.

pub mod adapters;
mod copy;
mod endpoint;
mod observe;
mod policy;
mod processor;
mod queue;

pub use copy::{
    BlockReason, CleanupOutcome, CopyOutcome, MAX_COPY_RETRIES, SkipReason, cleanup_once,
    copy_once,
};
pub use endpoint::{
    Endpoint, EndpointDescriptor, EndpointRegistry, NOT_FOUND_CODES, ObjectMeta, THROTTLE_CODES,
    classify_error_code,
};
pub use observe::{
    Alert, AlertSink, JobResult, MetricsSink, RecordingAlerts, RecordingMetrics, Severity,
    TracingAlerts, TracingMetrics,
};
pub use policy::{
    CHAOS_FAIL_ENDPOINTS_KEY, CHAOS_LATENCY_KEY, ENCRYPTION_ENFORCED_KEY, MemorySettings,
    PolicyGate, SettingsStore,
};
pub use processor::{BACKLOG_ALERT_THRESHOLD, MAX_ATTEMPTS, QueueProcessor};
pub use queue::{
    FileMeta, FileMetaStore, MemoryFileMetaStore, MemoryTaskStore, MigrationTask, NewTask,
    TaskStatus, TaskStore,
};

#[cfg(feature = "memory")]
pub use adapters::memory::{MemoryEndpoint, Op};
#[cfg(feature = "s3")]
pub use adapters::s3::S3Endpoint;

/// A specialized Result type for migration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A unified Error type for endpoint and queue operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("Endpoint unavailable: {0}")]
    EndpointUnavailable(String),

    #[error("Throttled by endpoint: {0}")]
    Throttled(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage backend connection error")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("IO Error")]
    Io(#[from] std::io::Error),

    #[error("Generic storage error: {0}")]
    Generic(String),
}
