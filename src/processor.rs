//! The queue processor: claims one ready task per tick and drives it
//! through the migration state machine.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::copy::{CleanupOutcome, CopyOutcome, cleanup_once, copy_once};
use crate::endpoint::{Endpoint, EndpointRegistry};
use crate::observe::{AlertSink, JobResult, MetricsSink, Severity};
use crate::policy::PolicyGate;
use crate::queue::{FileMetaStore, MigrationTask, TaskStatus, TaskStore};
use crate::Result;

/// A task that keeps failing is dropped after this many attempts.
pub const MAX_ATTEMPTS: u32 = 5;

/// Queued-task count above which the backlog alert fires.
pub const BACKLOG_ALERT_THRESHOLD: u64 = 20;

const BACKLOG_ALERT_NAME: &str = "migration_backlog";

/// Drives the migration queue.
///
/// Owns the endpoint registry, the policy gate, and the stores; workers are
/// stateless between ticks. Construct one per process and call
/// [`process_once`](Self::process_once) from a scheduler loop, or hand it to
/// [`run`](Self::run).
pub struct QueueProcessor<E, T, F> {
    endpoints: EndpointRegistry<E>,
    policy: PolicyGate,
    tasks: T,
    files: F,
    metrics: Arc<dyn MetricsSink>,
    alerts: Arc<dyn AlertSink>,
}

impl<E, T, F> QueueProcessor<E, T, F>
where
    E: Endpoint,
    T: TaskStore,
    F: FileMetaStore,
{
    pub fn new(
        endpoints: EndpointRegistry<E>,
        policy: PolicyGate,
        tasks: T,
        files: F,
        metrics: Arc<dyn MetricsSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            endpoints,
            policy,
            tasks,
            files,
            metrics,
            alerts,
        }
    }

    /// The policy gate this processor consults.
    pub fn policy(&self) -> &PolicyGate {
        &self.policy
    }

    /// Process at most one ready task. Returns whether useful work was done.
    ///
    /// Queue gauges (and the backlog alert, when due) are refreshed on every
    /// call, idle ticks included.
    pub async fn process_once(&self) -> Result<bool> {
        let Some(task) = self.tasks.claim_next().await? else {
            self.refresh_queue_metrics().await?;
            return Ok(false);
        };

        match task.status {
            TaskStatus::Queued | TaskStatus::Failed => self.run_copy_phase(task).await?,
            TaskStatus::Cleanup => self.run_cleanup_phase(task).await?,
            TaskStatus::Running | TaskStatus::Done => {
                tracing::warn!(id = task.id, status = %task.status, "claimed a task that is not ready");
                return Ok(false);
            }
        }

        self.refresh_queue_metrics().await?;
        Ok(true)
    }

    async fn run_copy_phase(&self, mut task: MigrationTask) -> Result<()> {
        task.status = TaskStatus::Running;
        self.tasks.update(&task).await?;

        match copy_once(&self.endpoints, &self.policy, &task.key, &task.src, &task.dst).await {
            Ok(CopyOutcome::Copied {
                size,
                version_token,
            }) => {
                task.status = TaskStatus::Done;
                task.error.clear();
                self.metrics.incr_job_result(JobResult::Copied);
                // A missing row is fine; metadata rows belong to the producers.
                self.files.set_version_token(&task.key, &version_token).await?;
                tracing::info!(key = %task.key, src = %task.src, dst = %task.dst, size, "object migrated");
            }
            Ok(CopyOutcome::Noop) => {
                task.status = TaskStatus::Done;
                task.error.clear();
                self.metrics.incr_job_result(JobResult::Noop);
            }
            Ok(CopyOutcome::MissingSource) => {
                task.status = TaskStatus::Failed;
                task.error = "missing_source".to_string();
                self.metrics.incr_job_result(JobResult::MissingSource);
            }
            Ok(CopyOutcome::Blocked(reason)) => {
                task.status = TaskStatus::Failed;
                task.error = reason.as_str().to_string();
                self.metrics.incr_job_result(JobResult::Blocked);
            }
            Ok(CopyOutcome::Failed { error }) => {
                task.status = TaskStatus::Failed;
                task.error = error;
                self.metrics.incr_job_result(JobResult::Error);
            }
            Ok(outcome @ CopyOutcome::Skipped(_)) => {
                // Not an error, but not done either: the task retries on a
                // later tick and ages out through the attempts policy.
                task.status = TaskStatus::Failed;
                task.error = outcome.to_string();
                tracing::debug!(key = %task.key, %outcome, "copy deferred");
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error = e.to_string();
                self.metrics.incr_job_result(JobResult::Error);
                tracing::warn!(key = %task.key, src = %task.src, dst = %task.dst, error = ?e, "copy failed");
            }
        }

        self.settle(task, TaskStatus::Queued).await
    }

    async fn run_cleanup_phase(&self, mut task: MigrationTask) -> Result<()> {
        match cleanup_once(&self.endpoints, &self.policy, &task.key, &task.src).await {
            Ok(outcome) => {
                task.status = TaskStatus::Done;
                task.error.clear();
                self.metrics.incr_job_result(match outcome {
                    CleanupOutcome::Deleted => JobResult::Deleted,
                    CleanupOutcome::Noop => JobResult::Noop,
                });
                tracing::debug!(key = %task.key, src = %task.src, %outcome, "source cleaned up");
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error = e.to_string();
                self.metrics.incr_job_result(JobResult::CleanupError);
                tracing::warn!(key = %task.key, src = %task.src, error = ?e, "cleanup failed");
            }
        }

        self.settle(task, TaskStatus::Cleanup).await
    }

    /// Apply the attempts policy to a finished tick: a failed task either
    /// requeues into its phase or, once `attempts` reaches [`MAX_ATTEMPTS`],
    /// is dropped from the store.
    async fn settle(&self, mut task: MigrationTask, requeue_as: TaskStatus) -> Result<()> {
        if task.status == TaskStatus::Failed {
            task.attempts += 1;
            if task.attempts >= MAX_ATTEMPTS {
                tracing::warn!(
                    key = %task.key,
                    attempts = task.attempts,
                    error = %task.error,
                    "task exhausted its attempts; dropping"
                );
                return self.tasks.delete(task.id).await;
            }
            task.status = requeue_as;
        }
        self.tasks.update(&task).await
    }

    async fn refresh_queue_metrics(&self) -> Result<()> {
        let counts = self.tasks.count_by_status().await?;
        let mut queued = 0;
        for status in TaskStatus::ALL {
            let count = counts.get(&status).copied().unwrap_or(0);
            self.metrics.set_queue_depth(status, count);
            if status == TaskStatus::Queued {
                queued = count;
            }
        }

        if queued > BACKLOG_ALERT_THRESHOLD {
            self.alerts.create_alert(
                BACKLOG_ALERT_NAME,
                Severity::Warning,
                &format!("{queued} migration tasks queued"),
                json!({ "queued": queued }),
            );
        }
        Ok(())
    }

    /// Drain the queue until cancelled, sleeping `idle_interval` after an
    /// idle tick or a tick-level error.
    ///
    /// Running several of these concurrently requires a [`TaskStore`] with
    /// an atomic claim.
    pub async fn run(&self, idle_interval: Duration, cancel: CancellationToken) {
        tracing::info!("migration worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let pause = match self.process_once().await {
                Ok(true) => continue,
                Ok(false) => idle_interval,
                Err(e) => {
                    tracing::warn!(error = ?e, "queue tick failed");
                    idle_interval
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        tracing::info!("migration worker stopped");
    }
}
