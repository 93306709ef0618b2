//! The durable migration queue: task rows, file metadata rows, and the
//! store traits the processor drives.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::{Error, Result};

/// Lifecycle state of a [`MigrationTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskStatus {
    /// Waiting for a worker to pick it up for the copy phase.
    Queued,
    /// Owned by exactly one worker until it transitions out.
    Running,
    /// Finished; the row is kept for observability.
    Done,
    /// A failed attempt that has not yet been requeued. Rows in this state
    /// are re-entered as if queued.
    Failed,
    /// Waiting for a worker to delete the source object.
    Cleanup,
}

impl TaskStatus {
    /// All statuses, for zero-filling gauges.
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cleanup => "cleanup",
        }
    }

    /// Whether a row in this state is eligible for pickup.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            TaskStatus::Queued | TaskStatus::Cleanup | TaskStatus::Failed
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted migration task row.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationTask {
    /// Store-assigned identifier.
    pub id: u64,
    /// Object key to migrate.
    pub key: String,
    /// Logical source endpoint name.
    pub src: String,
    /// Logical destination endpoint name. Unused in the cleanup phase.
    pub dst: String,
    pub status: TaskStatus,
    /// Failed attempts so far; monotonically non-decreasing until the row is
    /// deleted.
    pub attempts: u32,
    /// Last error message, empty when none.
    pub error: String,
    /// Insertion time; defines FIFO order among ready tasks.
    pub created_at: SystemTime,
}

/// A task as submitted by a producer. The store assigns `id` and
/// `created_at` on insert.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub key: String,
    pub src: String,
    pub dst: String,
    pub status: TaskStatus,
}

impl NewTask {
    /// A copy-phase task: migrate `key` from `src` to `dst`.
    pub fn copy(key: impl Into<String>, src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            src: src.into(),
            dst: dst.into(),
            status: TaskStatus::Queued,
        }
    }

    /// A cleanup-phase task: delete `key` on `src` after a completed
    /// migration.
    pub fn cleanup(key: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            src: src.into(),
            dst: String::new(),
            status: TaskStatus::Cleanup,
        }
    }
}

/// Durable queue of migration tasks.
///
/// `claim_next` must not hand the same task in a copyable state to two
/// concurrent workers. Implementations either claim atomically (a
/// `SELECT … FOR UPDATE` pattern or a status flip to `running` inside the
/// claim) or, like [`MemoryTaskStore`], document a single-worker guarantee.
/// A crashed worker leaves a `running` row orphaned; implementations may add
/// a lease/timeout to reclaim such rows, none is required here.
pub trait TaskStore: Send + Sync {
    /// Insert a producer-submitted task and return the stored row.
    fn insert(
        &self,
        task: NewTask,
    ) -> impl std::future::Future<Output = Result<MigrationTask>> + Send;

    /// The oldest row whose status is ready (`queued`, `cleanup`, `failed`),
    /// by `(created_at, id)` ascending.
    fn claim_next(&self) -> impl std::future::Future<Output = Result<Option<MigrationTask>>> + Send;

    /// Persist the task's mutated fields (`status`, `attempts`, `error`).
    fn update(&self, task: &MigrationTask) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Remove the row. Removing an already-deleted row is a no-op.
    fn delete(&self, id: u64) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Row counts per status. Statuses with no rows may be omitted; the
    /// queue observer zero-fills.
    fn count_by_status(
        &self,
    ) -> impl std::future::Future<Output = Result<BTreeMap<TaskStatus, u64>>> + Send;
}

/// In-memory task store for tests and single-process deployments.
///
/// All operations take one internal mutex; mutual exclusion between workers
/// is provided by running a single worker against it.
#[derive(Debug, Default, Clone)]
pub struct MemoryTaskStore {
    inner: Arc<Mutex<TaskTable>>,
}

#[derive(Debug, Default)]
struct TaskTable {
    rows: BTreeMap<u64, MigrationTask>,
    next_id: u64,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently in the store.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("poisoned lock").rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a row by id (useful for tests).
    pub fn get(&self, id: u64) -> Option<MigrationTask> {
        self.inner
            .lock()
            .expect("poisoned lock")
            .rows
            .get(&id)
            .cloned()
    }
}

impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<MigrationTask> {
        let mut table = self.inner.lock().expect("poisoned lock");
        let id = table.next_id;
        table.next_id += 1;
        let row = MigrationTask {
            id,
            key: task.key,
            src: task.src,
            dst: task.dst,
            status: task.status,
            attempts: 0,
            error: String::new(),
            created_at: SystemTime::now(),
        };
        table.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn claim_next(&self) -> Result<Option<MigrationTask>> {
        let table = self.inner.lock().expect("poisoned lock");
        Ok(table
            .rows
            .values()
            .filter(|t| t.status.is_ready())
            .min_by_key(|t| (t.created_at, t.id))
            .cloned())
    }

    async fn update(&self, task: &MigrationTask) -> Result<()> {
        let mut table = self.inner.lock().expect("poisoned lock");
        match table.rows.get_mut(&task.id) {
            Some(row) => {
                row.status = task.status;
                row.attempts = task.attempts;
                row.error = task.error.clone();
                Ok(())
            }
            None => Err(Error::Generic(format!("no task row with id {}", task.id))),
        }
    }

    async fn delete(&self, id: u64) -> Result<()> {
        self.inner.lock().expect("poisoned lock").rows.remove(&id);
        Ok(())
    }

    async fn count_by_status(&self) -> Result<BTreeMap<TaskStatus, u64>> {
        let table = self.inner.lock().expect("poisoned lock");
        let mut counts = BTreeMap::new();
        for row in table.rows.values() {
            *counts.entry(row.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// A persisted file-metadata row, as far as the migration core sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub key: String,
    /// Random hex identifier minted per successful copy; `None` until the
    /// first migration of the key completes.
    pub version_token: Option<String>,
}

/// The file-metadata table. The core only ever writes `version_token`, and
/// only for rows that already exist; row creation belongs to the producers.
pub trait FileMetaStore: Send + Sync {
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Option<FileMeta>>> + Send;

    /// Set the version token for `key`. Returns `false` when no row exists.
    fn set_version_token(
        &self,
        key: &str,
        token: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;
}

/// In-memory file-metadata store for tests and single-process deployments.
#[derive(Debug, Default, Clone)]
pub struct MemoryFileMetaStore {
    inner: Arc<Mutex<BTreeMap<String, FileMeta>>>,
}

impl MemoryFileMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row with no version token, as a producer would.
    pub fn insert(&self, key: impl Into<String>) {
        let key = key.into();
        self.inner.lock().expect("poisoned lock").insert(
            key.clone(),
            FileMeta {
                key,
                version_token: None,
            },
        );
    }
}

impl FileMetaStore for MemoryFileMetaStore {
    async fn get(&self, key: &str) -> Result<Option<FileMeta>> {
        Ok(self.inner.lock().expect("poisoned lock").get(key).cloned())
    }

    async fn set_version_token(&self, key: &str, token: &str) -> Result<bool> {
        match self.inner.lock().expect("poisoned lock").get_mut(key) {
            Some(row) => {
                row.version_token = Some(token.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
