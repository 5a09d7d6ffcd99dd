// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persistent lease-based task queue.
//!
//! Every state change is a single conditional `UPDATE`, so the database row
//! is the only coordination point between workers, whether they share a
//! process or not. A claim holds a lease (`locked_until`); a worker that
//! stops heartbeating loses the lease and the next claim puts the task back
//! in line. Processing is therefore at-least-once.
//!
//! Runs on PostgreSQL or SQLite through the sqlx `Any` driver. Timestamps
//! are Unix microseconds stored as `BIGINT`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use meshquote_analysis::QuotationParams;
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, FromRow};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use super::storage::{ModelSource, ModelStorage, StorageError};
use crate::types::{
    NewTask, NotificationOptions, NotificationType, Priority, Task, TaskResult, TaskStatus,
};

/// Lease granted by [`TaskQueue::claim`] unless the caller asks otherwise
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

const MAX_CANCEL_REASON_LEN: usize = 200;

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS analysis_tasks (
        task_id TEXT PRIMARY KEY,
        user_id TEXT,
        model_id TEXT,
        file_path TEXT,
        file_hash TEXT,
        parameters TEXT NOT NULL,
        priority BIGINT NOT NULL DEFAULT 5,
        status TEXT NOT NULL,
        progress BIGINT NOT NULL DEFAULT 0,
        result_data TEXT,
        error_message TEXT,
        notification_type TEXT NOT NULL DEFAULT 'none',
        notification_target TEXT,
        locked_by TEXT,
        locked_until BIGINT,
        created_at BIGINT NOT NULL,
        started_at BIGINT,
        completed_at BIGINT,
        updated_at BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_analysis_tasks_claim
        ON analysis_tasks (status, priority, created_at)
    "#,
];

const TASK_COLUMNS: &str = "task_id, user_id, model_id, file_path, file_hash, parameters, \
    priority, status, progress, result_data, error_message, notification_type, \
    notification_target, locked_by, locked_until, created_at, started_at, completed_at, \
    updated_at";

/// Errors from queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {task_id} is locked by another worker")]
    LockConflict {
        task_id: String,
        holder: Option<String>,
    },

    #[error("Permission denied: only the task owner or an administrator may cancel it")]
    PermissionDenied,

    #[error("Task {task_id} cannot leave state {from}")]
    InvalidTransition { task_id: String, from: TaskStatus },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Model rejected: {0}")]
    Storage(#[from] StorageError),

    #[error("Corrupt task row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl QueueError {
    /// Worth retrying after a pause
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Database(_) | QueueError::Join(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Queue tuning and access control
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Claim attempts before giving up on a contended queue
    pub claim_attempts: u32,
    /// Sleep after the n-th lost race is `n * claim_backoff`
    pub claim_backoff: Duration,
    /// Users allowed to cancel any task
    pub admins: HashSet<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            claim_attempts: 5,
            claim_backoff: Duration::from_millis(25),
            admins: HashSet::new(),
        }
    }
}

/// A state change requested by the worker holding the lease
#[derive(Debug, Clone, Copy)]
pub enum TaskUpdate<'a> {
    /// Still working; extends the lease
    Progress(u8),
    Completed(&'a TaskResult),
    Failed(&'a str),
}

/// Counts and timings across the whole table
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: u64,
    pub by_status: BTreeMap<String, u64>,
    /// Mean seconds between enqueue and claim
    pub avg_wait_secs: Option<f64>,
    /// Mean seconds between claim and a terminal state
    pub avg_processing_secs: Option<f64>,
    /// Percentage of finished tasks that completed rather than failed
    pub success_rate: Option<f64>,
}

#[derive(Debug, FromRow)]
struct TaskRow {
    task_id: String,
    user_id: Option<String>,
    model_id: Option<String>,
    file_path: Option<String>,
    file_hash: Option<String>,
    parameters: String,
    priority: i64,
    status: String,
    progress: i64,
    result_data: Option<String>,
    error_message: Option<String>,
    notification_type: String,
    notification_target: Option<String>,
    locked_by: Option<String>,
    locked_until: Option<i64>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    updated_at: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = QueueError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let parameters: QuotationParams = serde_json::from_str(&row.parameters)
            .map_err(|e| QueueError::Corrupt(format!("{}: parameters: {e}", row.task_id)))?;
        let result_data = row
            .result_data
            .as_deref()
            .map(serde_json::from_str::<TaskResult>)
            .transpose()
            .map_err(|e| QueueError::Corrupt(format!("{}: result_data: {e}", row.task_id)))?;
        let status = row
            .status
            .parse()
            .map_err(|e| QueueError::Corrupt(format!("{}: {e}", row.task_id)))?;

        Ok(Task {
            parameters,
            result_data,
            status,
            priority: Priority::normalize(row.priority),
            progress: row.progress.clamp(0, 100) as u8,
            notification_type: row.notification_type.parse().unwrap_or(NotificationType::None),
            task_id: row.task_id,
            user_id: row.user_id,
            model_id: row.model_id,
            file_path: row.file_path,
            file_hash: row.file_hash,
            error_message: row.error_message,
            notification_target: row.notification_target,
            locked_by: row.locked_by,
            locked_until: row.locked_until,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

/// Open a pool for `database_url` (`postgres://…` or `sqlite://…`)
pub async fn connect(database_url: &str, max_connections: u32) -> Result<AnyPool> {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// The task table and the operations allowed on it
#[derive(Clone)]
pub struct TaskQueue {
    pool: AnyPool,
    storage: Arc<dyn ModelStorage>,
    config: Arc<QueueConfig>,
}

impl TaskQueue {
    pub fn new(pool: AnyPool, storage: Arc<dyn ModelStorage>, config: QueueConfig) -> Self {
        Self {
            pool,
            storage,
            config: Arc::new(config),
        }
    }

    pub fn storage(&self) -> &Arc<dyn ModelStorage> {
        &self.storage
    }

    /// Create the task table and its claim index if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Validate the model source and parameters, then insert a `Queued` row.
    pub async fn enqueue(
        &self,
        task: NewTask,
        parameters: QuotationParams,
        priority: Priority,
        notification: NotificationOptions,
    ) -> Result<String> {
        let source = ModelSource::from_parts(task.model_id.as_deref(), task.file_path.as_deref())?;
        parameters
            .validate()
            .map_err(|e| QueueError::InvalidTask(e.to_string()))?;

        let storage = Arc::clone(&self.storage);
        let lookup = source.clone();
        let resolved = tokio::task::spawn_blocking(move || storage.resolve(&lookup)).await??;

        let (model_id, file_path) = match source {
            ModelSource::ModelId(id) => (Some(id), None),
            ModelSource::FilePath(_) => (None, Some(resolved.path.to_string_lossy().into_owned())),
        };
        let file_hash = task
            .file_hash
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(resolved.sha256);
        let parameters = serde_json::to_string(&parameters)
            .map_err(|e| QueueError::InvalidTask(format!("parameters: {e}")))?;

        let now = now_micros();
        let task_id = generate_task_id();
        sqlx::query(
            r#"
            INSERT INTO analysis_tasks
                (task_id, user_id, model_id, file_path, file_hash, parameters, priority,
                 status, progress, notification_type, notification_target, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'queued', 0, $8, $9, $10, $10)
            "#,
        )
        .bind(&task_id)
        .bind(task.user_id)
        .bind(model_id)
        .bind(file_path)
        .bind(file_hash)
        .bind(parameters)
        .bind(priority.value())
        .bind(notification.kind.as_str())
        .bind(notification.target)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            task_id = %task_id,
            priority = priority.value(),
            file_type = %resolved.file_type,
            file_size = resolved.size,
            "Task enqueued"
        );
        Ok(task_id)
    }

    /// Lease the highest-priority, oldest queued task to `worker_id`.
    ///
    /// Expired leases are reclaimed first. Returns `None` when the queue is
    /// empty or every attempt lost the race to another worker.
    pub async fn claim(&self, worker_id: &str, lease: Duration) -> Result<Option<Task>> {
        for attempt in 1..=self.config.claim_attempts.max(1) {
            self.release_timed_out().await?;

            let candidate: Option<(String,)> = sqlx::query_as(
                r#"
                SELECT task_id FROM analysis_tasks
                WHERE status = 'queued'
                ORDER BY priority DESC, created_at ASC
                LIMIT 1
                "#,
            )
            .fetch_optional(&self.pool)
            .await?;

            let Some((task_id,)) = candidate else {
                return Ok(None);
            };

            let now = now_micros();
            let claimed = sqlx::query(
                r#"
                UPDATE analysis_tasks
                SET status = 'processing', locked_by = $1, locked_until = $2,
                    started_at = $3, updated_at = $3, progress = 0
                WHERE task_id = $4 AND status = 'queued'
                "#,
            )
            .bind(worker_id)
            .bind(now + micros(lease))
            .bind(now)
            .bind(&task_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if claimed == 1 {
                tracing::info!(task_id = %task_id, worker_id, "Task claimed");
                return self.get(&task_id).await;
            }

            tracing::debug!(task_id = %task_id, worker_id, attempt, "Lost claim race");
            tokio::time::sleep(self.config.claim_backoff * attempt).await;
        }

        tracing::warn!(
            worker_id,
            attempts = self.config.claim_attempts,
            "Queue contended, giving up claim"
        );
        Ok(None)
    }

    /// Apply `update` to a task leased by `worker_id`.
    ///
    /// Only a `Processing` row held by the same worker is touched, so a
    /// cancelled or reclaimed task is never overwritten.
    pub async fn update(
        &self,
        task_id: &str,
        worker_id: &str,
        update: TaskUpdate<'_>,
        lease: Duration,
    ) -> Result<()> {
        let now = now_micros();
        let query = match update {
            TaskUpdate::Progress(progress) => sqlx::query(
                r#"
                UPDATE analysis_tasks
                SET progress = $1, locked_until = $2, updated_at = $3
                WHERE task_id = $4 AND status = 'processing' AND locked_by = $5
                "#,
            )
            .bind(i64::from(progress.min(100)))
            .bind(now + micros(lease))
            .bind(now),
            TaskUpdate::Completed(result) => {
                let json = serde_json::to_string(result)
                    .map_err(|e| QueueError::InvalidTask(format!("result: {e}")))?;
                sqlx::query(
                    r#"
                    UPDATE analysis_tasks
                    SET status = 'completed', progress = 100, result_data = $1,
                        error_message = NULL, locked_by = NULL, locked_until = NULL,
                        completed_at = $2, updated_at = $3
                    WHERE task_id = $4 AND status = 'processing' AND locked_by = $5
                    "#,
                )
                .bind(json)
                .bind(now)
                .bind(now)
            }
            TaskUpdate::Failed(message) => sqlx::query(
                r#"
                UPDATE analysis_tasks
                SET status = 'failed', error_message = $1, locked_by = NULL,
                    locked_until = NULL, completed_at = $2, updated_at = $3
                WHERE task_id = $4 AND status = 'processing' AND locked_by = $5
                "#,
            )
            .bind(message.to_string())
            .bind(now)
            .bind(now),
        };

        let affected = query
            .bind(task_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if affected == 0 {
            return Err(self.classify_rejected(task_id).await);
        }
        Ok(())
    }

    /// Report progress and extend the lease
    pub async fn heartbeat(
        &self,
        task_id: &str,
        worker_id: &str,
        progress: u8,
        lease: Duration,
    ) -> Result<()> {
        self.update(task_id, worker_id, TaskUpdate::Progress(progress), lease)
            .await
    }

    pub async fn complete(&self, task_id: &str, worker_id: &str, result: &TaskResult) -> Result<()> {
        self.update(task_id, worker_id, TaskUpdate::Completed(result), Duration::ZERO)
            .await?;
        tracing::info!(task_id, worker_id, "Task completed");
        Ok(())
    }

    pub async fn fail(&self, task_id: &str, worker_id: &str, message: &str) -> Result<()> {
        self.update(task_id, worker_id, TaskUpdate::Failed(message), Duration::ZERO)
            .await?;
        tracing::info!(task_id, worker_id, "Task failed");
        Ok(())
    }

    /// Why a conditional update touched no row
    async fn classify_rejected(&self, task_id: &str) -> QueueError {
        let row: std::result::Result<Option<(String, Option<String>)>, sqlx::Error> =
            sqlx::query_as("SELECT status, locked_by FROM analysis_tasks WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await;

        match row {
            Err(e) => QueueError::Database(e),
            Ok(None) => QueueError::NotFound(task_id.to_string()),
            Ok(Some((status, holder))) => match status.parse::<TaskStatus>() {
                Ok(TaskStatus::Processing) => QueueError::LockConflict {
                    task_id: task_id.to_string(),
                    holder,
                },
                Ok(from) => QueueError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from,
                },
                Err(e) => QueueError::Corrupt(format!("{task_id}: {e}")),
            },
        }
    }

    /// Cancel a task that has not finished yet.
    ///
    /// Owned tasks may be cancelled by their owner or an administrator;
    /// tasks without an owner by anyone. Returns `false` when the task was
    /// already terminal. An in-flight analysis is not interrupted; its
    /// completion write is rejected instead.
    pub async fn cancel(
        &self,
        task_id: &str,
        requester: Option<&str>,
        reason: Option<&str>,
    ) -> Result<bool> {
        let task = self
            .get(task_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            tracing::info!(task_id, status = %task.status, "Cancel ignored for finished task");
            return Ok(false);
        }

        if let Some(owner) = task.user_id.as_deref() {
            let allowed = requester
                .is_some_and(|user| user == owner || self.config.admins.contains(user));
            if !allowed {
                return Err(QueueError::PermissionDenied);
            }
        }

        let message = match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reason) => {
                let reason: String = reason.chars().take(MAX_CANCEL_REASON_LEN).collect();
                format!("Task cancelled: {reason}")
            }
            None => "Task cancelled".to_string(),
        };

        let now = now_micros();
        let affected = sqlx::query(
            r#"
            UPDATE analysis_tasks
            SET status = 'cancelled', error_message = $1, locked_by = NULL,
                locked_until = NULL, completed_at = $2, updated_at = $2
            WHERE task_id = $3 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(message)
        .bind(now)
        .bind(task_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 1 {
            tracing::info!(task_id, requester = requester.unwrap_or("-"), "Task cancelled");
        }
        Ok(affected == 1)
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM analysis_tasks WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Task::try_from).transpose()
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM analysis_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let (avg_wait,): (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT CAST(AVG(started_at - created_at) AS DOUBLE PRECISION)
            FROM analysis_tasks WHERE started_at IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (avg_processing,): (Option<f64>,) = sqlx::query_as(
            r#"
            SELECT CAST(AVG(completed_at - started_at) AS DOUBLE PRECISION)
            FROM analysis_tasks
            WHERE completed_at IS NOT NULL AND started_at IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let by_status: BTreeMap<String, u64> = counts
            .into_iter()
            .map(|(status, count)| (status, count.max(0) as u64))
            .collect();
        let count_of = |status: TaskStatus| by_status.get(status.as_str()).copied().unwrap_or(0);
        let completed = count_of(TaskStatus::Completed);
        let finished = completed + count_of(TaskStatus::Failed);

        Ok(QueueStats {
            total: by_status.values().sum(),
            avg_wait_secs: avg_wait.map(|us| us / 1e6),
            avg_processing_secs: avg_processing.map(|us| us / 1e6),
            success_rate: (finished > 0).then(|| completed as f64 / finished as f64 * 100.0),
            by_status,
        })
    }

    /// Delete terminal tasks that finished more than `days` days ago
    pub async fn cleanup(&self, days: u64) -> Result<u64> {
        let cutoff = now_micros() - micros(Duration::from_secs(days.saturating_mul(86_400)));
        let removed = sqlx::query(
            r#"
            DELETE FROM analysis_tasks
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND COALESCE(completed_at, updated_at) < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if removed > 0 {
            tracing::info!(removed, days, "Removed old tasks");
        }
        Ok(removed)
    }

    /// Put tasks whose lease has expired back in line
    pub async fn release_timed_out(&self) -> Result<u64> {
        let released = sqlx::query(
            r#"
            UPDATE analysis_tasks
            SET status = 'queued', locked_by = NULL, locked_until = NULL,
                error_message = 'Released after lease expiry', updated_at = $1
            WHERE status = 'processing' AND locked_until < $1
            "#,
        )
        .bind(now_micros())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if released > 0 {
            tracing::warn!(released, "Reclaimed tasks with expired leases");
        }
        Ok(released)
    }
}

/// Delete old terminal tasks every `every` until `shutdown` turns true
pub async fn run_retention(
    queue: TaskQueue,
    days: u64,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = queue.cleanup(days).await {
                    tracing::warn!(error = %e, "Retention sweep failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

/// `q-<hex unix seconds>-<uuid>`
pub fn generate_task_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("q-{secs:x}-{}", Uuid::new_v4().simple())
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

fn micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_format() {
        let id = generate_task_id();
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "q");
        assert!(u64::from_str_radix(parts[1], 16).is_ok());
        assert_eq!(parts[2].len(), 32);
        assert_ne!(id, generate_task_id());
    }

    #[test]
    fn test_transient_errors() {
        assert!(QueueError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!QueueError::PermissionDenied.is_transient());
        assert!(!QueueError::NotFound("x".into()).is_transient());
    }
}
