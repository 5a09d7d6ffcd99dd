// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Queue worker: claim, analyse, price, persist, cache, notify.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use meshquote_analysis::{
    estimate_from_metadata, AnalysisError, AnalysisResult, ModelAnalyzer, ModelRef, Quotation,
    QuotationCalculator,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::cache::{adaptive_ttl, Fingerprint, ResultCache};
use super::notifier::Notifier;
use super::queue::{QueueError, TaskQueue};
use super::sanitize::sanitize_error;
use super::storage::{ModelSource, StorageError};
use crate::config::Config;
use crate::types::{Task, TaskResult, TaskStatus};

const PROGRESS_STARTED: u8 = 5;
const PROGRESS_RESOLVED: u8 = 10;
const PROGRESS_ANALYZED: u8 = 60;
const PROGRESS_PRICED: u8 = 80;
/// Share of the progress bar covered by the analysis itself
const ANALYSIS_SPAN: f64 = 50.0;

const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// Everything that can go wrong while processing one task
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Analysis exceeded {0:?}")]
    Timeout(Duration),

    #[error("Analysis thread failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl WorkerError {
    /// The task is no longer ours to write: cancelled, reclaimed or deleted
    fn lost_lease(&self) -> bool {
        matches!(
            self,
            WorkerError::Queue(
                QueueError::InvalidTransition { .. }
                    | QueueError::LockConflict { .. }
                    | QueueError::NotFound(_)
            )
        )
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub lease: Duration,
    pub idle_wait: Duration,
    pub heartbeat_interval: Duration,
    /// Hard wall-clock bound on one analysis
    pub analysis_timeout: Duration,
    /// Pause after the queue itself fails
    pub error_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            idle_wait: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            analysis_timeout: Duration::from_secs(240),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            lease: config.lease(),
            idle_wait: config.idle_wait(),
            heartbeat_interval: config.heartbeat_interval(),
            analysis_timeout: config.analysis_timeout(),
            error_backoff: config.idle_wait().max(Duration::from_secs(1)),
        }
    }
}

/// What a single [`Worker::run_once`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to claim
    Idle,
    Completed { task_id: String, from_cache: bool },
    Failed { task_id: String },
    /// The task was cancelled or reclaimed mid-flight; the result was discarded
    Dropped { task_id: String },
}

/// One queue consumer. Processes a single task at a time.
pub struct Worker {
    id: String,
    queue: TaskQueue,
    analyzer: Arc<ModelAnalyzer>,
    calculator: Arc<dyn QuotationCalculator>,
    cache: Option<Arc<dyn ResultCache>>,
    notifier: Arc<dyn Notifier>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        queue: TaskQueue,
        analyzer: Arc<ModelAnalyzer>,
        calculator: Arc<dyn QuotationCalculator>,
        notifier: Arc<dyn Notifier>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: generate_worker_id(),
            queue,
            analyzer,
            calculator,
            cache: None,
            notifier,
            config,
        }
    }

    /// Look up and store results in `cache`
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process tasks until `shutdown` turns true, finishing the current one
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id = %self.id, "Worker started");

        while !*shutdown.borrow() {
            let pause = match self.run_once().await {
                Ok(Outcome::Idle) => self.config.idle_wait,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(worker_id = %self.id, error = %e, "Queue unavailable, backing off");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.id, "Worker stopped");
    }

    /// Claim and fully process at most one task
    pub async fn run_once(&self) -> Result<Outcome, QueueError> {
        let Some(task) = self.queue.claim(&self.id, self.config.lease).await? else {
            return Ok(Outcome::Idle);
        };
        Ok(self.process(task).await)
    }

    async fn process(&self, task: Task) -> Outcome {
        let task_id = task.task_id.clone();
        let started = std::time::Instant::now();

        let result = match self.execute(&task).await {
            Ok(result) => result,
            Err(e) if e.lost_lease() => {
                tracing::warn!(task_id = %task_id, error = %e, "Task taken away mid-flight, dropping");
                return Outcome::Dropped { task_id };
            }
            Err(e) => return self.record_failure(&task, &e).await,
        };

        match self.queue.complete(&task_id, &self.id, &result).await {
            Ok(()) => {}
            Err(QueueError::InvalidTransition {
                from: TaskStatus::Cancelled,
                ..
            }) => {
                tracing::info!(task_id = %task_id, "Task cancelled while processing, result dropped");
                return Outcome::Dropped { task_id };
            }
            Err(e) => {
                let e = WorkerError::from(e);
                if e.lost_lease() {
                    tracing::warn!(task_id = %task_id, error = %e, "Lease lost before completion, result dropped");
                    return Outcome::Dropped { task_id };
                }
                return self.record_failure(&task, &e).await;
            }
        }

        if !result.from_cache {
            self.store_in_cache(&task, &result).await;
        }

        if let Err(e) = self.notifier.notify_completion(&task, &result).await {
            tracing::warn!(task_id = %task_id, error = %e, "Completion notification failed");
        }

        tracing::info!(
            task_id = %task_id,
            from_cache = result.from_cache,
            score = result.analysis.complexity_score,
            price = result.quotation.final_price,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Task processed"
        );
        Outcome::Completed {
            task_id,
            from_cache: result.from_cache,
        }
    }

    async fn execute(&self, task: &Task) -> Result<TaskResult, WorkerError> {
        self.progress(task, PROGRESS_STARTED).await?;

        if let Some(hit) = self.cached(task).await {
            return Ok(hit);
        }

        let source = ModelSource::from_parts(task.model_id.as_deref(), task.file_path.as_deref())?;
        let storage = Arc::clone(self.queue.storage());
        let lookup = source.clone();
        let analysis = match tokio::task::spawn_blocking(move || storage.resolve(&lookup)).await? {
            Ok(resolved) => {
                if task
                    .file_hash
                    .as_deref()
                    .is_some_and(|hash| hash != resolved.sha256)
                {
                    tracing::warn!(task_id = %task.task_id, "Model changed since it was enqueued");
                }
                self.progress(task, PROGRESS_RESOLVED).await?;
                self.analyze(task, resolved.model_ref()).await?
            }
            Err(err @ (StorageError::NotFound(_) | StorageError::UnsupportedFormat(_))) => {
                self.estimate_unavailable(task, source, err).await?
            }
            Err(err) => return Err(err.into()),
        };
        self.progress(task, PROGRESS_ANALYZED).await?;

        let quotation = match self.calculator.calculate(&analysis, &task.parameters) {
            Ok(quotation) => quotation,
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "Pricing failed, using estimate");
                Quotation::estimated(&analysis, &task.parameters, format!("pricing failed: {e}"))
            }
        };
        self.progress(task, PROGRESS_PRICED).await?;

        Ok(TaskResult {
            analysis,
            quotation,
            task_id: task.task_id.clone(),
            model_id: task.model_id.clone(),
            from_cache: false,
            processed_at: unix_secs(),
        })
    }

    /// Metadata estimate for a model whose file has gone missing
    async fn estimate_unavailable(
        &self,
        task: &Task,
        source: ModelSource,
        err: StorageError,
    ) -> Result<AnalysisResult, WorkerError> {
        let storage = Arc::clone(self.queue.storage());
        let Some(metadata) = tokio::task::spawn_blocking(move || storage.metadata(&source)).await?
        else {
            return Err(err.into());
        };
        tracing::warn!(task_id = %task.task_id, error = %err, "Model unavailable, estimating from metadata");
        self.progress(task, PROGRESS_RESOLVED).await?;
        Ok(estimate_from_metadata(
            &metadata,
            None,
            format!("geometry analysis failed: {err}"),
        ))
    }

    /// Run the analyzer on the blocking pool, heartbeating while it works
    async fn analyze(&self, task: &Task, model: ModelRef) -> Result<AnalysisResult, WorkerError> {
        let fraction = Arc::new(AtomicU64::new(0f64.to_bits()));
        let reported = Arc::clone(&fraction);
        let analyzer = Arc::clone(&self.analyzer);

        let mut handle = tokio::task::spawn_blocking(move || {
            analyzer.analyze_with_progress(&model, true, &mut |p| {
                reported.store(p.fraction().to_bits(), Ordering::Relaxed);
            })
        });

        let supervised = self.supervise(task, &mut handle, &fraction);
        match tokio::time::timeout(self.config.analysis_timeout, supervised).await {
            Ok(result) => result,
            // The blocking thread stops on its own once its time budget runs out.
            Err(_) => Err(WorkerError::Timeout(self.config.analysis_timeout)),
        }
    }

    async fn supervise(
        &self,
        task: &Task,
        handle: &mut JoinHandle<meshquote_analysis::Result<AnalysisResult>>,
        fraction: &AtomicU64,
    ) -> Result<AnalysisResult, WorkerError> {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval.max(MIN_HEARTBEAT));
        ticker.tick().await;

        loop {
            tokio::select! {
                joined = &mut *handle => return Ok(joined??),
                _ = ticker.tick() => {
                    let done = f64::from_bits(fraction.load(Ordering::Relaxed)).clamp(0.0, 1.0);
                    let progress = PROGRESS_RESOLVED + (done * ANALYSIS_SPAN).round() as u8;
                    self.progress(task, progress).await?;
                }
            }
        }
    }

    async fn progress(&self, task: &Task, progress: u8) -> Result<(), QueueError> {
        self.queue
            .heartbeat(&task.task_id, &self.id, progress, self.config.lease)
            .await?;
        tracing::debug!(task_id = %task.task_id, progress, "Progress");
        Ok(())
    }

    async fn cached(&self, task: &Task) -> Option<TaskResult> {
        let cache = self.cache.as_ref()?;
        let key = cache.generate_key(&Fingerprint::for_task(task));
        match cache.get(&key).await {
            Ok(Some(mut hit)) => {
                tracing::info!(task_id = %task.task_id, key = %key, "Cache HIT");
                hit.task_id = task.task_id.clone();
                hit.model_id = task.model_id.clone();
                hit.from_cache = true;
                Some(hit)
            }
            Ok(None) => {
                tracing::debug!(task_id = %task.task_id, key = %key, "Cache MISS");
                None
            }
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn store_in_cache(&self, task: &Task, result: &TaskResult) {
        let Some(cache) = &self.cache else {
            return;
        };
        let key = cache.generate_key(&Fingerprint::for_task(task));
        let ttl = adaptive_ttl(result.analysis.complexity_score);
        if let Err(e) = cache.set(&key, result, ttl).await {
            tracing::warn!(task_id = %task.task_id, error = %e, "Failed to cache result");
        }
    }

    async fn record_failure(&self, task: &Task, error: &WorkerError) -> Outcome {
        let message = sanitize_error(&error.to_string());
        tracing::error!(task_id = %task.task_id, error = %error, "Task failed");

        match self.queue.fail(&task.task_id, &self.id, &message).await {
            Ok(()) => {}
            Err(QueueError::InvalidTransition {
                from: TaskStatus::Cancelled,
                ..
            }) => {
                return Outcome::Dropped {
                    task_id: task.task_id.clone(),
                };
            }
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "Failed to record task failure");
            }
        }

        if let Err(e) = self.notifier.notify_error(task, &message).await {
            tracing::warn!(task_id = %task.task_id, error = %e, "Error notification failed");
        }
        Outcome::Failed {
            task_id: task.task_id.clone(),
        }
    }
}

fn generate_worker_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("w-{}-{}", std::process::id(), &suffix[..8])
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
