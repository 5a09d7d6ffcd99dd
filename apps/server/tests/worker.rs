// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use common::{write_dense_stl, Fixture};
use futures::future::BoxFuture;
use meshquote_analysis::{AnalysisConfig, ModelAnalyzer, QuotationParams, StandardCalculator};
use meshquote_server::services::cache::CacheError;
use meshquote_server::services::notifier::NotifyError;
use meshquote_server::services::{
    DiskCache, Notifier, Outcome, ResultCache, TaskQueue, Worker, WorkerConfig,
};
use meshquote_server::types::{
    NewTask, NotificationOptions, NotificationType, Priority, Task, TaskResult, TaskStatus,
};

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<(String, String)> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_completion<'a>(
        &'a self,
        task: &'a Task,
        _result: &'a TaskResult,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.events
            .lock()
            .unwrap()
            .push((task.task_id.clone(), "completed".into()));
        Box::pin(async { Ok(()) })
    }

    fn notify_error<'a>(
        &'a self,
        task: &'a Task,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        self.events
            .lock()
            .unwrap()
            .push((task.task_id.clone(), message.to_string()));
        Box::pin(async { Ok(()) })
    }
}

/// Cancels the task on lookup, standing in for a user cancelling mid-flight
struct CancellingCache {
    queue: TaskQueue,
    task_id: OnceLock<String>,
}

impl ResultCache for CancellingCache {
    fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<Option<TaskResult>, CacheError>> {
        Box::pin(async move {
            if let Some(task_id) = self.task_id.get() {
                self.queue.cancel(task_id, Some("alice"), Some("changed my mind")).await.unwrap();
            }
            Ok(None)
        })
    }

    fn set<'a>(
        &'a self,
        _key: &'a str,
        _value: &'a TaskResult,
        _ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async { Ok(()) })
    }
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        lease: Duration::from_secs(60),
        idle_wait: Duration::from_millis(50),
        heartbeat_interval: Duration::from_millis(100),
        analysis_timeout: Duration::from_secs(120),
        error_backoff: Duration::from_millis(50),
    }
}

fn worker(fx: &Fixture, config: AnalysisConfig, notifier: Arc<RecordingNotifier>) -> Worker {
    Worker::new(
        fx.queue.clone(),
        Arc::new(ModelAnalyzer::new(config)),
        Arc::new(StandardCalculator::default()),
        notifier,
        worker_config(),
    )
    .with_id("w-test")
}

async fn enqueue(fx: &Fixture, model_id: &str) -> String {
    fx.queue
        .enqueue(
            NewTask::for_model(model_id).owned_by("alice"),
            QuotationParams::default(),
            Priority::Normal,
            NotificationOptions {
                kind: NotificationType::System,
                target: None,
            },
        )
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dense_model_completes_with_early_stop() {
    let fx = Fixture::new().await;
    write_dense_stl(&fx.approved().join("dense.stl"), 500_000);
    let notifier = Arc::new(RecordingNotifier::default());
    let worker = worker(&fx, AnalysisConfig::default(), notifier.clone());

    let task_id = enqueue(&fx, "dense").await;
    let outcome = worker.run_once().await.unwrap();
    assert_eq!(
        outcome,
        Outcome::Completed {
            task_id: task_id.clone(),
            from_cache: false
        }
    );

    let task = fx.queue.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);
    assert!(task.locked_by.is_none());

    let result = task.result_data.unwrap();
    assert_eq!(result.task_id, task_id);
    assert!(!result.from_cache);
    assert!(result.analysis.early_stopped);
    assert!(result.analysis.performance_metrics.unwrap().early_stopped);
    assert!(result.analysis.completion_percentage < 100.0);
    assert_eq!(result.analysis.metrics.polygon_count, 500_000);
    assert!(result.quotation.final_price > 0.0);

    assert_eq!(notifier.events(), vec![(task_id, "completed".to_string())]);
    assert_eq!(worker.run_once().await.unwrap(), Outcome::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_identical_task_is_served_from_cache() {
    let fx = Fixture::new().await;
    fx.add_cube("cube");
    let cache = Arc::new(DiskCache::new(fx.dir.path().join("cache")).await);
    let notifier = Arc::new(RecordingNotifier::default());
    let worker = worker(&fx, AnalysisConfig::default(), notifier.clone()).with_cache(cache);

    let first = enqueue(&fx, "cube").await;
    assert!(matches!(
        worker.run_once().await.unwrap(),
        Outcome::Completed { from_cache: false, .. }
    ));

    let second = enqueue(&fx, "cube").await;
    assert_eq!(
        worker.run_once().await.unwrap(),
        Outcome::Completed {
            task_id: second.clone(),
            from_cache: true
        }
    );

    let original = fx.queue.get(&first).await.unwrap().unwrap().result_data.unwrap();
    let cached = fx.queue.get(&second).await.unwrap().unwrap().result_data.unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.task_id, second);
    assert_eq!(cached.model_id.as_deref(), Some("cube"));
    assert_eq!(cached.quotation.final_price, original.quotation.final_price);
    assert_eq!(notifier.events().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_broken_model_fails_with_clean_message() {
    let fx = Fixture::new().await;
    let path = fx.approved().join("broken.stl");
    // Header declares a thousand triangles but carries none
    let mut bytes = vec![0u8; 80];
    bytes.extend_from_slice(&1_000u32.to_le_bytes());
    std::fs::write(&path, bytes).unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let worker = worker(&fx, AnalysisConfig::default(), notifier.clone());

    let task_id = enqueue(&fx, "broken").await;
    assert_eq!(
        worker.run_once().await.unwrap(),
        Outcome::Failed {
            task_id: task_id.clone()
        }
    );

    let task = fx.queue.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.result_data.is_none());
    let message = task.error_message.unwrap();
    assert!(!message.is_empty());
    assert!(message.len() <= 500);
    assert!(!message.contains(fx.dir.path().to_str().unwrap()));

    assert_eq!(notifier.events(), vec![(task_id, message)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vanished_model_is_estimated_from_sidecar() {
    let fx = Fixture::new().await;
    let path = fx.add_cube("cube");
    std::fs::write(
        fx.approved().join("cube.json"),
        r#"{"polygon_count": 12, "width": 10.0, "height": 10.0, "depth": 10.0}"#,
    )
    .unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let worker = worker(&fx, AnalysisConfig::default(), notifier.clone());

    let task_id = enqueue(&fx, "cube").await;
    std::fs::remove_file(&path).unwrap();

    assert_eq!(
        worker.run_once().await.unwrap(),
        Outcome::Completed {
            task_id: task_id.clone(),
            from_cache: false
        }
    );
    let result = fx.queue.get(&task_id).await.unwrap().unwrap().result_data.unwrap();
    assert!(result.analysis.is_estimated);
    assert_eq!(result.analysis.metrics.polygon_count, 12);
    assert!(result.quotation.final_price > 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vanished_model_without_sidecar_fails() {
    let fx = Fixture::new().await;
    let path = fx.add_cube("cube");
    let notifier = Arc::new(RecordingNotifier::default());
    let worker = worker(&fx, AnalysisConfig::default(), notifier);

    let task_id = enqueue(&fx, "cube").await;
    std::fs::remove_file(&path).unwrap();

    assert_eq!(
        worker.run_once().await.unwrap(),
        Outcome::Failed { task_id }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_task_cancelled_mid_flight_is_dropped() {
    let fx = Fixture::new().await;
    fx.add_cube("cube");
    let cache = Arc::new(CancellingCache {
        queue: fx.queue.clone(),
        task_id: OnceLock::new(),
    });
    let notifier = Arc::new(RecordingNotifier::default());
    let worker = worker(&fx, AnalysisConfig::default(), notifier.clone()).with_cache(cache.clone());

    let task_id = enqueue(&fx, "cube").await;
    cache.task_id.set(task_id.clone()).unwrap();

    assert_eq!(
        worker.run_once().await.unwrap(),
        Outcome::Dropped {
            task_id: task_id.clone()
        }
    );

    let task = fx.queue.get(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.error_message.as_deref(), Some("Task cancelled: changed my mind"));
    assert!(task.result_data.is_none());
    assert!(notifier.events().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_stops_on_shutdown() {
    let fx = Fixture::new().await;
    fx.add_cube("cube");
    let task_id = enqueue(&fx, "cube").await;

    let notifier = Arc::new(RecordingNotifier::default());
    let worker = worker(&fx, AnalysisConfig::default(), notifier);
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));

    let mut status = TaskStatus::Queued;
    for _ in 0..100 {
        status = fx.queue.get(&task_id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status, TaskStatus::Completed);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
