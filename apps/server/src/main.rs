// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MeshQuote Server binary: HTTP API plus in-process queue workers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use meshquote_analysis::{ModelAnalyzer, QuotationCalculator, StandardCalculator};
use meshquote_server::services::{
    queue, DiskCache, LocalModelStorage, LogNotifier, Notifier, QueueConfig, TaskQueue, Worker,
    WorkerConfig,
};
use meshquote_server::{AppState, Config};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();
    init_tracing(&config.log_format);

    tracing::info!(
        port = config.port,
        cache_dir = %config.cache_dir,
        workers = config.worker_count,
        batch_size = config.batch_size,
        early_stopping_threshold = config.early_stopping_threshold,
        precision_level = config.precision_level,
        "Starting MeshQuote Server"
    );

    let pool = queue::connect(&config.database_url, config.db_max_connections)
        .await
        .context("connecting to the queue database")?;
    let storage = Arc::new(LocalModelStorage::new(
        config.model_dirs.clone(),
        config.approved_model_dir.clone(),
    ));
    let task_queue = TaskQueue::new(
        pool,
        storage,
        QueueConfig {
            admins: config.admin_user_ids.iter().cloned().collect(),
            ..Default::default()
        },
    );
    task_queue
        .ensure_schema()
        .await
        .context("creating the task table")?;

    let cache = Arc::new(DiskCache::new(&config.cache_dir).await);
    let analyzer = Arc::new(ModelAnalyzer::new(
        config.analysis_config().context("invalid analysis settings")?,
    ));
    let calculator: Arc<dyn QuotationCalculator> = Arc::new(StandardCalculator::default());
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(config.worker_count + 1);
    for _ in 0..config.worker_count.max(1) {
        let mut worker = Worker::new(
            task_queue.clone(),
            Arc::clone(&analyzer),
            Arc::clone(&calculator),
            Arc::clone(&notifier),
            WorkerConfig::from(&config),
        );
        if config.use_cache {
            worker = worker.with_cache(cache.clone());
        }
        handles.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }
    handles.push(tokio::spawn(queue::run_retention(
        task_queue.clone(),
        config.retention_days,
        Duration::from_secs(config.cleanup_interval_secs.max(60)),
        shutdown_rx,
    )));

    let state = AppState {
        queue: task_queue,
        cache,
        config: Arc::new(config.clone()),
    };
    let app = meshquote_server::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("Waiting for workers to finish their current task");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    Ok(())
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,meshquote_server=debug"));

    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
