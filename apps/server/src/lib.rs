// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MeshQuote Server - quotation queue and analysis workers.
//!
//! Models are submitted as tasks, persisted in a lease-based queue and
//! picked up by workers that analyse the geometry, price the print and
//! cache the outcome.
//!
//! # Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `POST /api/v1/tasks` - Queue a model for analysis (202 Accepted)
//! - `GET /api/v1/tasks/:task_id` - Task status, progress and result
//! - `POST /api/v1/tasks/:task_id/cancel` - Cancel a pending task
//! - `GET /api/v1/queue/stats` - Queue statistics
//! - `GET /api/v1/cache/:key` - Retrieve a cached result

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod types;

pub use config::Config;

use services::{ResultCache, TaskQueue};

/// Request bodies only carry task descriptions, never model files
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: TaskQueue,
    pub cache: Arc<dyn ResultCache>,
    pub config: Arc<Config>,
}

/// Build the HTTP router with its middleware stack
pub fn router(state: AppState) -> Router {
    let request_timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .route("/", get(routes::health::info))
        .route("/api/v1/health", get(routes::health::check))
        .route("/api/v1/tasks", post(routes::tasks::create))
        .route("/api/v1/tasks/:task_id", get(routes::tasks::get_task))
        .route("/api/v1/tasks/:task_id/cancel", post(routes::tasks::cancel))
        .route("/api/v1/queue/stats", get(routes::queue::stats))
        .route("/api/v1/cache/:key", get(routes::cache::get_cached))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
