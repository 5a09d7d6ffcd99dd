// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Health check endpoint.

use axum::Json;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
}

/// API information response.
#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

fn endpoint(method: &'static str, path: &'static str, description: &'static str) -> EndpointInfo {
    EndpointInfo {
        method,
        path,
        description,
    }
}

/// GET /api/v1/health
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "meshquote-server",
    })
}

/// GET / - API information endpoint.
pub async fn info() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        service: "meshquote-server",
        version: env!("CARGO_PKG_VERSION"),
        description: "3D model complexity analysis and quotation queue",
        endpoints: vec![
            endpoint("GET", "/api/v1/health", "Health check"),
            endpoint("POST", "/api/v1/tasks", "Queue a model for analysis and pricing"),
            endpoint("GET", "/api/v1/tasks/:task_id", "Task status, progress and result"),
            endpoint("POST", "/api/v1/tasks/:task_id/cancel", "Cancel a pending task"),
            endpoint("GET", "/api/v1/queue/stats", "Queue statistics"),
            endpoint("GET", "/api/v1/cache/:key", "Retrieve a cached result"),
        ],
    })
}
