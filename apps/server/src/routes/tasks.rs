// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task submission, lookup and cancellation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use crate::error::ApiError;
use crate::types::{
    CancelRequest, CancelResponse, EnqueueRequest, EnqueueResponse, Task, TaskStatus,
};
use crate::AppState;

/// Header carrying the authenticated caller's id
pub const USER_ID_HEADER: &str = "x-user-id";

fn requester(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// POST /api/v1/tasks
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let mut task = request.task;
    if task.user_id.is_none() {
        task.user_id = requester(&headers).map(String::from);
    }

    let task_id = state
        .queue
        .enqueue(task, request.parameters, request.priority, request.notification)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            task_id,
            status: TaskStatus::Queued,
        }),
    ))
}

/// GET /api/v1/tasks/:task_id
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    state
        .queue
        .get(&task_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id}")))
}

/// POST /api/v1/tasks/:task_id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<CancelResponse>, ApiError> {
    let reason = body.and_then(|Json(req)| req.reason);
    let cancelled = state
        .queue
        .cancel(&task_id, requester(&headers), reason.as_deref())
        .await?;

    Ok(Json(CancelResponse { task_id, cancelled }))
}
