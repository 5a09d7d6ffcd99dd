// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Task outcome notifications.

use futures::future::BoxFuture;
use thiserror::Error;

use crate::types::{NotificationType, Task, TaskResult};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Tells requesters how their task ended.
///
/// Failures are reported back to the worker, which logs them and carries on.
pub trait Notifier: Send + Sync {
    fn notify_completion<'a>(
        &'a self,
        task: &'a Task,
        result: &'a TaskResult,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;

    fn notify_error<'a>(
        &'a self,
        task: &'a Task,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Records notifications as structured log events
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_completion<'a>(
        &'a self,
        task: &'a Task,
        result: &'a TaskResult,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            if task.notification_type == NotificationType::None {
                tracing::debug!(task_id = %task.task_id, "Notifications disabled");
                return Ok(());
            }
            tracing::info!(
                task_id = %task.task_id,
                channel = task.notification_type.as_str(),
                target = task.notification_target.as_deref().unwrap_or("-"),
                complexity = complexity_label(result.analysis.complexity_score),
                print_time = %format_minutes(result.quotation.print_time_minutes),
                price = result.quotation.final_price,
                estimated = result.quotation.is_estimated,
                "Quotation ready"
            );
            Ok(())
        })
    }

    fn notify_error<'a>(
        &'a self,
        task: &'a Task,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            if task.notification_type == NotificationType::None {
                tracing::debug!(task_id = %task.task_id, "Notifications disabled");
                return Ok(());
            }
            tracing::info!(
                task_id = %task.task_id,
                channel = task.notification_type.as_str(),
                target = task.notification_target.as_deref().unwrap_or("-"),
                message,
                "Quotation failed"
            );
            Ok(())
        })
    }
}

/// Human label for a complexity score
pub fn complexity_label(score: f64) -> &'static str {
    match score {
        s if s >= 80.0 => "very high",
        s if s >= 60.0 => "high",
        s if s >= 40.0 => "medium",
        s if s >= 20.0 => "low",
        _ => "very low",
    }
}

/// `2h 5min`, `2h` or `45min`
pub fn format_minutes(minutes: u32) -> String {
    let (hours, mins) = (minutes / 60, minutes % 60);
    match (hours, mins) {
        (0, m) => format!("{m}min"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}min"),
    }
}
