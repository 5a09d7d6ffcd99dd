// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Queue task types.

use std::fmt;
use std::str::FromStr;

use meshquote_analysis::{AnalysisResult, Quotation, QuotationParams};
use serde::{Deserialize, Serialize};

/// Lifecycle of a queued task.
///
/// `Queued → Processing → {Completed | Failed}`, with `Cancelled`
/// reachable from either non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{s}'"))
    }
}

/// Scheduling priority. Higher values are claimed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn value(&self) -> i64 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 5,
            Priority::High => 10,
        }
    }

    /// Snap an arbitrary number onto the nearest of 0, 5 and 10
    pub fn normalize(value: i64) -> Self {
        match value.clamp(0, 10) {
            0..=2 => Priority::Low,
            3..=7 => Priority::Normal,
            _ => Priority::High,
        }
    }
}

impl Serialize for Priority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.value())
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Name(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Priority::normalize(n)),
            Raw::Name(name) => match name.to_ascii_lowercase().as_str() {
                "low" => Ok(Priority::Low),
                "normal" => Ok(Priority::Normal),
                "high" => Ok(Priority::High),
                other => Err(serde::de::Error::custom(format!("unknown priority '{other}'"))),
            },
        }
    }
}

/// How the requester wants to hear about the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    System,
    #[default]
    None,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::System => "system",
            NotificationType::None => "none",
        }
    }
}

impl FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "email" => Ok(NotificationType::Email),
            "system" => Ok(NotificationType::System),
            "none" | "" => Ok(NotificationType::None),
            other => Err(format!("unknown notification type '{other}'")),
        }
    }
}

/// Notification preferences attached at enqueue time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
    #[serde(default, rename = "type")]
    pub kind: NotificationType,
    /// Address or channel understood by the notifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// What to analyse and on whose behalf.
///
/// Exactly one of `model_id` and `file_path` must be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    /// Defaults to the SHA-256 of the resolved file
    #[serde(default)]
    pub file_hash: Option<String>,
}

impl NewTask {
    pub fn for_model(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            ..Default::default()
        }
    }

    pub fn for_file(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// A persisted task row.
///
/// Timestamps are Unix microseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub user_id: Option<String>,
    pub model_id: Option<String>,
    pub file_path: Option<String>,
    pub file_hash: Option<String>,
    pub parameters: QuotationParams,
    pub priority: Priority,
    pub status: TaskStatus,
    pub progress: u8,
    pub result_data: Option<TaskResult>,
    pub error_message: Option<String>,
    pub notification_type: NotificationType,
    pub notification_target: Option<String>,
    pub locked_by: Option<String>,
    pub locked_until: Option<i64>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
}

/// Outcome stored on a completed task and in the result cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    #[serde(flatten)]
    pub analysis: AnalysisResult,
    pub quotation: Quotation,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Served from the result cache instead of a fresh analysis
    #[serde(default)]
    pub from_cache: bool,
    /// Unix seconds
    pub processed_at: u64,
}
