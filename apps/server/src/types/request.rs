// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Request types for the API.

use meshquote_analysis::QuotationParams;
use serde::Deserialize;

use super::{NewTask, NotificationOptions, Priority};

/// Body of `POST /api/v1/tasks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueRequest {
    /// Model source and owner.
    #[serde(flatten)]
    pub task: NewTask,

    /// Quotation choices; defaults to PLA at standard quality.
    #[serde(default)]
    pub parameters: QuotationParams,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub notification: NotificationOptions,
}

/// Body of `POST /api/v1/tasks/:task_id/cancel`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}
