// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Type definitions for tasks, API requests and responses.

mod request;
mod response;
mod task;

pub use request::{CancelRequest, EnqueueRequest};
pub use response::{CancelResponse, EnqueueResponse};
pub use task::{
    NewTask, NotificationOptions, NotificationType, Priority, Task, TaskResult, TaskStatus,
};
