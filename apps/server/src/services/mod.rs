// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Queue, workers and the collaborators they depend on.

pub mod cache;
pub mod notifier;
pub mod queue;
pub mod sanitize;
pub mod storage;
pub mod worker;

pub use cache::{adaptive_ttl, DiskCache, Fingerprint, ResultCache};
pub use notifier::{LogNotifier, Notifier};
pub use queue::{QueueConfig, QueueError, QueueStats, TaskQueue, TaskUpdate};
pub use sanitize::sanitize_error;
pub use storage::{LocalModelStorage, ModelSource, ModelStorage, ResolvedModel, StorageError};
pub use worker::{Outcome, Worker, WorkerConfig, WorkerError};
