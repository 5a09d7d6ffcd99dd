// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Disk-based result cache using cacache.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{Task, TaskResult};

/// Prefix on every result key
pub const KEY_PREFIX: &str = "quote_";

/// Bumped when pricing changes so stale quotes are never served
const FINGERPRINT_VERSION: &str = "1";

const BASE_TTL: Duration = Duration::from_secs(2 * 3600);
const MIN_TTL: Duration = Duration::from_secs(3600);
const MAX_TTL: Duration = Duration::from_secs(24 * 3600);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(#[from] cacache::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Everything that changes the price of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fingerprint<'a> {
    pub model_id: Option<&'a str>,
    pub file_hash: Option<&'a str>,
    pub material: String,
    pub quality: String,
    pub scale: f64,
    pub infill_percentage: Option<u32>,
    pub custom_settings: Option<&'a serde_json::Value>,
    version: &'static str,
}

impl<'a> Fingerprint<'a> {
    pub fn for_task(task: &'a Task) -> Self {
        let params = &task.parameters;
        Self {
            model_id: task.model_id.as_deref(),
            file_hash: task.file_hash.as_deref(),
            material: params.material.to_ascii_lowercase(),
            quality: params.quality.to_ascii_lowercase(),
            scale: params.scale,
            infill_percentage: params.infill_percentage,
            custom_settings: params.custom_settings.as_ref(),
            version: FINGERPRINT_VERSION,
        }
    }
}

/// Stored results of finished tasks
pub trait ResultCache: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<TaskResult>, CacheError>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a TaskResult,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>>;

    /// Key for a fingerprint: prefix plus the SHA-256 of its JSON form
    fn generate_key(&self, fingerprint: &Fingerprint<'_>) -> String {
        generate_key(fingerprint)
    }
}

pub fn generate_key(fingerprint: &Fingerprint<'_>) -> String {
    // Serializing a plain struct of strings and numbers cannot fail.
    let json = serde_json::to_vec(fingerprint).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    format!("{KEY_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Longer lifetimes for more complex models, between one and 24 hours
pub fn adaptive_ttl(complexity_score: f64) -> Duration {
    let score = if complexity_score.is_finite() {
        complexity_score.clamp(0.0, 100.0)
    } else {
        0.0
    };
    BASE_TTL
        .mul_f64(1.0 + score / 100.0 * 2.0)
        .clamp(MIN_TTL, MAX_TTL)
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    /// Unix milliseconds
    expires_at: u64,
    value: TaskResult,
}

/// Content-addressable disk cache with per-entry expiry.
#[derive(Debug, Clone)]
pub struct DiskCache {
    cache_dir: PathBuf,
}

impl DiskCache {
    /// Create a new cache in the specified directory.
    pub async fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let path = cache_dir.into();

        if let Err(e) = tokio::fs::create_dir_all(&path).await {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "Failed to create cache directory"
            );
        }

        Self { cache_dir: path }
    }

    async fn read(&self, key: &str) -> Result<Option<TaskResult>, CacheError> {
        let data = match cacache::read(&self.cache_dir, key).await {
            Ok(data) => data,
            Err(cacache::Error::EntryNotFound(_, _)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let envelope: Envelope = serde_json::from_slice(&data)?;
        if now_millis() >= envelope.expires_at {
            tracing::debug!(key = %key, "Cache entry expired");
            if let Err(e) = cacache::remove(&self.cache_dir, key).await {
                tracing::warn!(key = %key, error = %e, "Failed to remove expired cache entry");
            }
            return Ok(None);
        }
        Ok(Some(envelope.value))
    }

    async fn write(&self, key: &str, value: &TaskResult, ttl: Duration) -> Result<(), CacheError> {
        let envelope = Envelope {
            expires_at: now_millis().saturating_add(ttl.as_millis() as u64),
            value: value.clone(),
        };
        let data = serde_json::to_vec(&envelope)?;
        cacache::write(&self.cache_dir, key, &data).await?;
        tracing::debug!(key = %key, size = data.len(), ttl_secs = ttl.as_secs(), "Cached result");
        Ok(())
    }
}

impl ResultCache for DiskCache {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<TaskResult>, CacheError>> {
        Box::pin(self.read(key))
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: &'a TaskResult,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(self.write(key, value, ttl))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
