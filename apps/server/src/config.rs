// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Server configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use meshquote_analysis::{AnalysisConfig, AnalysisError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to listen on.
    pub port: u16,
    /// Queue database, `postgres://…` or `sqlite://…`.
    pub database_url: String,
    pub db_max_connections: u32,
    /// Directory for the result cache.
    pub cache_dir: String,
    /// Look up and store results in the cache.
    pub use_cache: bool,
    /// Directories models may be read from.
    pub model_dirs: Vec<PathBuf>,
    /// Directory holding `<model_id>.<ext>` files.
    pub approved_model_dir: PathBuf,
    /// Number of queue workers in this process.
    pub worker_count: usize,
    /// Lease granted on claim and on every heartbeat.
    pub lease_secs: u64,
    /// Sleep between polls of an empty queue.
    pub idle_wait_secs: u64,
    /// Interval between progress heartbeats during analysis.
    pub heartbeat_secs: u64,
    pub batch_size: usize,
    pub early_stopping_threshold: u64,
    pub precision_level: f64,
    pub max_file_size_mb: u64,
    /// Wall-clock bound on a single analysis.
    pub analysis_timeout_secs: u64,
    /// Terminal tasks older than this are deleted.
    pub retention_days: u64,
    pub cleanup_interval_secs: u64,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Users allowed to cancel any task.
    pub admin_user_ids: Vec<String>,
    /// `json` for structured logs, anything else for pretty output.
    pub log_format: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let approved_model_dir: PathBuf = std::env::var("APPROVED_MODEL_DIR")
            .unwrap_or_else(|_| "./models/approved".into())
            .into();

        Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()
                .unwrap_or(8080),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./meshquote.db?mode=rwc".into()),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),
            cache_dir: std::env::var("CACHE_DIR").unwrap_or_else(|_| {
                std::env::current_dir()
                    .ok()
                    .and_then(|dir| dir.join(".cache").to_str().map(|s| s.to_string()))
                    .unwrap_or_else(|| "./.cache".into())
            }),
            use_cache: std::env::var("USE_CACHE")
                .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            model_dirs: std::env::var("MODEL_DIRS")
                .map(|dirs| split_list(&dirs).into_iter().map(PathBuf::from).collect())
                .unwrap_or_else(|_| vec![approved_model_dir.clone(), "./models/uploads".into()]),
            approved_model_dir,
            worker_count: std::env::var("WORKER_COUNT")
                .unwrap_or_else(|_| num_cpus::get().to_string())
                .parse()
                .unwrap_or_else(|_| num_cpus::get()),
            lease_secs: std::env::var("LEASE_SECS")
                .unwrap_or_else(|_| "300".into())
                .parse()
                .unwrap_or(300),
            idle_wait_secs: std::env::var("IDLE_WAIT_SECS")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .unwrap_or(5),
            heartbeat_secs: std::env::var("HEARTBEAT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
            batch_size: std::env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "10000".into())
                .parse()
                .unwrap_or(10_000),
            early_stopping_threshold: std::env::var("EARLY_STOPPING_THRESHOLD")
                .unwrap_or_else(|_| "100000".into())
                .parse()
                .unwrap_or(100_000),
            precision_level: std::env::var("PRECISION_LEVEL")
                .unwrap_or_else(|_| "0.95".into())
                .parse()
                .unwrap_or(0.95),
            max_file_size_mb: std::env::var("MAX_FILE_SIZE_MB")
                .unwrap_or_else(|_| "100".into())
                .parse()
                .unwrap_or(100),
            analysis_timeout_secs: std::env::var("ANALYSIS_TIMEOUT_SECS")
                .unwrap_or_else(|_| "240".into())
                .parse()
                .unwrap_or(240),
            retention_days: std::env::var("RETENTION_DAYS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
            cleanup_interval_secs: std::env::var("CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".into())
                .parse()
                .unwrap_or(3600),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
            admin_user_ids: std::env::var("ADMIN_USER_IDS")
                .map(|ids| split_list(&ids))
                .unwrap_or_default(),
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".into()),
        }
    }

    /// Analysis settings shared by every worker.
    ///
    /// The cooperative time budget is slightly shorter than the hard
    /// timeout so a slow stream can still return a partial result.
    pub fn analysis_config(&self) -> Result<AnalysisConfig, AnalysisError> {
        let budget = Duration::from_secs(self.analysis_timeout_secs.max(1)).mul_f64(0.9);
        Ok(AnalysisConfig::new(self.batch_size, self.early_stopping_threshold, self.precision_level)?
            .with_max_file_size(self.max_file_size_mb * 1024 * 1024)?
            .with_time_budget(Some(budget)))
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_secs(self.idle_wait_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list_skips_blanks() {
        assert_eq!(split_list(" a, ,b ,"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_analysis_config_uses_budget_below_timeout() {
        let mut config = Config::from_env();
        config.batch_size = 500;
        config.analysis_timeout_secs = 100;
        let analysis = config.analysis_config().unwrap();
        assert_eq!(analysis.batch_size(), 500);
        assert_eq!(analysis.time_budget(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_analysis_config_rejects_bad_precision() {
        let mut config = Config::from_env();
        config.precision_level = 1.5;
        assert!(config.analysis_config().is_err());
    }
}
