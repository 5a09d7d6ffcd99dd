// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Analysis configuration

use std::time::Duration;

use crate::error::{AnalysisError, Result};

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_EARLY_STOPPING_THRESHOLD: u64 = 100_000;
pub const DEFAULT_PRECISION_LEVEL: f64 = 0.95;
/// 100 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Immutable settings for one analysis call.
///
/// Every analyzer owns its own copy; nothing here is shared or mutated
/// while an analysis runs.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisConfig {
    batch_size: usize,
    early_stopping_threshold: u64,
    precision_level: f64,
    max_file_size: u64,
    early_stopping: bool,
    parallel_samples: bool,
    time_budget: Option<Duration>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            early_stopping_threshold: DEFAULT_EARLY_STOPPING_THRESHOLD,
            precision_level: DEFAULT_PRECISION_LEVEL,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            early_stopping: true,
            parallel_samples: true,
            time_budget: None,
        }
    }
}

impl AnalysisConfig {
    /// Create a validated configuration
    pub fn new(batch_size: usize, early_stopping_threshold: u64, precision_level: f64) -> Result<Self> {
        Self::default()
            .with_batch_size(batch_size)?
            .with_early_stopping_threshold(early_stopping_threshold)?
            .with_precision_level(precision_level)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(AnalysisError::InvalidConfig("batch_size must be positive".into()));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_early_stopping_threshold(mut self, threshold: u64) -> Result<Self> {
        if threshold == 0 {
            return Err(AnalysisError::InvalidConfig(
                "early_stopping_threshold must be positive".into(),
            ));
        }
        self.early_stopping_threshold = threshold;
        Ok(self)
    }

    pub fn with_precision_level(mut self, precision: f64) -> Result<Self> {
        if !(precision > 0.0 && precision <= 1.0) {
            return Err(AnalysisError::InvalidConfig(format!(
                "precision_level must be in (0, 1], got {precision}"
            )));
        }
        self.precision_level = precision;
        Ok(self)
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Result<Self> {
        if bytes == 0 {
            return Err(AnalysisError::InvalidConfig("max_file_size must be positive".into()));
        }
        self.max_file_size = bytes;
        Ok(self)
    }

    /// Stop streaming once this much wall-clock time has passed
    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    /// Disable early stopping so batched analysis reads every triangle
    pub fn with_early_stopping(mut self, enabled: bool) -> Self {
        self.early_stopping = enabled;
        self
    }

    pub fn with_parallel_samples(mut self, enabled: bool) -> Self {
        self.parallel_samples = enabled;
        self
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[inline]
    pub fn early_stopping_threshold(&self) -> u64 {
        self.early_stopping_threshold
    }

    #[inline]
    pub fn precision_level(&self) -> f64 {
        self.precision_level
    }

    #[inline]
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    #[inline]
    pub fn early_stopping(&self) -> bool {
        self.early_stopping
    }

    #[inline]
    pub fn parallel_samples(&self) -> bool {
        self.parallel_samples
    }

    #[inline]
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.batch_size(), 10_000);
        assert_eq!(config.early_stopping_threshold(), 100_000);
        assert_eq!(config.precision_level(), 0.95);
        assert_eq!(config.max_file_size(), 100 * 1024 * 1024);
        assert!(config.early_stopping());
        assert!(config.time_budget().is_none());
    }

    #[test]
    fn test_validation() {
        assert!(AnalysisConfig::new(0, 10, 0.9).is_err());
        assert!(AnalysisConfig::new(10, 0, 0.9).is_err());
        assert!(AnalysisConfig::new(10, 10, 0.0).is_err());
        assert!(AnalysisConfig::new(10, 10, 1.5).is_err());
        assert!(AnalysisConfig::new(10, 10, f64::NAN).is_err());

        let config = AnalysisConfig::new(500, 2_000, 1.0).unwrap();
        assert_eq!(config.batch_size(), 500);
        assert_eq!(config.early_stopping_threshold(), 2_000);
    }
}
