// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Early-stopping policy for batched streaming

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;

/// Partial results compared by the stabilization rule
pub const STABILITY_WINDOW: usize = 3;

/// Largest relative spread across the window that still counts as stable
pub const STABILITY_TOLERANCE: f64 = 0.02;

/// The stabilization rule is ignored for the first batches
pub const MIN_BATCHES_FOR_STABILITY: u64 = 5;

/// Batch-coverage stops need at least this many triangles
pub const BATCH_COVERAGE_MIN_TRIANGLES: u64 = 200_000;

/// Why a stream ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every triangle was read
    Exhausted,
    /// `processed / total` reached the precision level
    PrecisionReached,
    /// Enough batches of a large model were read
    BatchCoverage,
    /// Surface area and volume stopped moving
    Stabilized,
    /// The wall-clock budget ran out
    TimeBudget,
}

/// Surface area and volume extrapolated to the full model after a batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialResult {
    pub processed: u64,
    pub surface_area: f64,
    pub volume: f64,
}

/// Tracks partial results and decides when a stream may stop
#[derive(Debug, Clone)]
pub struct EarlyStopMonitor {
    threshold: u64,
    precision: f64,
    history: VecDeque<PartialResult>,
}

impl EarlyStopMonitor {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            threshold: config.early_stopping_threshold(),
            precision: config.precision_level(),
            history: VecDeque::with_capacity(STABILITY_WINDOW),
        }
    }

    pub fn record(&mut self, partial: PartialResult) {
        if self.history.len() == STABILITY_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(partial);
    }

    pub fn history(&self) -> impl Iterator<Item = &PartialResult> {
        self.history.iter()
    }

    /// Decide whether to stop after `current_batch` of `total_batches`.
    ///
    /// Nothing stops before `processed` reaches the threshold.
    pub fn should_stop_early(
        &self,
        processed: u64,
        total: u64,
        current_batch: u64,
        total_batches: u64,
    ) -> Option<StopReason> {
        if processed < self.threshold {
            return None;
        }

        let total = total.max(1) as f64;
        if processed as f64 / total >= self.precision {
            return Some(StopReason::PrecisionReached);
        }

        let total_batches = total_batches.max(1) as f64;
        if current_batch as f64 / total_batches >= self.precision
            && processed > BATCH_COVERAGE_MIN_TRIANGLES
        {
            return Some(StopReason::BatchCoverage);
        }

        if current_batch > MIN_BATCHES_FOR_STABILITY && self.is_stabilizing() {
            return Some(StopReason::Stabilized);
        }

        None
    }

    /// Both surface area and volume moved less than the tolerance across
    /// the last few partial results
    pub fn is_stabilizing(&self) -> bool {
        if self.history.len() < STABILITY_WINDOW {
            return false;
        }
        let stable = |values: &mut dyn Iterator<Item = f64>| {
            let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
            if max <= f64::EPSILON {
                return true;
            }
            (max - min) / max < STABILITY_TOLERANCE
        };

        stable(&mut self.history.iter().map(|p| p.surface_area))
            && stable(&mut self.history.iter().map(|p| p.volume))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> EarlyStopMonitor {
        EarlyStopMonitor::new(&AnalysisConfig::default())
    }

    fn partial(processed: u64, area: f64, volume: f64) -> PartialResult {
        PartialResult {
            processed,
            surface_area: area,
            volume,
        }
    }

    #[test]
    fn test_nothing_below_threshold() {
        let mut m = monitor();
        for i in 0..3 {
            m.record(partial(i, 10.0, 10.0));
        }
        assert_eq!(m.should_stop_early(99_999, 100_000, 9, 10), None);
    }

    #[test]
    fn test_precision_rule() {
        let m = monitor();
        assert_eq!(
            m.should_stop_early(475_000, 500_000, 48, 50),
            Some(StopReason::PrecisionReached)
        );
        assert_eq!(m.should_stop_early(400_000, 500_000, 40, 50), None);
    }

    #[test]
    fn test_batch_coverage_rule() {
        let m = monitor();
        // Batch position ahead of triangle position
        assert_eq!(
            m.should_stop_early(250_000, 300_000, 19, 20),
            Some(StopReason::BatchCoverage)
        );
        // Same coverage on a smaller model is not enough
        assert_eq!(m.should_stop_early(150_000, 170_000, 19, 20), None);
    }

    #[test]
    fn test_stabilization_rule() {
        let mut m = monitor();
        m.record(partial(80_000, 1000.0, 500.0));
        m.record(partial(90_000, 1005.0, 503.0));
        m.record(partial(100_000, 1010.0, 505.0));
        assert!(m.is_stabilizing());
        assert_eq!(
            m.should_stop_early(100_000, 1_000_000, 10, 100),
            Some(StopReason::Stabilized)
        );
        // Too early in the stream
        assert_eq!(m.should_stop_early(100_000, 1_000_000, 5, 100), None);
    }

    #[test]
    fn test_stability_needs_both_metrics() {
        let mut m = monitor();
        m.record(partial(1, 1000.0, 100.0));
        m.record(partial(2, 1001.0, 150.0));
        m.record(partial(3, 1002.0, 200.0));
        assert!(!m.is_stabilizing());
    }

    #[test]
    fn test_window_slides() {
        let mut m = monitor();
        m.record(partial(1, 1.0, 1.0));
        m.record(partial(2, 500.0, 500.0));
        m.record(partial(3, 1000.0, 1000.0));
        m.record(partial(4, 1000.0, 1000.0));
        m.record(partial(5, 1000.0, 1000.0));
        assert!(m.is_stabilizing());
        assert_eq!(m.history().count(), STABILITY_WINDOW);
    }
}
