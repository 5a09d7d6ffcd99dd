// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Analysis results

use std::time::{SystemTime, UNIX_EPOCH};

use meshquote_core::FileType;
use serde::{Deserialize, Serialize};

use crate::early_stop::StopReason;
use crate::metrics::ModelMetrics;
use crate::scoring;

/// How the geometry was read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Small model read to completion
    Direct,
    /// Streamed in batches with early stopping
    Batched,
    /// Representative samples analysed and combined
    Sampled,
    /// Synthesized from metadata or file size
    Estimated,
}

/// Where the sampled figures came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingInfo {
    pub sample_count: usize,
    pub samples_analyzed: usize,
    pub total_sampled_polygons: u64,
    pub estimated_total_polygons: u64,
    pub scale_factor: f64,
}

/// Timing and coverage of one analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub strategy: Strategy,
    /// Absent when the file never passed validation
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file_type: Option<FileType>,
    pub file_size: u64,
    pub estimated_triangles: u64,
    pub processed_triangles: u64,
    pub total_triangles: u64,
    pub batches_processed: u64,
    pub early_stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stop_reason: Option<StopReason>,
    pub completion_percentage: f64,
    pub elapsed_ms: u64,
    pub triangles_per_second: f64,
}

/// Finalized analysis of one model. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Weighted complexity in `[0, 100]`
    pub complexity_score: f64,
    pub metrics: ModelMetrics,
    pub estimated_print_time_minutes: u32,
    pub material_cost: f64,
    pub printing_cost: f64,
    pub total_cost: f64,
    /// Figures were synthesized rather than measured
    pub is_estimated: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub estimation_reason: Option<String>,
    pub is_sampled: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sampling_info: Option<SamplingInfo>,
    pub early_stopped: bool,
    pub completion_percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub performance_metrics: Option<PerformanceMetrics>,
    /// Unix seconds
    pub analysis_timestamp: u64,
}

impl AnalysisResult {
    /// Normalize the metrics and derive score, time and costs
    pub fn finalize(metrics: ModelMetrics) -> Self {
        let metrics = metrics.normalized();
        let complexity_score = scoring::complexity_score(&metrics);
        let print_minutes = scoring::print_time_minutes(&metrics, complexity_score);
        let material_cost = scoring::material_cost(&metrics);
        let printing_cost = scoring::printing_cost(print_minutes);

        Self {
            complexity_score,
            metrics,
            estimated_print_time_minutes: print_minutes,
            material_cost,
            printing_cost,
            total_cost: material_cost + printing_cost,
            is_estimated: false,
            estimation_reason: None,
            is_sampled: false,
            sampling_info: None,
            early_stopped: false,
            completion_percentage: 100.0,
            performance_metrics: None,
            analysis_timestamp: unix_now(),
        }
    }

    pub(crate) fn estimated(mut self, reason: impl Into<String>) -> Self {
        self.is_estimated = true;
        self.estimation_reason = Some(reason.into());
        self
    }

    pub(crate) fn sampled(mut self, info: SamplingInfo) -> Self {
        self.is_sampled = true;
        self.sampling_info = Some(info);
        self
    }

    pub(crate) fn with_performance(mut self, perf: Option<PerformanceMetrics>) -> Self {
        self.performance_metrics = perf;
        self
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Dimensions;

    #[test]
    fn test_finalize_derives_bbox_volume() {
        let metrics = ModelMetrics {
            polygon_count: 1000,
            volume: 8000.0,
            surface_area: 2400.0,
            dimensions: Dimensions {
                width: 20.0,
                height: 20.0,
                depth: 20.0,
            },
            ..Default::default()
        };
        let result = AnalysisResult::finalize(metrics);

        assert_eq!(result.metrics.bounding_box_volume, 8000.0);
        assert!(result.complexity_score > 0.0);
        assert!(result.estimated_print_time_minutes >= 30);
        assert_eq!(result.total_cost, result.material_cost + result.printing_cost);
        assert!(!result.is_estimated);
        assert!(result.analysis_timestamp > 0);
    }

    #[test]
    fn test_serialized_shape() {
        let result = AnalysisResult::finalize(ModelMetrics::default()).estimated("no geometry");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["is_estimated"], true);
        assert_eq!(json["estimation_reason"], "no geometry");
        assert!(json.get("performance_metrics").is_none());
        assert_eq!(json["metrics"]["dimensions"]["width"], 0.0);

        let back: AnalysisResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
