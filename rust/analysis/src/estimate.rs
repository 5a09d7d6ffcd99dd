// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Estimates for models whose geometry cannot be read
//!
//! The model is treated as a sphere whose radius grows with the cube root of
//! its polygon count. Anything declared in the metadata overrides the
//! corresponding guess. These functions never fail.

use std::f64::consts::PI;

use crate::metrics::{Dimensions, ModelMetrics};
use crate::model::ModelMetadata;
use crate::result::AnalysisResult;

/// Bytes per polygon assumed when only a file size is known
pub const FALLBACK_BYTES_PER_POLYGON: u64 = 50;

/// Share of the bounding box assumed to be solid
const FILL_RATIO: f64 = 0.7;

const DEFAULT_HOLLOW_SPACES: f64 = 0.3;
const DEFAULT_OVERHANGS: f64 = 0.5;
const DEFAULT_THIN_WALLS: f64 = 0.5;

/// Radius of the sphere standing in for a model with `polygons` triangles
#[inline]
pub fn estimated_radius(polygons: u64) -> f64 {
    (polygons as f64 / 1000.0).cbrt() * 10.0
}

/// Synthesize metrics from declared metadata
pub fn estimate_metrics(metadata: &ModelMetadata, file_size: Option<u64>) -> ModelMetrics {
    let polygon_count = metadata
        .polygon_count
        .or_else(|| {
            metadata
                .file_size
                .or(file_size)
                .map(|size| size / FALLBACK_BYTES_PER_POLYGON)
        })
        .unwrap_or(0);

    let radius = estimated_radius(polygon_count);
    let [width, height, depth] = metadata
        .dimensions()
        .unwrap_or([radius * 2.0, radius * 2.0, radius * 2.0]);
    let bounding_box_volume = width * height * depth;

    ModelMetrics {
        polygon_count,
        volume: metadata.volume.unwrap_or(bounding_box_volume * FILL_RATIO),
        surface_area: metadata.surface_area.unwrap_or(4.0 * PI * radius * radius),
        hollow_spaces: metadata.hollow_spaces.unwrap_or(DEFAULT_HOLLOW_SPACES),
        overhangs: metadata.overhangs.unwrap_or(DEFAULT_OVERHANGS),
        thin_walls: metadata.thin_walls.unwrap_or(DEFAULT_THIN_WALLS),
        dimensions: Dimensions {
            width,
            height,
            depth,
        },
        bounding_box_volume,
    }
}

/// Finalized result flagged as estimated
pub fn estimate_from_metadata(
    metadata: &ModelMetadata,
    file_size: Option<u64>,
    reason: impl Into<String>,
) -> AnalysisResult {
    AnalysisResult::finalize(estimate_metrics(metadata, file_size)).estimated(reason)
}

/// Finalized result built from nothing but a polygon estimate
pub fn estimate_from_polygons(polygons: u64, reason: impl Into<String>) -> AnalysisResult {
    let metadata = ModelMetadata {
        polygon_count: Some(polygons),
        ..Default::default()
    };
    estimate_from_metadata(&metadata, None, reason)
}
