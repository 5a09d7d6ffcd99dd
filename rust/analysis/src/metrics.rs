// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Metric accumulation and normalization

use meshquote_core::{BoundingBox, Triangle};
use serde::{Deserialize, Serialize};

/// Triangle count at which the overhang proxy saturates
pub const OVERHANG_SATURATION_TRIANGLES: f64 = 50_000.0;

/// Running totals for one analysis call
#[derive(Debug, Clone, Default)]
pub struct AccumulatedMetrics {
    pub triangle_count: u64,
    pub surface_area: f64,
    pub signed_volume: f64,
    pub bounds: BoundingBox,
    /// Heuristic proxies refreshed after every batch
    pub overhangs: f64,
    pub thin_walls: f64,
}

impl AccumulatedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, tri: &Triangle) {
        self.triangle_count += 1;
        self.surface_area += tri.area();
        self.signed_volume += tri.signed_volume();
        self.bounds.extend_triangle(tri);
    }

    /// Best-effort enclosed volume
    #[inline]
    pub fn volume(&self) -> f64 {
        self.signed_volume.abs()
    }

    /// Recompute the overhang and thin-wall proxies from the running totals
    pub fn refresh_estimates(&mut self) {
        self.overhangs = overhang_proxy(self.triangle_count);
        self.thin_walls = thin_wall_proxy(self.volume(), self.surface_area);
    }

    /// Finalize into metrics, scaling extensive quantities by `factor` and
    /// reporting `polygon_count` triangles.
    pub fn to_metrics(&self, polygon_count: u64, factor: f64) -> ModelMetrics {
        let volume = self.volume() * factor;
        let surface_area = self.surface_area * factor;
        let [width, height, depth] = self.bounds.dimensions();
        let bounding_box_volume = width * height * depth;

        ModelMetrics {
            polygon_count,
            volume,
            surface_area,
            hollow_spaces: hollow_ratio(volume, bounding_box_volume),
            overhangs: overhang_proxy(polygon_count),
            thin_walls: thin_wall_proxy(volume, surface_area),
            dimensions: Dimensions {
                width,
                height,
                depth,
            },
            bounding_box_volume,
        }
        .normalized()
    }
}

/// Share of the bounding box not filled by the part
#[inline]
pub fn hollow_ratio(volume: f64, bounding_box_volume: f64) -> f64 {
    if bounding_box_volume > 0.0 {
        1.0 - volume / bounding_box_volume
    } else {
        0.0
    }
}

/// Dense meshes tend to carry more overhanging detail
#[inline]
pub fn overhang_proxy(triangles: u64) -> f64 {
    (triangles as f64 / OVERHANG_SATURATION_TRIANGLES).min(1.0)
}

/// Low volume-to-area ratio suggests thin walls
#[inline]
pub fn thin_wall_proxy(volume: f64, surface_area: f64) -> f64 {
    if surface_area > 0.0 {
        (0.5 - volume / surface_area / 10.0).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Bounding-box extents in model units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
}

impl Dimensions {
    pub fn volume(&self) -> f64 {
        self.width * self.height * self.depth
    }
}

/// Final geometric metrics of a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetrics {
    pub polygon_count: u64,
    pub volume: f64,
    pub surface_area: f64,
    pub hollow_spaces: f64,
    pub overhangs: f64,
    pub thin_walls: f64,
    pub dimensions: Dimensions,
    pub bounding_box_volume: f64,
}

/// NaN-safe floor at zero
#[inline]
fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

/// NaN-safe clamp into `[0, 1]`
#[inline]
fn ratio(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

impl ModelMetrics {
    /// Clamp ratios to `[0, 1]`, floor extensive quantities at zero and
    /// derive the bounding-box volume from the dimensions when missing.
    pub fn normalize(&mut self) {
        self.volume = non_negative(self.volume);
        self.surface_area = non_negative(self.surface_area);
        self.hollow_spaces = ratio(self.hollow_spaces);
        self.overhangs = ratio(self.overhangs);
        self.thin_walls = ratio(self.thin_walls);
        self.dimensions.width = non_negative(self.dimensions.width);
        self.dimensions.height = non_negative(self.dimensions.height);
        self.dimensions.depth = non_negative(self.dimensions.depth);
        self.bounding_box_volume = non_negative(self.bounding_box_volume);
        if self.bounding_box_volume <= 0.0 {
            self.bounding_box_volume = self.dimensions.volume();
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use meshquote_core::Vertex;

    #[test]
    fn test_accumulate_and_scale() {
        let mut acc = AccumulatedMetrics::new();
        let tri = Triangle::new(
            Vertex::new(0.0, 0.0, 0.0),
            Vertex::new(2.0, 0.0, 0.0),
            Vertex::new(0.0, 2.0, 1.0),
        );
        acc.add(&tri);
        acc.add(&tri);
        acc.refresh_estimates();

        assert_eq!(acc.triangle_count, 2);
        assert!(acc.surface_area > 0.0);
        assert_relative_eq!(acc.overhangs, 2.0 / 50_000.0);

        let m = acc.to_metrics(10, 5.0);
        assert_eq!(m.polygon_count, 10);
        assert_relative_eq!(m.surface_area, acc.surface_area * 5.0);
        assert_eq!(m.dimensions.width, 2.0);
        assert_relative_eq!(m.bounding_box_volume, 4.0);
    }

    #[test]
    fn test_normalize() {
        let mut m = ModelMetrics {
            polygon_count: 5,
            volume: -3.0,
            surface_area: f64::NAN,
            hollow_spaces: 1.7,
            overhangs: -0.2,
            thin_walls: 0.4,
            dimensions: Dimensions {
                width: 2.0,
                height: 3.0,
                depth: 4.0,
            },
            bounding_box_volume: 0.0,
        };
        m.normalize();

        assert_eq!(m.volume, 0.0);
        assert_eq!(m.surface_area, 0.0);
        assert_eq!(m.hollow_spaces, 1.0);
        assert_eq!(m.overhangs, 0.0);
        assert_eq!(m.thin_walls, 0.4);
        assert_eq!(m.bounding_box_volume, 24.0);
    }

    #[test]
    fn test_proxies() {
        assert_eq!(overhang_proxy(100_000), 1.0);
        assert_eq!(thin_wall_proxy(1.0, 0.0), 0.0);
        assert_relative_eq!(thin_wall_proxy(1.0, 6.0), 0.5 - 1.0 / 60.0);
        assert_eq!(hollow_ratio(1.0, 0.0), 0.0);
        assert_relative_eq!(hollow_ratio(1.0, 4.0), 0.75);
    }
}
