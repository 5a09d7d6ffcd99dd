// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Complexity score, print time and cost estimates

use crate::metrics::ModelMetrics;

/// Polygon count treated as maximally complex
pub const REFERENCE_POLYGONS: f64 = 500_000.0;
/// 5 x 5 x 5 cm
pub const REFERENCE_VOLUME_MM3: f64 = 125_000.0;
/// 150 cm²
pub const REFERENCE_AREA_MM2: f64 = 15_000.0;

const WEIGHT_POLYGONS: f64 = 0.30;
const WEIGHT_VOLUME: f64 = 0.25;
const WEIGHT_AREA: f64 = 0.15;
const WEIGHT_HOLLOW: f64 = 0.10;
const WEIGHT_OVERHANGS: f64 = 0.10;
const WEIGHT_THIN_WALLS: f64 = 0.10;

/// Minutes per cm³ before complexity adjustments
pub const BASE_MINUTES_PER_CM3: f64 = 12.0;
pub const MINIMUM_PRINT_MINUTES: u32 = 30;

/// Currency units per cm³ of material
pub const MATERIAL_COST_PER_CM3: f64 = 0.5;
pub const MINIMUM_MATERIAL_COST: f64 = 0.50;
pub const HOURLY_PRINT_COST: f64 = 15.0;
pub const MINIMUM_PRINTING_COST: f64 = 1.0;

/// Weighted complexity in `[0, 100]`
pub fn complexity_score(m: &ModelMetrics) -> f64 {
    let polygons = (m.polygon_count as f64 / REFERENCE_POLYGONS).min(1.0);
    let volume = (m.volume / REFERENCE_VOLUME_MM3).min(1.0);
    let area = (m.surface_area / REFERENCE_AREA_MM2).min(1.0);

    let score = polygons * WEIGHT_POLYGONS
        + volume * WEIGHT_VOLUME
        + area * WEIGHT_AREA
        + m.hollow_spaces * WEIGHT_HOLLOW
        + m.overhangs * WEIGHT_OVERHANGS
        + m.thin_walls * WEIGHT_THIN_WALLS;

    (score * 100.0).clamp(0.0, 100.0)
}

/// Estimated print time in whole minutes, never below the minimum
pub fn print_time_minutes(m: &ModelMetrics, score: f64) -> u32 {
    let base = m.volume * BASE_MINUTES_PER_CM3 / 60.0;
    let complexity_factor = 1.0 + score / 100.0 * 1.5;
    let hollow_factor = 1.0 - m.hollow_spaces * 0.3;
    let overhang_factor = 1.0 + m.overhangs * 0.5;
    let thin_wall_factor = 1.0 + m.thin_walls * 0.4;

    let minutes = base * complexity_factor * hollow_factor * overhang_factor * thin_wall_factor;
    let rounded = if minutes.is_finite() {
        minutes.round().min(u32::MAX as f64) as u32
    } else {
        0
    };
    rounded.max(MINIMUM_PRINT_MINUTES)
}

pub fn material_cost(m: &ModelMetrics) -> f64 {
    (m.volume * MATERIAL_COST_PER_CM3 / 1000.0).max(MINIMUM_MATERIAL_COST)
}

pub fn printing_cost(print_minutes: u32) -> f64 {
    (print_minutes as f64 / 60.0 * HOURLY_PRINT_COST).max(MINIMUM_PRINTING_COST)
}
