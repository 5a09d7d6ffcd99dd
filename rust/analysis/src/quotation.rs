// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Price quotations built on top of an analysis result

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::result::AnalysisResult;

/// Extra material lost to supports, purging and failed starts
pub const WASTE_FACTOR: f64 = 1.15;
pub const SETUP_COST: f64 = 5.0;
pub const MINIMUM_MATERIAL_COST: f64 = 1.0;
pub const MINIMUM_PRINTING_COST: f64 = 5.0;
pub const MINIMUM_PRINT_MINUTES: u32 = 15;
pub const DEFAULT_MARGIN_RATE: f64 = 0.35;
/// Quotes stay valid for a week
pub const VALIDITY_SECS: u64 = 7 * 24 * 60 * 60;

const SUPPORT_OVERHANG_THRESHOLD: f64 = 0.3;
const SUPPORT_SURCHARGE: f64 = 0.15;
const COMPLEXITY_SCORE_THRESHOLD: f64 = 70.0;
const COMPLEXITY_SURCHARGE: f64 = 10.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuotationError {
    #[error("Unknown material: {0}")]
    UnknownMaterial(String),

    #[error("Unknown quality: {0}")]
    UnknownQuality(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Printing material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub id: &'static str,
    pub name: &'static str,
    pub price_per_kg: f64,
    /// g/cm³
    pub density: f64,
    pub printer_cost_per_hour: f64,
}

/// Print quality preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quality {
    pub id: &'static str,
    pub layer_height: f64,
    pub time_factor: f64,
    pub default_infill: u32,
}

pub const MATERIALS: &[Material] = &[
    Material {
        id: "pla",
        name: "PLA",
        price_per_kg: 120.0,
        density: 1.24,
        printer_cost_per_hour: 10.0,
    },
    Material {
        id: "petg",
        name: "PETG",
        price_per_kg: 150.0,
        density: 1.27,
        printer_cost_per_hour: 12.0,
    },
    Material {
        id: "abs",
        name: "ABS",
        price_per_kg: 140.0,
        density: 1.04,
        printer_cost_per_hour: 15.0,
    },
    Material {
        id: "tpu",
        name: "TPU",
        price_per_kg: 220.0,
        density: 1.21,
        printer_cost_per_hour: 20.0,
    },
    Material {
        id: "nylon",
        name: "Nylon",
        price_per_kg: 280.0,
        density: 1.02,
        printer_cost_per_hour: 25.0,
    },
    Material {
        id: "resin",
        name: "Resin",
        price_per_kg: 350.0,
        density: 1.12,
        printer_cost_per_hour: 35.0,
    },
];

pub const QUALITIES: &[Quality] = &[
    Quality {
        id: "draft",
        layer_height: 0.3,
        time_factor: 0.7,
        default_infill: 15,
    },
    Quality {
        id: "standard",
        layer_height: 0.2,
        time_factor: 1.0,
        default_infill: 20,
    },
    Quality {
        id: "high",
        layer_height: 0.1,
        time_factor: 1.8,
        default_infill: 25,
    },
    Quality {
        id: "ultra",
        layer_height: 0.06,
        time_factor: 3.0,
        default_infill: 30,
    },
    Quality {
        id: "engineering",
        layer_height: 0.15,
        time_factor: 1.5,
        default_infill: 50,
    },
];

pub fn material(id: &str) -> Option<&'static Material> {
    MATERIALS.iter().find(|m| m.id.eq_ignore_ascii_case(id))
}

pub fn quality(id: &str) -> Option<&'static Quality> {
    QUALITIES.iter().find(|q| q.id.eq_ignore_ascii_case(id))
}

fn default_material() -> String {
    "pla".into()
}

fn default_quality() -> String {
    "standard".into()
}

fn default_scale() -> f64 {
    1.0
}

/// Customer choices for a quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotationParams {
    #[serde(default = "default_material")]
    pub material: String,
    #[serde(default = "default_quality")]
    pub quality: String,
    /// Uniform scale applied to the model
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infill_percentage: Option<u32>,
    /// Free-form slicer overrides, carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_settings: Option<serde_json::Value>,
}

impl Default for QuotationParams {
    fn default() -> Self {
        Self {
            material: default_material(),
            quality: default_quality(),
            scale: default_scale(),
            infill_percentage: None,
            custom_settings: None,
        }
    }
}

impl QuotationParams {
    pub fn validate(&self) -> Result<(), QuotationError> {
        if material(&self.material).is_none() {
            return Err(QuotationError::UnknownMaterial(self.material.clone()));
        }
        if quality(&self.quality).is_none() {
            return Err(QuotationError::UnknownQuality(self.quality.clone()));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(QuotationError::InvalidParameter(format!(
                "scale must be positive, got {}",
                self.scale
            )));
        }
        if let Some(infill) = self.infill_percentage {
            if infill > 100 {
                return Err(QuotationError::InvalidParameter(format!(
                    "infill {infill}% exceeds 100%"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub material: f64,
    pub printing: f64,
    pub supports: f64,
    pub complexity: f64,
    pub total: f64,
}

/// A priced quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quotation {
    pub material: String,
    pub quality: String,
    pub complexity_score: f64,
    pub print_time_minutes: u32,
    pub estimated_weight_grams: f64,
    pub supports_required: bool,
    pub layer_height: f64,
    pub infill_percentage: u32,
    pub costs: CostBreakdown,
    pub final_price: f64,
    pub is_estimated: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub estimation_reason: Option<String>,
    /// Unix seconds
    pub valid_until: u64,
}

impl Quotation {
    /// Quote built from the analysis figures alone, used when pricing fails
    pub fn estimated(
        analysis: &AnalysisResult,
        params: &QuotationParams,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            material: params.material.clone(),
            quality: params.quality.clone(),
            complexity_score: round_to(analysis.complexity_score, 1),
            print_time_minutes: analysis.estimated_print_time_minutes,
            estimated_weight_grams: 0.0,
            supports_required: analysis.metrics.overhangs > SUPPORT_OVERHANG_THRESHOLD,
            layer_height: 0.0,
            infill_percentage: params.infill_percentage.unwrap_or(0),
            costs: CostBreakdown {
                material: analysis.material_cost,
                printing: analysis.printing_cost,
                total: analysis.total_cost,
                ..Default::default()
            },
            final_price: round_to(analysis.total_cost, 2),
            is_estimated: true,
            estimation_reason: Some(reason.into()),
            valid_until: analysis.analysis_timestamp + VALIDITY_SECS,
        }
    }
}

/// Turns an analysis into a price
pub trait QuotationCalculator: Send + Sync {
    fn calculate(
        &self,
        analysis: &AnalysisResult,
        params: &QuotationParams,
    ) -> Result<Quotation, QuotationError>;
}

/// Material and quality tables with waste, setup cost and margin
#[derive(Debug, Clone)]
pub struct StandardCalculator {
    margin_rate: f64,
}

impl Default for StandardCalculator {
    fn default() -> Self {
        Self {
            margin_rate: DEFAULT_MARGIN_RATE,
        }
    }
}

impl StandardCalculator {
    pub fn with_margin(margin_rate: f64) -> Result<Self, QuotationError> {
        if !(0.0..1.0).contains(&margin_rate) {
            return Err(QuotationError::InvalidParameter(format!(
                "margin {margin_rate} must be in [0, 1)"
            )));
        }
        Ok(Self { margin_rate })
    }

    /// Price after margin, rounded up to the next half unit
    pub fn apply_margin(&self, total_cost: f64) -> f64 {
        (total_cost / (1.0 - self.margin_rate) * 2.0).ceil() / 2.0
    }
}

impl QuotationCalculator for StandardCalculator {
    fn calculate(
        &self,
        analysis: &AnalysisResult,
        params: &QuotationParams,
    ) -> Result<Quotation, QuotationError> {
        params.validate()?;
        let material = material(&params.material)
            .ok_or_else(|| QuotationError::UnknownMaterial(params.material.clone()))?;
        let quality = quality(&params.quality)
            .ok_or_else(|| QuotationError::UnknownQuality(params.quality.clone()))?;

        let volume_factor = params.scale.powi(3);
        let volume_mm3 = analysis.metrics.volume * volume_factor;
        let weight_grams = volume_mm3 * material.density / 1000.0;
        let material_cost =
            (weight_grams / 1000.0 * material.price_per_kg * WASTE_FACTOR).max(MINIMUM_MATERIAL_COST);

        let base_minutes = analysis.estimated_print_time_minutes as f64 * volume_factor;
        let adjusted_minutes = base_minutes * quality.time_factor;
        let printing_cost = (adjusted_minutes / 60.0 * material.printer_cost_per_hour + SETUP_COST)
            .max(MINIMUM_PRINTING_COST);
        let print_time_minutes =
            (adjusted_minutes.round().min(u32::MAX as f64) as u32).max(MINIMUM_PRINT_MINUTES);

        let supports_required = analysis.metrics.overhangs > SUPPORT_OVERHANG_THRESHOLD;
        let supports = if supports_required {
            analysis.printing_cost * SUPPORT_SURCHARGE
        } else {
            0.0
        };
        let complexity = if analysis.complexity_score > COMPLEXITY_SCORE_THRESHOLD {
            COMPLEXITY_SURCHARGE
        } else {
            0.0
        };

        let total = material_cost + printing_cost + supports + complexity;
        Ok(Quotation {
            material: material.id.to_string(),
            quality: quality.id.to_string(),
            complexity_score: round_to(analysis.complexity_score, 1),
            print_time_minutes,
            estimated_weight_grams: round_to(weight_grams, 2),
            supports_required,
            layer_height: quality.layer_height,
            infill_percentage: params.infill_percentage.unwrap_or(quality.default_infill),
            costs: CostBreakdown {
                material: round_to(material_cost, 2),
                printing: round_to(printing_cost, 2),
                supports: round_to(supports, 2),
                complexity,
                total: round_to(total, 2),
            },
            final_price: self.apply_margin(total),
            is_estimated: analysis.is_estimated,
            estimation_reason: analysis.estimation_reason.clone(),
            valid_until: analysis.analysis_timestamp + VALIDITY_SECS,
        })
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
