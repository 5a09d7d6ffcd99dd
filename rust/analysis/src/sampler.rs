// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Representative samples of formats without cheap triangle streaming
//!
//! 3MF models are split by mesh object and G-code by layer. Each sample is
//! analysed on its own, then the results are combined and scaled up to the
//! estimated size of the whole model.

use std::path::Path;
use std::sync::LazyLock;

use meshquote_core::{threemf, FileType};
use rayon::prelude::*;
use regex::Regex;

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::metrics::{Dimensions, ModelMetrics};
use crate::model::ModelInfo;
use crate::optimizer::{measure_gcode_text, measure_model_xml};
use crate::result::SamplingInfo;

/// Estimated triangles covered by one sample
pub const TRIANGLES_PER_SAMPLE: u64 = 100_000;
pub const MIN_SAMPLES: usize = 3;
pub const MAX_SAMPLES: usize = 5;

const DEFAULT_UNIT: &str = "millimeter";

/// Layer boundaries across common slicer dialects
static LAYER_BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(?:;LAYER:\d+|; layer \d+,|;BEFORE_LAYER_CHANGE|G0 Z\d+\.\d+)")
        .expect("Invalid layer boundary regex")
});

/// Number of samples to take for a model of `estimated_triangles`
pub fn sample_count(estimated_triangles: u64) -> usize {
    let wanted = estimated_triangles.div_ceil(TRIANGLES_PER_SAMPLE);
    (wanted as usize).clamp(MIN_SAMPLES, MAX_SAMPLES)
}

/// What a sample holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Standalone 3MF model document
    ModelXml,
    /// Run of consecutive G-code layers
    Gcode,
}

/// A bounded, self-contained piece of a larger model
#[derive(Debug, Clone)]
pub struct Sample {
    pub index: usize,
    pub kind: SampleKind,
    pub content: String,
    /// Triangles the source document declares for this sample, if known
    pub declared_triangles: Option<u64>,
}

impl Sample {
    /// Analyse the sample through the direct path
    pub fn analyze(&self) -> Result<ModelMetrics> {
        match self.kind {
            SampleKind::ModelXml => measure_model_xml(&self.content),
            SampleKind::Gcode => measure_gcode_text(&self.content),
        }
    }
}

/// Split a model document into at most `samples` documents, each carrying a
/// contiguous group of mesh objects.
pub fn split_model_xml(xml: &str, samples: usize) -> Result<Vec<Sample>> {
    let outline = threemf::outline(xml)?;
    if outline.objects.is_empty() {
        return Err(AnalysisError::InvalidModel("model has no mesh objects".into()));
    }

    let namespace = xml_attr_escape(outline.namespace_or_default());
    let unit = xml_attr_escape(outline.unit.as_deref().unwrap_or(DEFAULT_UNIT));
    let per_group = outline.objects.len().div_ceil(samples.max(1));

    let docs = outline
        .objects
        .chunks(per_group)
        .enumerate()
        .map(|(index, group)| {
            let mut doc = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                 <model unit=\"{unit}\" xml:lang=\"en-US\" xmlns=\"{namespace}\">\n<resources>\n"
            );
            for object in group {
                doc.push_str(&xml[object.span.clone()]);
                doc.push('\n');
            }
            doc.push_str("</resources>\n<build/>\n</model>\n");
            Sample {
                index,
                kind: SampleKind::ModelXml,
                content: doc,
                declared_triangles: Some(group.iter().map(|o| o.triangles as u64).sum()),
            }
        })
        .collect();
    Ok(docs)
}

/// Split G-code into at most `samples` runs of consecutive layers.
///
/// Text before the first layer marker counts as a layer of its own.
pub fn split_gcode(text: &str, samples: usize) -> Vec<Sample> {
    let mut starts: Vec<usize> = LAYER_BOUNDARY.find_iter(text).map(|m| m.start()).collect();
    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }
    let layers: Vec<(usize, usize)> = starts
        .iter()
        .enumerate()
        .map(|(i, &start)| (start, starts.get(i + 1).copied().unwrap_or(text.len())))
        .filter(|(start, end)| end > start)
        .collect();
    if layers.is_empty() {
        return Vec::new();
    }

    let per_group = layers.len().div_ceil(samples.max(1));
    layers
        .chunks(per_group)
        .enumerate()
        .map(|(index, group)| {
            let start = group[0].0;
            let end = group[group.len() - 1].1;
            Sample {
                index,
                kind: SampleKind::Gcode,
                content: text[start..end].to_string(),
                declared_triangles: None,
            }
        })
        .collect()
}

/// Read `path` and split it into samples
pub fn create_samples(path: &Path, file_type: FileType, samples: usize) -> Result<Vec<Sample>> {
    match file_type {
        FileType::ThreeMf => split_model_xml(&threemf::read_model_xml(path)?, samples),
        FileType::Gcode => {
            let bytes = std::fs::read(path)?;
            Ok(split_gcode(&String::from_utf8_lossy(&bytes), samples))
        }
        other => Err(AnalysisError::UnsupportedFormat(format!(
            "{other} has no sampler"
        ))),
    }
}

/// Sampled metrics combined and scaled to the whole model
#[derive(Debug, Clone)]
pub struct Combined {
    pub metrics: ModelMetrics,
    pub info: SamplingInfo,
}

/// Combine per-sample metrics into whole-model metrics.
///
/// Extensive quantities are summed, ratios are averaged weighted by polygon
/// count and dimensions take the widest extent seen. Only polygon count,
/// volume and surface area are scaled by
/// `estimated_total / summed_polygons`. Returns `None` without results.
///
/// 3MF samples are batches of whole objects and `estimated_total` sums their
/// declared triangle counts, so the factor stays near 1 there: 3MF scaling
/// corrects partial reads but never extrapolates to unsampled objects.
pub fn combine_samples(
    results: &[ModelMetrics],
    sample_count: usize,
    estimated_total: u64,
) -> Option<Combined> {
    if results.is_empty() {
        return None;
    }

    let sampled: u64 = results.iter().map(|m| m.polygon_count).sum();
    let weight = |m: &ModelMetrics| {
        if sampled > 0 {
            m.polygon_count as f64 / sampled as f64
        } else {
            1.0 / results.len() as f64
        }
    };
    let weighted = |f: fn(&ModelMetrics) -> f64| -> f64 {
        results.iter().map(|m| f(m) * weight(m)).sum()
    };

    let widest = |f: fn(&Dimensions) -> f64| -> f64 {
        results.iter().map(|m| f(&m.dimensions)).fold(0.0, f64::max)
    };
    let dimensions = Dimensions {
        width: widest(|d| d.width),
        height: widest(|d| d.height),
        depth: widest(|d| d.depth),
    };

    let scale_factor = if sampled > 0 && estimated_total > 0 {
        estimated_total as f64 / sampled as f64
    } else {
        1.0
    };

    let metrics = ModelMetrics {
        polygon_count: (sampled as f64 * scale_factor).round() as u64,
        volume: results.iter().map(|m| m.volume).sum::<f64>() * scale_factor,
        surface_area: results.iter().map(|m| m.surface_area).sum::<f64>() * scale_factor,
        hollow_spaces: weighted(|m| m.hollow_spaces),
        overhangs: weighted(|m| m.overhangs),
        thin_walls: weighted(|m| m.thin_walls),
        dimensions,
        bounding_box_volume: dimensions.volume(),
    }
    .normalized();

    Some(Combined {
        info: SamplingInfo {
            sample_count,
            samples_analyzed: results.len(),
            total_sampled_polygons: sampled,
            estimated_total_polygons: metrics.polygon_count,
            scale_factor,
        },
        metrics,
    })
}

/// Sample, analyse and combine. `Ok(None)` means no sample could be analysed.
pub fn analyze_sampled(
    path: &Path,
    info: &ModelInfo,
    config: &AnalysisConfig,
) -> Result<Option<Combined>> {
    let count = sample_count(info.estimated_triangles);
    let samples = create_samples(path, info.file_type, count)?;
    tracing::info!(
        file_type = %info.file_type,
        requested = count,
        created = samples.len(),
        "Created model samples"
    );

    let results: Vec<(usize, Result<ModelMetrics>)> = if config.parallel_samples() {
        samples.par_iter().map(|s| (s.index, s.analyze())).collect()
    } else {
        samples.iter().map(|s| (s.index, s.analyze())).collect()
    };

    let metrics: Vec<ModelMetrics> = results
        .into_iter()
        .filter_map(|(index, result)| match result {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(sample = index, error = %e, "Sample analysis failed, skipping");
                None
            }
        })
        .collect();

    // Declared counts cover the whole model, so they beat a size guess
    let declared: Option<u64> = samples.iter().map(|s| s.declared_triangles).sum();
    let estimated_total = declared
        .filter(|n| *n > 0)
        .unwrap_or(info.estimated_triangles);
    Ok(combine_samples(&metrics, samples.len(), estimated_total))
}

fn xml_attr_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}
