// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Strategy selection and batched streaming analysis
//!
//! A model is read one of three ways:
//!
//! - **Direct**: small models are read to completion.
//! - **Batched**: large STL/OBJ files are streamed in batches and may stop
//!   early once the partial results are representative.
//! - **Sampled**: large 3MF/G-code files are split into a few bounded
//!   samples whose results are combined and scaled.
//!
//! Recoverable failures fall back to a metadata estimate when the model
//! reference carries metadata.

use std::f64::consts::PI;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Instant;

use meshquote_core::{gcode, threemf, FileType, GcodeSummary, Triangle, TriangleReader};

use crate::config::AnalysisConfig;
use crate::early_stop::{EarlyStopMonitor, PartialResult, StopReason};
use crate::error::{AnalysisError, Result};
use crate::estimate;
use crate::metrics::{hollow_ratio, thin_wall_proxy, AccumulatedMetrics, Dimensions, ModelMetrics};
use crate::model::{validate_model, ModelInfo, ModelMetadata, ModelRef};
use crate::result::{AnalysisResult, PerformanceMetrics, SamplingInfo, Strategy};
use crate::sampler;

/// Filament diameter assumed when converting filament length to volume
pub const FILAMENT_DIAMETER_MM: f64 = 1.75;
/// Share of extruded filament that ends up in the part
const EXTRUSION_EFFICIENCY: f64 = 0.95;
/// Share of the toolpath extent assumed to be solid
const GCODE_FILL_RATIO: f64 = 0.25;
/// Layer count at which the G-code overhang proxy saturates
const GCODE_OVERHANG_SATURATION_LAYERS: f64 = 500.0;

/// Progress reported after every batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisProgress {
    pub processed: u64,
    pub total: u64,
    pub batch: u64,
    pub total_batches: u64,
}

impl AnalysisProgress {
    /// Share of the expected triangles read so far, in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64).min(1.0)
    }
}

/// A fallible triangle stream that may know its length
pub trait TriangleSource: Iterator<Item = meshquote_core::Result<Triangle>> {
    /// Expected number of triangles, refined as the stream advances
    fn total_hint(&self) -> Option<u64>;
}

impl TriangleSource for TriangleReader {
    fn total_hint(&self) -> Option<u64> {
        self.expected_total()
    }
}

/// Infallible triangles with a fixed expected total
pub struct KnownTotal<I> {
    inner: I,
    total: u64,
}

impl<I> KnownTotal<I>
where
    I: Iterator<Item = Triangle>,
{
    pub fn new(inner: I, total: u64) -> Self {
        Self { inner, total }
    }
}

impl<I> Iterator for KnownTotal<I>
where
    I: Iterator<Item = Triangle>,
{
    type Item = meshquote_core::Result<Triangle>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Ok)
    }
}

impl<I> TriangleSource for KnownTotal<I>
where
    I: Iterator<Item = Triangle>,
{
    fn total_hint(&self) -> Option<u64> {
        Some(self.total)
    }
}

/// What a streamed analysis read and why it ended
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub accumulated: AccumulatedMetrics,
    /// Expected triangle count when the stream ended
    pub total: u64,
    pub batches: u64,
    pub stop_reason: StopReason,
}

impl StreamOutcome {
    #[inline]
    pub fn processed(&self) -> u64 {
        self.accumulated.triangle_count
    }

    /// Stopped before reading every expected triangle
    pub fn early_stopped(&self) -> bool {
        self.stop_reason != StopReason::Exhausted && self.processed() < self.total
    }

    pub fn completion_percentage(&self) -> f64 {
        if !self.early_stopped() || self.total == 0 {
            return 100.0;
        }
        (self.processed() as f64 / self.total as f64 * 100.0).min(100.0)
    }

    /// Metrics extrapolated to the expected total when stopped early
    pub fn metrics(&self) -> ModelMetrics {
        if self.early_stopped() {
            let factor = self.total as f64 / self.processed().max(1) as f64;
            self.accumulated.to_metrics(self.total, factor)
        } else {
            self.accumulated.to_metrics(self.processed(), 1.0)
        }
    }
}

/// Stream `source` in batches, checking the early-stop policy after each
/// full batch.
///
/// `fallback_total` stands in for the expected total until the source can
/// report one. Early stopping follows `config.early_stopping()`; a
/// `deadline` stops the stream cooperatively after the batch that crosses
/// it.
pub fn analyze_stream<S>(
    source: &mut S,
    fallback_total: u64,
    config: &AnalysisConfig,
    deadline: Option<Instant>,
    progress: &mut dyn FnMut(&AnalysisProgress),
) -> Result<StreamOutcome>
where
    S: TriangleSource + ?Sized,
{
    let batch_size = config.batch_size() as u64;
    let mut acc = AccumulatedMetrics::new();
    let mut monitor = EarlyStopMonitor::new(config);
    let mut in_batch = 0u64;
    let mut batches = 0u64;
    let mut stop_reason = None;

    while let Some(item) = source.next() {
        acc.add(&item?);
        in_batch += 1;
        if in_batch < batch_size {
            continue;
        }
        in_batch = 0;
        batches += 1;

        let processed = acc.triangle_count;
        let total = source.total_hint().unwrap_or(fallback_total).max(processed);
        let total_batches = total.div_ceil(batch_size);
        acc.refresh_estimates();

        let scale = total as f64 / processed as f64;
        monitor.record(PartialResult {
            processed,
            surface_area: acc.surface_area * scale,
            volume: acc.volume() * scale,
        });
        progress(&AnalysisProgress {
            processed,
            total,
            batch: batches,
            total_batches,
        });
        tracing::debug!(batch = batches, processed, total, "Batch complete");

        if config.early_stopping() {
            if let Some(reason) = monitor.should_stop_early(processed, total, batches, total_batches) {
                stop_reason = Some(reason);
                break;
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            stop_reason = Some(StopReason::TimeBudget);
            break;
        }
    }

    let processed = acc.triangle_count;
    if in_batch > 0 {
        batches += 1;
    }
    acc.refresh_estimates();

    let stop_reason = stop_reason.unwrap_or(StopReason::Exhausted);
    let total = match stop_reason {
        StopReason::Exhausted => processed,
        _ => source.total_hint().unwrap_or(fallback_total).max(processed),
    };
    if stop_reason == StopReason::Exhausted && in_batch > 0 {
        progress(&AnalysisProgress {
            processed,
            total,
            batch: batches,
            total_batches: batches,
        });
    }

    Ok(StreamOutcome {
        accumulated: acc,
        total,
        batches,
        stop_reason,
    })
}

/// Metrics of every mesh in a 3MF model document
pub fn measure_model_xml(xml: &str) -> Result<ModelMetrics> {
    let mut acc = AccumulatedMetrics::new();
    let stats = threemf::visit_triangles(xml, |tri| acc.add(tri))?;
    if acc.triangle_count == 0 {
        return Err(AnalysisError::InvalidModel(
            "model document contains no mesh triangles".into(),
        ));
    }
    if stats.skipped > 0 {
        tracing::warn!(skipped = stats.skipped, "Triangles with out-of-range indices skipped");
    }
    Ok(acc.to_metrics(acc.triangle_count, 1.0))
}

/// Metrics implied by a G-code toolpath of `text_len` bytes
pub fn gcode_metrics(summary: &GcodeSummary, text_len: u64) -> ModelMetrics {
    let filament = summary.filament_mm.filter(|mm| *mm > 0.0);
    let polygon_count = match filament {
        Some(mm) => (mm / 2.0) as u64,
        None => text_len / 10,
    };

    let [width, height, depth] = summary.bounds.dimensions();
    let bounding_box_volume = width * height * depth;
    let radius = FILAMENT_DIAMETER_MM / 2.0;
    let volume = match filament {
        Some(mm) => mm * PI * radius * radius * EXTRUSION_EFFICIENCY,
        None => bounding_box_volume * GCODE_FILL_RATIO,
    };
    let surface_area = volume.powf(2.0 / 3.0) * 6.0;

    ModelMetrics {
        polygon_count,
        volume,
        surface_area,
        hollow_spaces: hollow_ratio(volume, bounding_box_volume),
        overhangs: (summary.layer_count as f64 / GCODE_OVERHANG_SATURATION_LAYERS).min(1.0),
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

/// Metrics of a G-code document held in memory
pub fn measure_gcode_text(text: &str) -> Result<ModelMetrics> {
    let summary = GcodeSummary::from_text(text);
    if summary.moves == 0 {
        return Err(AnalysisError::InvalidModel("G-code contains no moves".into()));
    }
    Ok(gcode_metrics(&summary, text.len() as u64))
}

fn measure_gcode_file(path: &Path, file_size: u64) -> Result<ModelMetrics> {
    let reader = BufReader::new(File::open(path)?);
    let summary = GcodeSummary::scan(reader, gcode::GCODE_LINE_CAP)?;
    if summary.cap_reached {
        tracing::warn!(lines = summary.lines_read, "G-code line cap reached");
    }
    if summary.moves == 0 {
        return Err(AnalysisError::InvalidModel("G-code contains no moves".into()));
    }
    Ok(gcode_metrics(&summary, file_size))
}

/// Everything measured by one strategy, before finalization
struct Run {
    strategy: Strategy,
    metrics: ModelMetrics,
    processed: u64,
    total: u64,
    batches: u64,
    stop_reason: Option<StopReason>,
    early_stopped: bool,
    completion_percentage: f64,
    sampling: Option<SamplingInfo>,
    estimation_reason: Option<String>,
}

impl Run {
    fn whole(strategy: Strategy, metrics: ModelMetrics) -> Self {
        let polygons = metrics.polygon_count;
        Self {
            strategy,
            metrics,
            processed: polygons,
            total: polygons,
            batches: 1,
            stop_reason: None,
            early_stopped: false,
            completion_percentage: 100.0,
            sampling: None,
            estimation_reason: None,
        }
    }

    fn streamed(strategy: Strategy, outcome: StreamOutcome) -> Self {
        Self {
            strategy,
            metrics: outcome.metrics(),
            processed: outcome.processed(),
            total: outcome.total,
            batches: outcome.batches,
            stop_reason: Some(outcome.stop_reason),
            early_stopped: outcome.early_stopped(),
            completion_percentage: outcome.completion_percentage(),
            sampling: None,
            estimation_reason: None,
        }
    }

    fn finish(self, info: Option<&ModelInfo>, started: Instant, track: bool) -> AnalysisResult {
        let mut result = AnalysisResult::finalize(self.metrics);
        result.early_stopped = self.early_stopped;
        result.completion_percentage = self.completion_percentage;
        if let Some(sampling) = self.sampling {
            result = result.sampled(sampling);
        }
        if let Some(reason) = self.estimation_reason {
            result = result.estimated(reason);
        }

        let performance = track.then(|| {
            let elapsed = started.elapsed();
            let secs = elapsed.as_secs_f64();
            PerformanceMetrics {
                strategy: self.strategy,
                file_type: info.map(|i| i.file_type),
                file_size: info.map_or(0, |i| i.file_size),
                estimated_triangles: info.map_or(self.total, |i| i.estimated_triangles),
                processed_triangles: self.processed,
                total_triangles: self.total,
                batches_processed: self.batches,
                early_stopped: self.early_stopped,
                stop_reason: self.stop_reason,
                completion_percentage: self.completion_percentage,
                elapsed_ms: elapsed.as_millis() as u64,
                triangles_per_second: if secs > 0.0 {
                    self.processed as f64 / secs
                } else {
                    0.0
                },
            }
        });
        result.with_performance(performance)
    }
}

/// Metadata estimate in place of a recoverable failure, otherwise the failure
fn estimate_or_fail(model: &ModelRef, err: AnalysisError, file_size: Option<u64>) -> Result<Run> {
    match &model.metadata {
        Some(metadata) if err.is_recoverable() => {
            tracing::warn!(error = %err, "Geometry analysis failed, estimating from metadata");
            let mut run = Run::whole(
                Strategy::Estimated,
                estimate::estimate_metrics(metadata, file_size),
            );
            run.estimation_reason = Some(format!("geometry analysis failed: {err}"));
            Ok(run)
        }
        _ => Err(err),
    }
}

/// Analyses models with a fixed configuration
#[derive(Debug, Clone, Default)]
pub struct ModelAnalyzer {
    config: AnalysisConfig,
}

impl ModelAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyse `model`, attaching performance metrics when `track` is set
    pub fn analyze(&self, model: &ModelRef, track: bool) -> Result<AnalysisResult> {
        self.analyze_with_progress(model, track, &mut |_| {})
    }

    /// Like [`analyze`](Self::analyze), reporting progress after every batch
    pub fn analyze_with_progress(
        &self,
        model: &ModelRef,
        track: bool,
        progress: &mut dyn FnMut(&AnalysisProgress),
    ) -> Result<AnalysisResult> {
        let started = Instant::now();

        let (run, info) = match validate_model(model, self.config.max_file_size()) {
            Ok(info) => {
                tracing::info!(
                    file_type = %info.file_type,
                    file_size = info.file_size,
                    estimated_triangles = info.estimated_triangles,
                    "Starting model analysis"
                );
                let run = match self.run(&model.path, &info, started, progress) {
                    Ok(run) => run,
                    Err(err) => estimate_or_fail(model, err, Some(info.file_size))?,
                };
                (run, Some(info))
            }
            Err(err) => (estimate_or_fail(model, err, None)?, None),
        };

        let result = run.finish(info.as_ref(), started, track);
        tracing::info!(
            polygons = result.metrics.polygon_count,
            complexity = result.complexity_score,
            early_stopped = result.early_stopped,
            sampled = result.is_sampled,
            estimated = result.is_estimated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model analysis complete"
        );
        Ok(result)
    }

    fn run(
        &self,
        path: &Path,
        info: &ModelInfo,
        started: Instant,
        progress: &mut dyn FnMut(&AnalysisProgress),
    ) -> Result<Run> {
        let direct = info.estimated_triangles <= self.config.batch_size() as u64;
        let deadline = self.config.time_budget().map(|budget| started + budget);

        match (info.file_type, direct) {
            (FileType::Stl | FileType::Obj, true) => {
                let config = self.config.clone().with_early_stopping(false);
                let outcome = self.stream(path, info, &config, deadline, progress)?;
                Ok(Run::streamed(Strategy::Direct, outcome))
            }
            (FileType::Stl | FileType::Obj, false) => {
                let outcome = self.stream(path, info, &self.config, deadline, progress)?;
                if outcome.early_stopped() {
                    tracing::info!(
                        reason = ?outcome.stop_reason,
                        processed = outcome.processed(),
                        total = outcome.total,
                        "Stopped streaming early"
                    );
                }
                Ok(Run::streamed(Strategy::Batched, outcome))
            }
            (FileType::ThreeMf, true) => {
                let xml = threemf::read_model_xml(path)?;
                Ok(Run::whole(Strategy::Direct, measure_model_xml(&xml)?))
            }
            (FileType::Gcode, true) => Ok(Run::whole(
                Strategy::Direct,
                measure_gcode_file(path, info.file_size)?,
            )),
            (FileType::ThreeMf | FileType::Gcode, false) => self.sample(path, info),
        }
    }

    fn stream(
        &self,
        path: &Path,
        info: &ModelInfo,
        config: &AnalysisConfig,
        deadline: Option<Instant>,
        progress: &mut dyn FnMut(&AnalysisProgress),
    ) -> Result<StreamOutcome> {
        let mut reader = TriangleReader::open(path, info.file_type)?;
        tracing::debug!(reader = reader.kind(), expected = ?reader.expected_total(), "Opened triangle stream");

        let outcome = analyze_stream(&mut reader, info.estimated_triangles, config, deadline, progress)?;
        if reader.cap_reached() {
            tracing::warn!(processed = outcome.processed(), "Line cap reached, model read partially");
        }
        if outcome.processed() == 0 {
            return Err(AnalysisError::InvalidModel("model contains no triangles".into()));
        }
        Ok(outcome)
    }

    fn sample(&self, path: &Path, info: &ModelInfo) -> Result<Run> {
        match sampler::analyze_sampled(path, info, &self.config)? {
            Some(combined) => {
                let sampled = combined.info.total_sampled_polygons;
                let mut run = Run::whole(Strategy::Sampled, combined.metrics);
                run.processed = sampled;
                run.batches = combined.info.samples_analyzed as u64;
                run.sampling = Some(combined.info);
                Ok(run)
            }
            None => {
                tracing::warn!("No sample could be analysed, estimating from file size");
                let polygons = info.file_size / estimate::FALLBACK_BYTES_PER_POLYGON;
                let metadata = ModelMetadata {
                    polygon_count: Some(polygons),
                    ..Default::default()
                };
                let mut run = Run::whole(
                    Strategy::Estimated,
                    estimate::estimate_metrics(&metadata, None),
                );
                run.estimation_reason = Some("no sample could be analysed".into());
                Ok(run)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshquote_core::Vertex;

    fn unit_triangles() -> impl Iterator<Item = Triangle> {
        std::iter::repeat(Triangle::new(
            Vertex::new(0.0, 0.0, 0.0),
            Vertex::new(1.0, 0.0, 0.0),
            Vertex::new(0.0, 1.0, 1.0),
        ))
    }

    fn config(batch: usize, threshold: u64) -> AnalysisConfig {
        AnalysisConfig::new(batch, threshold, 0.95).unwrap()
    }

    #[test]
    fn test_stream_exhausts_small_source() {
        let mut source = KnownTotal::new(unit_triangles().take(25), 25);
        let mut reports = Vec::new();
        let outcome = analyze_stream(&mut source, 0, &config(10, 100), None, &mut |p| {
            reports.push(*p)
        })
        .unwrap();

        assert_eq!(outcome.processed(), 25);
        assert_eq!(outcome.batches, 3);
        assert_eq!(outcome.stop_reason, StopReason::Exhausted);
        assert!(!outcome.early_stopped());
        assert_eq!(outcome.completion_percentage(), 100.0);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports.last().unwrap().processed, 25);
    }

    #[test]
    fn test_stream_stops_on_stable_partials() {
        let mut source = KnownTotal::new(unit_triangles().take(10_000), 10_000);
        let outcome = analyze_stream(&mut source, 0, &config(100, 1_000), None, &mut |_| {}).unwrap();

        assert_eq!(outcome.stop_reason, StopReason::Stabilized);
        assert!(outcome.early_stopped());
        assert_eq!(outcome.processed(), 1_000);

        let m = outcome.metrics();
        assert_eq!(m.polygon_count, 10_000);
        let per_triangle = outcome.accumulated.surface_area / 1_000.0;
        assert!((m.surface_area - per_triangle * 10_000.0).abs() < 1e-6);
        assert!((outcome.completion_percentage() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_stream_without_early_stopping_reads_everything() {
        let mut source = KnownTotal::new(unit_triangles().take(5_000), 5_000);
        let config = config(100, 1_000).with_early_stopping(false);
        let outcome = analyze_stream(&mut source, 0, &config, None, &mut |_| {}).unwrap();

        assert_eq!(outcome.processed(), 5_000);
        assert_eq!(outcome.stop_reason, StopReason::Exhausted);
    }

    #[test]
    fn test_stream_deadline() {
        let mut source = KnownTotal::new(unit_triangles().take(1_000), 1_000);
        let deadline = Some(Instant::now());
        let outcome = analyze_stream(&mut source, 0, &config(100, 1_000_000), deadline, &mut |_| {})
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::TimeBudget);
        assert_eq!(outcome.processed(), 100);
        assert!(outcome.early_stopped());
    }

    #[test]
    fn test_stream_error_propagates() {
        let items: Vec<meshquote_core::Result<Triangle>> = vec![Err(meshquote_core::Error::Truncated {
            expected: 50,
            got: 10,
        })];
        struct Failing(std::vec::IntoIter<meshquote_core::Result<Triangle>>);
        impl Iterator for Failing {
            type Item = meshquote_core::Result<Triangle>;
            fn next(&mut self) -> Option<Self::Item> {
                self.0.next()
            }
        }
        impl TriangleSource for Failing {
            fn total_hint(&self) -> Option<u64> {
                None
            }
        }

        let err = analyze_stream(&mut Failing(items.into_iter()), 0, &config(10, 10), None, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidModel(_)));
    }

    #[test]
    fn test_gcode_metrics() {
        let text = "; filament used [mm] = 1000.0\nG1 X0 Y0 Z0.2\nG1 X10 Y10 Z0.2\nG1 X10 Y10 Z0.4\n";
        let m = measure_gcode_text(text).unwrap();

        assert_eq!(m.polygon_count, 500);
        let expected_volume = 1000.0 * PI * 0.875 * 0.875 * 0.95;
        assert!((m.volume - expected_volume).abs() < 1e-6);
        assert_eq!(m.dimensions.width, 10.0);

        assert!(measure_gcode_text("; nothing here\n").is_err());
    }
}
