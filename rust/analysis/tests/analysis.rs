// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Write as _;
use std::path::Path;
use std::time::Duration;

use approx::assert_relative_eq;
use meshquote_analysis::{
    AnalysisConfig, AnalysisError, ModelAnalyzer, ModelMetadata, ModelRef, StopReason, Strategy,
};

const CUBE_VERTICES: [[f32; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [0.0, 1.0, 1.0],
];

const CUBE_FACES: [[usize; 3]; 12] = [
    [0, 2, 1],
    [0, 3, 2],
    [4, 5, 6],
    [4, 6, 7],
    [0, 1, 5],
    [0, 5, 4],
    [2, 3, 7],
    [2, 7, 6],
    [1, 2, 6],
    [1, 6, 5],
    [0, 4, 7],
    [0, 7, 3],
];

/// Area of the repeated triangle in [`write_repeated_stl`]
const REPEATED_AREA: f64 = std::f64::consts::SQRT_2 / 2.0;

fn stl_bytes(triangles: &[[[f32; 3]; 3]], declared: u32) -> Vec<u8> {
    let mut out = vec![0u8; 80];
    out.extend_from_slice(&declared.to_le_bytes());
    for tri in triangles {
        out.extend_from_slice(&[0u8; 12]);
        for v in tri {
            for c in v {
                out.extend_from_slice(&c.to_le_bytes());
            }
        }
        out.extend_from_slice(&[0u8; 2]);
    }
    out
}

fn write_cube_stl(path: &Path) {
    let tris: Vec<[[f32; 3]; 3]> = CUBE_FACES
        .iter()
        .map(|f| [CUBE_VERTICES[f[0]], CUBE_VERTICES[f[1]], CUBE_VERTICES[f[2]]])
        .collect();
    std::fs::write(path, stl_bytes(&tris, 12)).unwrap();
}

fn write_repeated_stl(path: &Path, count: usize) {
    let tri = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 1.0]];
    std::fs::write(path, stl_bytes(&vec![tri; count], count as u32)).unwrap();
}

fn cube_object(id: usize) -> String {
    let offset = id as f32 * 3.0;
    let vertices: String = CUBE_VERTICES
        .iter()
        .map(|[x, y, z]| format!("<vertex x=\"{}\" y=\"{y}\" z=\"{z}\"/>", x + offset))
        .collect();
    let triangles: String = CUBE_FACES
        .iter()
        .map(|[a, b, c]| format!("<triangle v1=\"{a}\" v2=\"{b}\" v3=\"{c}\"/>"))
        .collect();
    format!(
        "<object id=\"{id}\" type=\"model\"><mesh><vertices>{vertices}</vertices>\
         <triangles>{triangles}</triangles></mesh></object>\n"
    )
}

fn write_3mf(path: &Path, objects: usize) {
    let body: String = (1..=objects).map(cube_object).collect();
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <model unit=\"millimeter\" xmlns=\"http://schemas.microsoft.com/3dmanufacturing/core/2015/02\">\n\
         <resources>\n{body}</resources>\n<build><item objectid=\"1\"/></build>\n</model>\n"
    );

    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    zip.start_file("3D/3dmodel.model", options).unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap();
}

fn write_gcode(path: &Path, layers: usize) {
    let mut text = String::from(";FLAVOR:Marlin\n;TIME:3600\nG28\nG90\n");
    for layer in 0..layers {
        let z = 0.2 * (layer + 1) as f64;
        text.push_str(&format!(";LAYER:{layer}\nG1 Z{z:.2} F600\n"));
        for step in 0..10 {
            let x = 10.0 + step as f64 * 2.0;
            text.push_str(&format!("G1 X{x:.2} Y{:.2} E{:.4}\n", 10.0 + step as f64, 0.05 * step as f64));
        }
    }
    std::fs::write(path, text).unwrap();
}

fn small_batches() -> AnalysisConfig {
    AnalysisConfig::new(10, 100, 0.95).unwrap()
}

#[test]
fn test_unit_cube_stl_direct() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.stl");
    write_cube_stl(&path);

    let result = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&path), true)
        .unwrap();

    assert_eq!(result.metrics.polygon_count, 12);
    assert_relative_eq!(result.metrics.surface_area, 6.0, epsilon = 1e-9);
    assert_relative_eq!(result.metrics.volume, 1.0, epsilon = 1e-9);
    assert_relative_eq!(result.metrics.bounding_box_volume, 1.0, epsilon = 1e-9);
    assert!(!result.early_stopped);
    assert!(!result.is_estimated);
    assert_eq!(result.completion_percentage, 100.0);

    let perf = result.performance_metrics.unwrap();
    assert_eq!(perf.strategy, Strategy::Direct);
    assert_eq!(perf.processed_triangles, 12);
    assert_eq!(perf.stop_reason, Some(StopReason::Exhausted));
}

#[test]
fn test_performance_metrics_are_optional() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.stl");
    write_cube_stl(&path);

    let result = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&path), false)
        .unwrap();
    assert!(result.performance_metrics.is_none());
}

#[test]
fn test_early_stop_extrapolates_to_total() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dense.stl");
    write_repeated_stl(&path, 50_000);

    let config = AnalysisConfig::new(1_000, 5_000, 0.95).unwrap();
    let mut fractions = Vec::new();
    let result = ModelAnalyzer::new(config)
        .analyze_with_progress(&ModelRef::new(&path), true, &mut |p| fractions.push(p.fraction()))
        .unwrap();

    let perf = result.performance_metrics.as_ref().unwrap();
    assert_eq!(perf.strategy, Strategy::Batched);
    assert_eq!(perf.stop_reason, Some(StopReason::Stabilized));
    assert!(perf.processed_triangles < perf.total_triangles);
    assert_eq!(perf.total_triangles, 50_000);
    // The stabilization rule needs more than five batches
    assert_eq!(perf.processed_triangles, 6_000);

    assert!(result.early_stopped);
    assert_relative_eq!(result.completion_percentage, 12.0, epsilon = 1e-9);
    assert_eq!(result.metrics.polygon_count, 50_000);
    assert_relative_eq!(
        result.metrics.surface_area,
        REPEATED_AREA * 50_000.0,
        max_relative = 1e-6
    );

    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_disabled_early_stopping_reads_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dense.stl");
    write_repeated_stl(&path, 20_000);

    let config = AnalysisConfig::new(1_000, 5_000, 0.95)
        .unwrap()
        .with_early_stopping(false);
    let result = ModelAnalyzer::new(config)
        .analyze(&ModelRef::new(&path), true)
        .unwrap();

    assert!(!result.early_stopped);
    let perf = result.performance_metrics.unwrap();
    assert_eq!(perf.processed_triangles, 20_000);
    assert_eq!(perf.batches_processed, 20);
}

#[test]
fn test_time_budget_stops_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dense.stl");
    write_repeated_stl(&path, 20_000);

    let config = AnalysisConfig::new(1_000, 1_000_000, 0.95)
        .unwrap()
        .with_time_budget(Some(Duration::ZERO));
    let result = ModelAnalyzer::new(config)
        .analyze(&ModelRef::new(&path), true)
        .unwrap();

    let perf = result.performance_metrics.unwrap();
    assert_eq!(perf.stop_reason, Some(StopReason::TimeBudget));
    assert_eq!(perf.processed_triangles, 1_000);
    assert_eq!(result.metrics.polygon_count, 20_000);
}

#[test]
fn test_obj_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.obj");
    let mut text = String::new();
    for [x, y, z] in CUBE_VERTICES {
        text.push_str(&format!("v {x} {y} {z}\n"));
    }
    for [a, b, c] in CUBE_FACES {
        text.push_str(&format!("f {} {} {}\n", a + 1, b + 1, c + 1));
    }
    std::fs::write(&path, text).unwrap();

    let result = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&path), false)
        .unwrap();
    assert_eq!(result.metrics.polygon_count, 12);
    assert_relative_eq!(result.metrics.volume, 1.0, epsilon = 1e-9);
}

#[test]
fn test_3mf_sampling_is_scale_invariant() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plate.3mf");
    write_3mf(&path, 6);

    let result = ModelAnalyzer::new(small_batches())
        .analyze(&ModelRef::new(&path), true)
        .unwrap();

    assert!(result.is_sampled);
    let sampling = result.sampling_info.as_ref().unwrap();
    assert_eq!(sampling.sample_count, 3);
    assert_eq!(sampling.samples_analyzed, 3);
    assert_eq!(sampling.total_sampled_polygons, 72);
    assert_relative_eq!(sampling.scale_factor, 1.0);

    assert_eq!(result.metrics.polygon_count, 72);
    assert_relative_eq!(result.metrics.surface_area, 36.0, epsilon = 1e-6);
    assert_relative_eq!(result.metrics.volume, 6.0, epsilon = 1e-6);
    assert_eq!(
        result.performance_metrics.unwrap().strategy,
        Strategy::Sampled
    );
}

#[test]
fn test_3mf_direct_for_small_models() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cube.3mf");
    write_3mf(&path, 1);

    let result = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&path), false)
        .unwrap();
    assert!(!result.is_sampled);
    assert_eq!(result.metrics.polygon_count, 12);
    assert_relative_eq!(result.metrics.volume, 1.0, epsilon = 1e-6);
}

#[test]
fn test_gcode_sampling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("print.gcode");
    write_gcode(&path, 60);

    let result = ModelAnalyzer::new(small_batches().with_parallel_samples(false))
        .analyze(&ModelRef::new(&path), true)
        .unwrap();

    assert!(result.is_sampled);
    let sampling = result.sampling_info.unwrap();
    assert_eq!(sampling.sample_count, 3);
    assert_eq!(sampling.samples_analyzed, 3);
    assert!(result.metrics.polygon_count > 0);
    assert!(result.metrics.dimensions.width > 0.0);
}

#[test]
fn test_corrupt_model_falls_back_to_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.stl");
    // Declares far more triangles than it carries
    let tri = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    std::fs::write(&path, stl_bytes(&[tri; 3], 1_000)).unwrap();

    let metadata = ModelMetadata {
        polygon_count: Some(8_000),
        width: Some(30.0),
        height: Some(20.0),
        depth: Some(10.0),
        ..Default::default()
    };
    let result = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&path).with_metadata(metadata), true)
        .unwrap();

    assert!(result.is_estimated);
    assert!(result.estimation_reason.is_some());
    assert_eq!(result.metrics.polygon_count, 8_000);
    assert_relative_eq!(result.metrics.bounding_box_volume, 6_000.0);
    assert_relative_eq!(result.metrics.volume, 4_200.0, epsilon = 1e-9);
    assert_eq!(
        result.performance_metrics.unwrap().strategy,
        Strategy::Estimated
    );

    // Without metadata the failure propagates
    let err = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&path), false)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidModel(_)));
}

#[test]
fn test_unreadable_file_falls_back_to_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = ModelMetadata {
        polygon_count: Some(8_000),
        ..Default::default()
    };

    let missing = ModelRef::new(dir.path().join("gone.stl")).with_metadata(metadata.clone());
    let result = ModelAnalyzer::default().analyze(&missing, true).unwrap();
    assert!(result.is_estimated);
    assert_eq!(result.metrics.polygon_count, 8_000);
    let perf = result.performance_metrics.unwrap();
    assert_eq!(perf.strategy, Strategy::Estimated);
    assert!(perf.file_type.is_none());

    let empty = dir.path().join("empty.stl");
    std::fs::write(&empty, b"").unwrap();
    let result = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&empty).with_metadata(metadata.clone()), false)
        .unwrap();
    assert!(result.is_estimated);

    let blend = dir.path().join("scene.blend");
    std::fs::write(&blend, b"BLENDER").unwrap();
    let result = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&blend).with_metadata(metadata), false)
        .unwrap();
    assert!(result.is_estimated);
    assert!(result.estimation_reason.unwrap().contains("unsupported"));
}

#[test]
fn test_oversized_model_is_a_hard_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.stl");
    write_repeated_stl(&path, 100);

    let config = AnalysisConfig::default().with_max_file_size(1_000).unwrap();
    let metadata = ModelMetadata {
        polygon_count: Some(100),
        ..Default::default()
    };
    let err = ModelAnalyzer::new(config)
        .analyze(&ModelRef::new(&path).with_metadata(metadata), false)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::FileTooLarge { limit: 1_000, .. }));
    assert!(!err.is_recoverable());
}

#[test]
fn test_unsupported_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.blend");
    std::fs::write(&path, b"BLENDER").unwrap();

    let err = ModelAnalyzer::default()
        .analyze(&ModelRef::new(&path), false)
        .unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidModel(_)));
}
