// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model references and validation

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use meshquote_core::FileType;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// Declared facts about a model, as supplied alongside an upload.
///
/// Only consulted when the geometry itself cannot be read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMetadata {
    pub polygon_count: Option<u64>,
    pub file_size: Option<u64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub depth: Option<f64>,
    pub volume: Option<f64>,
    pub surface_area: Option<f64>,
    pub hollow_spaces: Option<f64>,
    pub overhangs: Option<f64>,
    pub thin_walls: Option<f64>,
}

impl ModelMetadata {
    /// True when nothing usable was declared
    pub fn is_empty(&self) -> bool {
        *self == ModelMetadata::default()
    }

    /// Declared dimensions when all three are positive
    pub fn dimensions(&self) -> Option<[f64; 3]> {
        match (self.width, self.height, self.depth) {
            (Some(w), Some(h), Some(d)) if w > 0.0 && h > 0.0 && d > 0.0 => Some([w, h, d]),
            _ => None,
        }
    }
}

/// A model to analyse
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRef {
    pub path: PathBuf,
    /// Explicit format; resolved from the extension when absent
    pub file_type: Option<FileType>,
    pub metadata: Option<ModelMetadata>,
}

impl ModelRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file_type: None,
            metadata: None,
        }
    }

    pub fn with_file_type(mut self, file_type: FileType) -> Self {
        self.file_type = Some(file_type);
        self
    }

    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }

    pub fn resolve_file_type(&self) -> Option<FileType> {
        self.file_type.or_else(|| FileType::from_path(&self.path))
    }
}

/// Snapshot of a validated model file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub file_type: FileType,
    pub file_size: u64,
    /// Size-based estimate, never exact
    pub estimated_triangles: u64,
    pub supports_streaming: bool,
}

impl ModelInfo {
    pub fn new(file_type: FileType, file_size: u64) -> Self {
        Self {
            file_type,
            file_size,
            estimated_triangles: file_type.estimate_triangles(file_size),
            supports_streaming: file_type.supports_streaming(),
        }
    }
}

/// Check existence, format, size and the size cap
pub fn validate_model(model: &ModelRef, max_file_size: u64) -> Result<ModelInfo> {
    let file_type = model.resolve_file_type().ok_or_else(|| {
        AnalysisError::InvalidModel(format!(
            "unsupported file type: {}",
            extension_of(&model.path)
        ))
    })?;

    let meta = std::fs::metadata(&model.path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AnalysisError::InvalidModel("model file not found".into()),
        _ => AnalysisError::IoFailure(e),
    })?;

    if !meta.is_file() {
        return Err(AnalysisError::InvalidModel("model path is not a file".into()));
    }
    let size = meta.len();
    if size == 0 {
        return Err(AnalysisError::InvalidModel("model file is empty".into()));
    }
    if size > max_file_size {
        return Err(AnalysisError::FileTooLarge {
            size,
            limit: max_file_size,
        });
    }

    Ok(ModelInfo::new(file_type, size))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "(none)".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.stl");
        std::fs::write(&path, vec![0u8; 84 + 50 * 20]).unwrap();

        let info = validate_model(&ModelRef::new(&path), 10_000).unwrap();
        assert_eq!(info.file_type, FileType::Stl);
        assert_eq!(info.estimated_triangles, 20);
        assert!(info.supports_streaming);
    }

    #[test]
    fn test_validate_rejections() {
        let dir = tempfile::tempdir().unwrap();

        let txt = dir.path().join("notes.txt");
        std::fs::write(&txt, "hi").unwrap();
        assert!(matches!(
            validate_model(&ModelRef::new(&txt), 1000),
            Err(AnalysisError::InvalidModel(_))
        ));

        let empty = dir.path().join("empty.obj");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(
            validate_model(&ModelRef::new(&empty), 1000),
            Err(AnalysisError::InvalidModel(_))
        ));

        let big = dir.path().join("big.gcode");
        std::fs::write(&big, vec![b';'; 2000]).unwrap();
        assert!(matches!(
            validate_model(&ModelRef::new(&big), 1000),
            Err(AnalysisError::FileTooLarge {
                size: 2000,
                limit: 1000
            })
        ));

        let missing = dir.path().join("missing.stl");
        assert!(matches!(
            validate_model(&ModelRef::new(&missing), 1000),
            Err(AnalysisError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_empty_metadata_is_dropped() {
        let model = ModelRef::new("a.stl").with_metadata(ModelMetadata::default());
        assert!(model.metadata.is_none());

        let meta = ModelMetadata {
            polygon_count: Some(10),
            ..Default::default()
        };
        let model = ModelRef::new("a.stl").with_metadata(meta);
        assert!(model.metadata.is_some());
    }
}
