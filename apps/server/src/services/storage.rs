// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model file resolution with a directory allow-list.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use meshquote_analysis::{FileType, ModelMetadata, ModelRef};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors resolving a model file
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid model source: {0}")]
    InvalidSource(String),

    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Access denied: model is outside the allowed directories")]
    AccessDenied,

    #[error("Unsupported model format: {0}")]
    UnsupportedFormat(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a task's model lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// Approved model stored as `<approved_dir>/<id>.<ext>`
    ModelId(String),
    /// Explicit path that must fall inside an allowed directory
    FilePath(PathBuf),
}

impl ModelSource {
    /// Build a source from task fields; exactly one must be set
    pub fn from_parts(model_id: Option<&str>, file_path: Option<&str>) -> Result<Self, StorageError> {
        let model_id = model_id.map(str::trim).filter(|s| !s.is_empty());
        let file_path = file_path.map(str::trim).filter(|s| !s.is_empty());
        match (model_id, file_path) {
            (Some(id), None) => Ok(ModelSource::ModelId(id.to_string())),
            (None, Some(path)) => Ok(ModelSource::FilePath(PathBuf::from(path))),
            (Some(_), Some(_)) => Err(StorageError::InvalidSource(
                "give either model_id or file_path, not both".into(),
            )),
            (None, None) => Err(StorageError::InvalidSource(
                "model_id or file_path is required".into(),
            )),
        }
    }
}

/// A model file that passed every access check
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    /// Canonical path
    pub path: PathBuf,
    pub file_type: FileType,
    pub size: u64,
    /// Hex SHA-256 of the file contents
    pub sha256: String,
    /// Declared facts from a `.json` sidecar, if present
    pub metadata: Option<ModelMetadata>,
}

impl ResolvedModel {
    /// Reference handed to the analyzer
    pub fn model_ref(&self) -> ModelRef {
        let model = ModelRef::new(&self.path).with_file_type(self.file_type);
        match &self.metadata {
            Some(metadata) => model.with_metadata(metadata.clone()),
            None => model,
        }
    }
}

/// Read-only access to model files
pub trait ModelStorage: Send + Sync {
    fn resolve(&self, source: &ModelSource) -> Result<ResolvedModel, StorageError>;

    /// Declared facts for `source`, available even when its file is not
    fn metadata(&self, _source: &ModelSource) -> Option<ModelMetadata> {
        None
    }
}

/// Models on the local filesystem.
///
/// Paths are canonicalized before the allow-list check, so `..` segments
/// and symlinks cannot escape the allowed directories.
#[derive(Debug, Clone)]
pub struct LocalModelStorage {
    allowed_dirs: Vec<PathBuf>,
    approved_dir: PathBuf,
}

impl LocalModelStorage {
    /// Directories that do not exist are skipped with a warning
    pub fn new(
        allowed_dirs: impl IntoIterator<Item = PathBuf>,
        approved_dir: impl Into<PathBuf>,
    ) -> Self {
        let approved_dir = approved_dir.into();
        let mut canonical = Vec::new();

        for dir in allowed_dirs.into_iter().chain(std::iter::once(approved_dir.clone())) {
            match dir.canonicalize() {
                Ok(path) if !canonical.contains(&path) => canonical.push(path),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "Skipping model directory");
                }
            }
        }

        let approved_dir = approved_dir.canonicalize().unwrap_or(approved_dir);
        Self {
            allowed_dirs: canonical,
            approved_dir,
        }
    }

    pub fn allowed_dirs(&self) -> &[PathBuf] {
        &self.allowed_dirs
    }

    fn locate_model_id(&self, id: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_model_id(id) {
            return Err(StorageError::InvalidSource(format!("invalid model id '{id}'")));
        }

        FileType::ALL
            .iter()
            .map(|ft| self.approved_dir.join(format!("{id}.{}", ft.extension())))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| StorageError::NotFound(format!("model {id}")))
    }

    fn check_allowed(&self, path: &Path) -> Result<PathBuf, StorageError> {
        let canonical = path.canonicalize().map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound("model file does not exist".into()),
            _ => StorageError::Io(e),
        })?;

        if !self.allowed_dirs.iter().any(|dir| canonical.starts_with(dir)) {
            tracing::warn!(path = %path.display(), "Rejected model outside allowed directories");
            return Err(StorageError::AccessDenied);
        }
        Ok(canonical)
    }
}

impl ModelStorage for LocalModelStorage {
    fn resolve(&self, source: &ModelSource) -> Result<ResolvedModel, StorageError> {
        let requested = match source {
            ModelSource::ModelId(id) => self.locate_model_id(id)?,
            ModelSource::FilePath(path) => path.clone(),
        };
        let path = self.check_allowed(&requested)?;

        let meta = std::fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(StorageError::NotFound("model path is not a file".into()));
        }
        let file_type = FileType::from_path(&path).ok_or_else(|| {
            StorageError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("none")
                    .to_string(),
            )
        })?;

        Ok(ResolvedModel {
            sha256: hash_file(&path)?,
            metadata: read_sidecar(&path),
            path,
            file_type,
            size: meta.len(),
        })
    }

    fn metadata(&self, source: &ModelSource) -> Option<ModelMetadata> {
        match source {
            ModelSource::ModelId(id) if is_valid_model_id(id) => {
                read_sidecar(&self.approved_dir.join(id))
            }
            ModelSource::ModelId(_) => None,
            ModelSource::FilePath(path) => {
                let sidecar = self.check_allowed(&path.with_extension("json")).ok()?;
                read_sidecar(&sidecar)
            }
        }
    }
}

fn is_valid_model_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Hex SHA-256 of a file, read in chunks
pub fn hash_file(path: &Path) -> Result<String, StorageError> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `<stem>.json` next to the model. Unreadable sidecars are ignored.
fn read_sidecar(path: &Path) -> Option<ModelMetadata> {
    let sidecar = path.with_extension("json");
    let data = std::fs::read(&sidecar).ok()?;
    match serde_json::from_slice::<ModelMetadata>(&data) {
        Ok(metadata) if !metadata.is_empty() => Some(metadata),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(sidecar = %sidecar.display(), error = %e, "Ignoring invalid metadata sidecar");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(root: &Path) -> LocalModelStorage {
        let uploads = root.join("uploads");
        let approved = root.join("approved");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::create_dir_all(&approved).unwrap();
        LocalModelStorage::new(vec![uploads], approved)
    }

    #[test]
    fn test_source_requires_exactly_one() {
        assert!(matches!(
            ModelSource::from_parts(None, None),
            Err(StorageError::InvalidSource(_))
        ));
        assert!(matches!(
            ModelSource::from_parts(Some("a"), Some("/b.stl")),
            Err(StorageError::InvalidSource(_))
        ));
        assert_eq!(
            ModelSource::from_parts(Some(" m1 "), Some("")).unwrap(),
            ModelSource::ModelId("m1".into())
        );
    }

    #[test]
    fn test_resolves_file_inside_allowed_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let file = dir.path().join("uploads/part.stl");
        std::fs::write(&file, b"abc").unwrap();

        let resolved = storage
            .resolve(&ModelSource::FilePath(file.clone()))
            .unwrap();
        assert_eq!(resolved.file_type, FileType::Stl);
        assert_eq!(resolved.size, 3);
        assert_eq!(
            resolved.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert!(resolved.metadata.is_none());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        std::fs::write(dir.path().join("secret.stl"), b"solid").unwrap();

        let sneaky = dir.path().join("uploads/../secret.stl");
        assert!(matches!(
            storage.resolve(&ModelSource::FilePath(sneaky)),
            Err(StorageError::AccessDenied)
        ));
    }

    #[test]
    fn test_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let file = dir.path().join("uploads/notes.txt");
        std::fs::write(&file, b"hello").unwrap();

        assert!(matches!(
            storage.resolve(&ModelSource::FilePath(file)),
            Err(StorageError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        let file = dir.path().join("uploads/ghost.stl");
        assert!(matches!(
            storage.resolve(&ModelSource::FilePath(file)),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_model_id_with_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        std::fs::write(dir.path().join("approved/bracket-7.obj"), b"v 0 0 0\n").unwrap();
        std::fs::write(
            dir.path().join("approved/bracket-7.json"),
            br#"{"polygon_count": 1200, "width": 10.0, "height": 5.0, "depth": 2.0}"#,
        )
        .unwrap();

        let resolved = storage
            .resolve(&ModelSource::ModelId("bracket-7".into()))
            .unwrap();
        assert_eq!(resolved.file_type, FileType::Obj);
        let metadata = resolved.metadata.unwrap();
        assert_eq!(metadata.polygon_count, Some(1200));
        assert_eq!(metadata.dimensions(), Some([10.0, 5.0, 2.0]));
    }

    #[test]
    fn test_metadata_outlives_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        std::fs::write(
            dir.path().join("approved/gone.json"),
            br#"{"polygon_count": 900}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("uploads/lost.json"), br#"{"polygon_count": 40}"#).unwrap();

        let by_id = ModelSource::ModelId("gone".into());
        assert!(matches!(storage.resolve(&by_id), Err(StorageError::NotFound(_))));
        assert_eq!(storage.metadata(&by_id).unwrap().polygon_count, Some(900));

        let by_path = ModelSource::FilePath(dir.path().join("uploads/lost.stl"));
        assert_eq!(storage.metadata(&by_path).unwrap().polygon_count, Some(40));

        std::fs::write(dir.path().join("outside.json"), br#"{"polygon_count": 1}"#).unwrap();
        let outside = ModelSource::FilePath(dir.path().join("outside.stl"));
        assert!(storage.metadata(&outside).is_none());
        assert!(storage.metadata(&ModelSource::ModelId("../gone".into())).is_none());
    }

    #[test]
    fn test_model_id_rejects_traversal_characters() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(dir.path());
        assert!(matches!(
            storage.resolve(&ModelSource::ModelId("../uploads/part".into())),
            Err(StorageError::InvalidSource(_))
        ));
        assert!(matches!(
            storage.resolve(&ModelSource::ModelId("unknown".into())),
            Err(StorageError::NotFound(_))
        ));
    }
}
