//! Classifier artifacts: loading, format dispatch, integrity checks.

pub mod forest;
pub mod integrity;
pub mod onnx;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use notreally_core::Classifier;

pub use forest::RandomForest;
pub use integrity::{sha256_file_hex, verify_file_sha256, IntegrityError};

/// Default artifact file name inside the data directory.
pub const DEFAULT_MODEL_FILE: &str = "model.json";

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    MissingArtifact(PathBuf),

    #[error("failed to read model file: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("malformed model file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid model: {0}")]
    Invalid(String),

    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),
}

/// Load the classifier at `path`, verifying its SHA-256 first when an
/// expected digest is given.
///
/// The format is picked from the extension: `.json` is a random forest,
/// `.onnx` is an sklearn-onnx export.
pub fn load_classifier(
    path: &Path,
    expected_sha256: Option<&str>,
) -> Result<Arc<dyn Classifier>, ModelError> {
    if !path.is_file() {
        return Err(ModelError::MissingArtifact(path.to_path_buf()));
    }
    if let Some(expected) = expected_sha256 {
        verify_file_sha256(path, expected)?;
        tracing::debug!(path = %path.display(), "model checksum verified");
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "json" => Ok(Arc::new(RandomForest::load(path)?)),
        "onnx" => Ok(Arc::new(onnx::OnnxClassifier::load(path)?)),
        other => Err(ModelError::UnsupportedFormat(if other.is_empty() {
            path.display().to_string()
        } else {
            format!(".{other}")
        })),
    }
}
