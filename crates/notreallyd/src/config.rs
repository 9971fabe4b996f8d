use std::path::PathBuf;

use notreally_core::video::DEFAULT_FRAME_STRIDE;
use notreally_core::threshold::DEFAULT_EAR_THRESHOLD;
use notreally_core::{AnalyzerParams, Tools};

/// Default upload body limit (100 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the HTTP API (default: 0.0.0.0:5000).
    pub bind_addr: String,
    /// Directory uploaded media is written to.
    pub upload_dir: PathBuf,
    /// Path to the SQLite job database.
    pub db_path: PathBuf,
    /// Classifier artifact (`.json` forest or `.onnx`).
    pub model_path: PathBuf,
    /// Expected SHA-256 of the classifier artifact, checked before loading.
    pub model_sha256: Option<String>,
    /// Analyze every k-th video frame.
    pub frame_stride: u32,
    /// Static EAR blink threshold.
    pub blink_threshold: f64,
    /// Maximum accepted request body.
    pub max_upload_bytes: usize,
    pub ffmpeg: String,
    pub ffprobe: String,
    /// SCRFD face detector run ahead of the mesh.
    pub face_detector_model: PathBuf,
    /// Face Mesh ONNX model used for landmark detection.
    pub face_mesh_model: PathBuf,
}

impl Config {
    /// Load configuration from `NOTREALLY_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("notreally");

        let model_path = var("NOTREALLY_MODEL_PATH")
            .or_else(|| var("MODEL_PATH"))
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(notreally_models::DEFAULT_MODEL_FILE));

        Self {
            bind_addr: var("NOTREALLY_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            upload_dir: var("NOTREALLY_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploads")),
            db_path: var("NOTREALLY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("notreally.db")),
            model_path,
            model_sha256: var("NOTREALLY_MODEL_SHA256").filter(|s| !s.trim().is_empty()),
            frame_stride: parse_or(var("NOTREALLY_FRAME_STRIDE"), DEFAULT_FRAME_STRIDE).max(1),
            blink_threshold: parse_or(var("NOTREALLY_BLINK_THRESHOLD"), DEFAULT_EAR_THRESHOLD),
            max_upload_bytes: parse_or(var("NOTREALLY_MAX_UPLOAD_BYTES"), DEFAULT_MAX_UPLOAD_BYTES),
            ffmpeg: var("NOTREALLY_FFMPEG").unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe: var("NOTREALLY_FFPROBE").unwrap_or_else(|| "ffprobe".to_string()),
            face_detector_model: var("NOTREALLY_FACE_DETECTOR_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("scrfd.onnx")),
            face_mesh_model: var("NOTREALLY_FACE_MESH_MODEL")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("face_mesh.onnx")),
        }
    }

    pub fn analyzer_params(&self) -> AnalyzerParams {
        AnalyzerParams {
            frame_stride: self.frame_stride,
            ear_threshold: self.blink_threshold,
        }
    }

    pub fn tools(&self) -> Tools {
        Tools {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
        }
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
