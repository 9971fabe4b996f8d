//! `notreally`: feature extraction and one-shot scoring from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use notreally_core::landmarks::face_mesh::FaceMeshFactory;
use notreally_core::threshold::DEFAULT_EAR_THRESHOLD;
use notreally_core::video::DEFAULT_FRAME_STRIDE;
use notreally_core::{
    AnalyzerParams, ExtractedFeatures, Extractors, FeatureVector, LandmarkSourceFactory, Pipeline,
    Tools, Verdict,
};

#[derive(Parser)]
#[command(name = "notreally", version, about = "Deepfake video feature extraction and scoring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract features from a media file and print them as JSON
    Features {
        #[command(flatten)]
        extract: ExtractArgs,
        /// Print only the 10-element classifier input vector
        #[arg(long)]
        vector_only: bool,
    },
    /// Extract features and score a media file with a trained classifier
    Predict {
        #[command(flatten)]
        extract: ExtractArgs,
        /// Classifier artifact (default: $NOTREALLY_MODEL_PATH, $MODEL_PATH, or the data dir)
        #[arg(long)]
        model: Option<PathBuf>,
        /// Expected SHA-256 of the classifier artifact
        #[arg(long)]
        model_sha256: Option<String>,
    },
    /// Print the SHA-256 of a model artifact
    Checksum { path: PathBuf },
}

#[derive(Args)]
struct ExtractArgs {
    /// Media file to analyze
    path: PathBuf,
    /// Analyze every N-th video frame
    #[arg(long, default_value_t = DEFAULT_FRAME_STRIDE)]
    frame_stride: u32,
    /// Static EAR blink threshold
    #[arg(long, default_value_t = DEFAULT_EAR_THRESHOLD)]
    blink_threshold: f64,
    /// SCRFD face detector ONNX model
    #[arg(long)]
    face_detector: Option<PathBuf>,
    /// Face Mesh ONNX model for landmark detection
    #[arg(long)]
    face_mesh: Option<PathBuf>,
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: String,
    #[arg(long, default_value = "ffprobe")]
    ffprobe: String,
}

impl ExtractArgs {
    fn params(&self) -> AnalyzerParams {
        AnalyzerParams {
            frame_stride: self.frame_stride,
            ear_threshold: self.blink_threshold,
        }
    }

    fn extractors(&self) -> Extractors {
        let tools = Tools {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
        };
        Extractors::standard(&tools, self.params(), self.landmark_source())
    }

    fn landmark_source(&self) -> Option<Arc<dyn LandmarkSourceFactory>> {
        let detector = self
            .face_detector
            .clone()
            .or_else(|| env_path("NOTREALLY_FACE_DETECTOR_MODEL"))
            .unwrap_or_else(|| data_dir().join("scrfd.onnx"));
        let mesh = self
            .face_mesh
            .clone()
            .or_else(|| env_path("NOTREALLY_FACE_MESH_MODEL"))
            .unwrap_or_else(|| data_dir().join("face_mesh.onnx"));
        match FaceMeshFactory::locate(detector, mesh) {
            Ok(factory) => Some(Arc::new(factory)),
            Err(e) => {
                tracing::warn!(error = %e, "no landmark detector; video features will be absent");
                None
            }
        }
    }

    fn media(&self) -> Result<&Path> {
        if !self.path.is_file() {
            bail!("file not found: {}", self.path.display());
        }
        Ok(&self.path)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key).map(PathBuf::from)
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("notreally")
}

fn default_model_path() -> PathBuf {
    std::env::var("NOTREALLY_MODEL_PATH")
        .or_else(|_| std::env::var("MODEL_PATH"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir().join(notreally_models::DEFAULT_MODEL_FILE))
}

#[derive(Serialize)]
struct PredictOutput<'a> {
    authenticity_score: f64,
    confidence: f64,
    probabilities: notreally_core::verdict::Probabilities,
    summary: &'a str,
    features: &'a ExtractedFeatures,
    vector: FeatureVector,
}

impl<'a> PredictOutput<'a> {
    fn new(verdict: &'a Verdict, features: &'a ExtractedFeatures, vector: FeatureVector) -> Self {
        Self {
            authenticity_score: verdict.authenticity_score,
            confidence: verdict.confidence,
            probabilities: verdict.probabilities,
            summary: &verdict.summary,
            features,
            vector,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Features {
            extract,
            vector_only,
        } => {
            let media = extract.media()?;
            let features = extract.extractors().extract(media);
            if vector_only {
                println!("{}", serde_json::to_string(&features.to_feature_vector())?);
            } else {
                println!("{}", serde_json::to_string_pretty(&features)?);
            }
        }
        Command::Predict {
            extract,
            model,
            model_sha256,
        } => {
            let media = extract.media()?;
            let model_path = model.unwrap_or_else(default_model_path);
            let classifier = notreally_models::load_classifier(&model_path, model_sha256.as_deref())
                .with_context(|| format!("failed to load classifier {}", model_path.display()))?;

            let pipeline = Pipeline::new(extract.extractors(), classifier);
            let analysis = pipeline
                .analyze(media)
                .with_context(|| format!("analysis of {} failed", media.display()))?;

            let out = PredictOutput::new(&analysis.verdict, &analysis.features, analysis.vector);
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Checksum { path } => {
            let digest = notreally_models::sha256_file_hex(&path)
                .with_context(|| format!("failed to hash {}", path.display()))?;
            println!("{digest}  {}", path.display());
        }
    }

    Ok(())
}
