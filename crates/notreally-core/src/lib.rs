//! NotReal.ly core: feature extraction and authenticity scoring for video files.
//!
//! A media file flows through three independent extraction branches (video
//! blink/jitter analysis, audio MFCC summary, container metadata), which are
//! assembled into a fixed 10-slot [`FeatureVector`], classified, and turned
//! into a [`Verdict`].

pub mod audio;
pub mod blink;
pub mod capability;
pub mod classifier;
pub mod jitter;
pub mod job;
pub mod landmarks;
pub mod pipeline;
pub mod probe;
pub mod threshold;
pub mod vector;
pub mod verdict;
pub mod video;

pub use audio::{AudioFeatureSummary, AudioSummarizer};
pub use capability::{Extractor, Extractors, Tools};
pub use classifier::{ClassificationResult, Classifier, ClassifierError};
pub use job::{AnalysisJob, JobError, JobResults, JobStatus, JobStore};
pub use landmarks::{LandmarkError, LandmarkSet, LandmarkSource, LandmarkSourceFactory, Point};
pub use pipeline::{Analysis, Pipeline, PipelineError};
pub use probe::{ContainerMetadata, ContainerProbe};
pub use threshold::{MadThreshold, StaticThreshold, ThresholdEstimator};
pub use vector::{ExtractedFeatures, FeatureVector, FEATURE_COUNT};
pub use verdict::{LegacyFeatures, Verdict};
pub use video::{AnalyzerParams, BlinkJitterAnalyzer, VideoFeatureSummary};
