//! End-to-end analysis of one media file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::capability::Extractors;
use crate::classifier::{ClassificationResult, Classifier, ClassifierError};
use crate::vector::{ExtractedFeatures, FeatureVector};
use crate::verdict::{LegacyFeatures, Verdict};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("media file not found: {0}")]
    MediaNotFound(PathBuf),
    #[error("classification failed: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Everything produced for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub features: ExtractedFeatures,
    pub vector: FeatureVector,
    pub classification: ClassificationResult,
    pub verdict: Verdict,
}

/// Extract, vectorize, classify, score.
#[derive(Clone)]
pub struct Pipeline {
    extractors: Extractors,
    classifier: Arc<dyn Classifier>,
}

impl Pipeline {
    pub fn new(extractors: Extractors, classifier: Arc<dyn Classifier>) -> Self {
        Self {
            extractors,
            classifier,
        }
    }

    pub fn extractors(&self) -> &Extractors {
        &self.extractors
    }

    pub fn analyze(&self, media: &Path) -> Result<Analysis, PipelineError> {
        if !media.is_file() {
            return Err(PipelineError::MediaNotFound(media.to_path_buf()));
        }
        let started = std::time::Instant::now();
        let features = self.extractors.extract(media);
        let analysis = self.score(features)?;
        tracing::info!(
            path = %media.display(),
            score = analysis.verdict.authenticity_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis complete"
        );
        Ok(analysis)
    }

    /// Score already-extracted features.
    pub fn score(&self, features: ExtractedFeatures) -> Result<Analysis, PipelineError> {
        let vector = features.to_feature_vector();
        let classification = self.classifier.predict(&vector)?;
        let verdict = Verdict::new(classification, LegacyFeatures::from_extracted(&features));
        Ok(Analysis {
            features,
            vector,
            classification,
            verdict,
        })
    }
}
