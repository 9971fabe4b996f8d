//! Classifier contract.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vector::FeatureVector;

/// Class probabilities for one feature vector. Index 0 is real, 1 is fake.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub prob_real: f64,
    pub prob_fake: f64,
}

impl ClassificationResult {
    /// Build from a two-class probability row.
    pub fn from_probabilities(probs: &[f64]) -> Result<Self, ClassifierError> {
        match probs {
            [real, fake] => Ok(Self {
                prob_real: *real,
                prob_fake: *fake,
            }),
            other => Err(ClassifierError::Shape(format!(
                "expected 2 class probabilities, got {}",
                other.len()
            ))),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("feature vector has {got} features, model expects {expected}")]
    FeatureCount { expected: usize, got: usize },
    #[error("unexpected model output: {0}")]
    Shape(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// A pretrained binary real/fake classifier.
pub trait Classifier: Send + Sync {
    fn predict(&self, vector: &FeatureVector) -> Result<ClassificationResult, ClassifierError>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn predict(&self, vector: &FeatureVector) -> Result<ClassificationResult, ClassifierError> {
        (**self).predict(vector)
    }
}

impl<C: Classifier + ?Sized> Classifier for std::sync::Arc<C> {
    fn predict(&self, vector: &FeatureVector) -> Result<ClassificationResult, ClassifierError> {
        (**self).predict(vector)
    }
}
