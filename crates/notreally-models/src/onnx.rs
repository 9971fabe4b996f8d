//! Scikit-learn classifiers exported to ONNX (`zipmap=False`).

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array2;
use ort::session::Session;
use ort::value::Tensor;

use notreally_core::vector::FEATURE_COUNT;
use notreally_core::{ClassificationResult, Classifier, ClassifierError, FeatureVector};

use crate::ModelError;

pub struct OnnxClassifier {
    session: Mutex<Session>,
}

impl OnnxClassifier {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let session = Session::builder()
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| ModelError::Invalid(format!("{}: {e}", path.display())))?;
        tracing::info!(path = %path.display(), "onnx classifier loaded");
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, vector: &FeatureVector) -> Result<ClassificationResult, ClassifierError> {
        let row: Vec<f32> = vector.as_slice().iter().map(|&v| v as f32).collect();
        let input = Array2::from_shape_vec((1, FEATURE_COUNT), row)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        let tensor = Tensor::from_array(input).map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::Inference("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        // Outputs are (label, probabilities); the probabilities are the last one.
        let count = outputs.len();
        if count == 0 {
            return Err(ClassifierError::Shape("model produced no outputs".into()));
        }
        let (_, probs) = outputs[count - 1]
            .try_extract_tensor::<f32>()
            .map_err(|e| ClassifierError::Shape(e.to_string()))?;
        let probs: Vec<f64> = probs.iter().map(|&p| p as f64).collect();
        ClassificationResult::from_probabilities(&probs)
    }
}
