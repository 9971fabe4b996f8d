//! Random forest classifier exported from the training step as JSON.
//!
//! Layout: `{n_features, classes, trees: [{nodes: [{feature, threshold, left,
//! right, value}]}]}`. Node 0 is the root; leaves have `feature = -1`.
//! Samples go left when `x[feature] <= threshold`, comparing in single
//! precision like the trainer does. Leaf `value` holds per-class weights,
//! normalized per tree and averaged across trees.

use std::path::Path;

use serde::Deserialize;

use notreally_core::vector::FEATURE_COUNT;
use notreally_core::{ClassificationResult, Classifier, ClassifierError, FeatureVector};

use crate::ModelError;

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub feature: i64,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default = "no_child")]
    pub left: i64,
    #[serde(default = "no_child")]
    pub right: i64,
    #[serde(default)]
    pub value: Vec<f64>,
}

fn no_child() -> i64 {
    -1
}

impl Node {
    fn is_leaf(&self) -> bool {
        self.feature < 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Normalized class distribution of the leaf `x` lands in.
    fn leaf_distribution(&self, x: &[f64]) -> Vec<f64> {
        let mut i = 0;
        // Children always follow their parent, so the walk terminates.
        let leaf = loop {
            let node = &self.nodes[i];
            if node.is_leaf() {
                break node;
            }
            let v = x[node.feature as usize] as f32 as f64;
            let next = if v <= node.threshold { node.left } else { node.right };
            i = next as usize;
        };

        let total: f64 = leaf.value.iter().sum();
        if total > 0.0 {
            leaf.value.iter().map(|w| w / total).collect()
        } else {
            vec![1.0 / leaf.value.len() as f64; leaf.value.len()]
        }
    }

    fn validate(&self, index: usize, n_features: usize, n_classes: usize) -> Result<(), ModelError> {
        let invalid = |msg: String| ModelError::Invalid(format!("tree {index}: {msg}"));
        if self.nodes.is_empty() {
            return Err(invalid("no nodes".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.is_leaf() {
                if node.value.len() != n_classes {
                    return Err(invalid(format!(
                        "leaf {i} has {} class weights, expected {n_classes}",
                        node.value.len()
                    )));
                }
                continue;
            }
            if node.feature as usize >= n_features {
                return Err(invalid(format!("node {i} splits on feature {}", node.feature)));
            }
            for child in [node.left, node.right] {
                if child <= i as i64 || child as usize >= self.nodes.len() {
                    return Err(invalid(format!("node {i} has bad child {child}")));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomForest {
    pub n_features: usize,
    pub classes: Vec<i64>,
    pub trees: Vec<Tree>,
}

impl RandomForest {
    pub fn from_json(bytes: &[u8]) -> Result<Self, ModelError> {
        let forest: RandomForest = serde_json::from_slice(bytes)?;
        forest.validate()?;
        Ok(forest)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = std::fs::read(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let forest = Self::from_json(&bytes)?;
        tracing::info!(
            path = %path.display(),
            trees = forest.trees.len(),
            "random forest loaded"
        );
        Ok(forest)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.n_features != FEATURE_COUNT {
            return Err(ModelError::Invalid(format!(
                "model expects {} features, pipeline produces {FEATURE_COUNT}",
                self.n_features
            )));
        }
        if self.classes != [0, 1] {
            return Err(ModelError::Invalid(format!(
                "expected classes [0, 1] (real, fake), got {:?}",
                self.classes
            )));
        }
        if self.trees.is_empty() {
            return Err(ModelError::Invalid("forest has no trees".into()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i, self.n_features, self.classes.len())?;
        }
        Ok(())
    }

    /// Mean class distribution over all trees.
    pub fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ClassifierError> {
        if x.len() != self.n_features {
            return Err(ClassifierError::FeatureCount {
                expected: self.n_features,
                got: x.len(),
            });
        }
        let mut probs = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (acc, p) in probs.iter_mut().zip(tree.leaf_distribution(x)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;
        probs.iter_mut().for_each(|p| *p /= n);
        Ok(probs)
    }
}

impl Classifier for RandomForest {
    fn predict(&self, vector: &FeatureVector) -> Result<ClassificationResult, ClassifierError> {
        let probs = self.predict_proba(vector.as_slice())?;
        ClassificationResult::from_probabilities(&probs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Two stumps: blink rate <= 9.5 votes fake, jitter <= 0.2 votes real.
    fn forest_json() -> serde_json::Value {
        json!({
            "n_features": 10,
            "classes": [0, 1],
            "trees": [
                {"nodes": [
                    {"feature": 0, "threshold": 9.5, "left": 1, "right": 2, "value": [10.0, 10.0]},
                    {"feature": -1, "value": [1.0, 9.0]},
                    {"feature": -1, "value": [8.0, 2.0]}
                ]},
                {"nodes": [
                    {"feature": 1, "threshold": 0.2, "left": 1, "right": 2, "value": [10.0, 10.0]},
                    {"feature": -1, "value": [6.0, 0.0]},
                    {"feature": -1, "value": [0.0, 4.0]}
                ]}
            ]
        })
    }

    fn forest() -> RandomForest {
        RandomForest::from_json(forest_json().to_string().as_bytes()).unwrap()
    }

    fn vector(blink: f64, jitter: f64) -> FeatureVector {
        FeatureVector::from_values([blink, jitter, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
    }

    #[test]
    fn averages_normalized_leaves() {
        let r = forest().predict(&vector(15.0, 0.05)).unwrap();
        // (0.8 + 1.0) / 2, (0.2 + 0.0) / 2
        assert!((r.prob_real - 0.9).abs() < 1e-12);
        assert!((r.prob_fake - 0.1).abs() < 1e-12);
    }

    #[test]
    fn threshold_is_inclusive_on_the_left() {
        let r = forest().predict(&vector(9.5, 0.5)).unwrap();
        // (0.1 + 0.0) / 2, (0.9 + 1.0) / 2
        assert!((r.prob_real - 0.05).abs() < 1e-12);
        assert!((r.prob_fake - 0.95).abs() < 1e-12);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let f = forest();
        for (b, j) in [(0.0, 0.0), (30.0, 1.0), (9.0, 0.21)] {
            let r = f.predict(&vector(b, j)).unwrap();
            assert!((r.prob_real + r.prob_fake - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let mut model = forest_json();
        model["n_features"] = json!(9);
        let err = RandomForest::from_json(model.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));
    }

    #[test]
    fn rejects_backward_child() {
        let mut model = forest_json();
        model["trees"][0]["nodes"][0]["right"] = json!(0);
        assert!(RandomForest::from_json(model.to_string().as_bytes()).is_err());
    }

    #[test]
    fn rejects_out_of_range_split_feature() {
        let mut model = forest_json();
        model["trees"][1]["nodes"][0]["feature"] = json!(10);
        assert!(RandomForest::from_json(model.to_string().as_bytes()).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            RandomForest::from_json(b"not json"),
            Err(ModelError::Parse(_))
        ));
    }
}
