//! Gradient-boosted tree ensembles read from XGBoost's JSON model format.
//!
//! Only what the dropout classifiers use is supported: a `gbtree` booster with
//! numerical splits and a logistic objective. Anything else is refused at
//! load time rather than evaluated wrongly.

use std::path::Path;

use serde::Deserialize;

use crate::error::ArtifactError;

/// Anything that turns an ordered feature row into a label and a positive-class probability.
pub trait Classifier: Send + Sync {
    fn predict(&self, row: &[f64]) -> (u8, f64);

    /// Width of the row the classifier was trained on, when the artifact records it.
    fn num_features(&self) -> Option<usize> {
        None
    }

    /// Feature names recorded in the artifact, when present.
    fn feature_names(&self) -> Option<&[String]> {
        None
    }
}

const LEAF: i32 = -1;
const DECISION_BOUNDARY: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
struct Tree {
    left: Vec<i32>,
    right: Vec<i32>,
    split_index: Vec<u32>,
    split_condition: Vec<f32>,
    default_left: Vec<bool>,
}

impl Tree {
    fn leaf_value(&self, row: &[f32]) -> f32 {
        let mut node = 0usize;
        loop {
            let left = self.left[node];
            if left == LEAF {
                return self.split_condition[node];
            }
            let value = row
                .get(self.split_index[node] as usize)
                .copied()
                .unwrap_or(f32::NAN);
            let go_left = if value.is_nan() {
                self.default_left[node]
            } else {
                value < self.split_condition[node]
            };
            let next = if go_left { left } else { self.right[node] };
            node = next as usize;
        }
    }

    fn validate(&self, id: usize) -> Result<(), ArtifactError> {
        let nodes = self.left.len();
        if nodes == 0 {
            return Err(ArtifactError::Malformed(format!("tree {id} has no nodes")));
        }
        if [
            self.right.len(),
            self.split_index.len(),
            self.split_condition.len(),
            self.default_left.len(),
        ]
        .iter()
        .any(|len| *len != nodes)
        {
            return Err(ArtifactError::Malformed(format!(
                "tree {id} has node arrays of different lengths"
            )));
        }
        for node in 0..nodes {
            let (left, right) = (self.left[node], self.right[node]);
            if left == LEAF {
                continue;
            }
            // Children always come after their parent, which also rules out cycles.
            let in_range = |child: i32| child > node as i32 && (child as usize) < nodes;
            if !in_range(left) || !in_range(right) {
                return Err(ArtifactError::Malformed(format!(
                    "tree {id} node {node} points outside the tree"
                )));
            }
        }
        Ok(())
    }
}

/// A binary logistic tree ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeEnsemble {
    trees: Vec<Tree>,
    base_margin: f32,
    num_features: Option<usize>,
    feature_names: Vec<String>,
}

impl TreeEnsemble {
    pub fn from_path(path: &Path) -> Result<Self, ArtifactError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ArtifactError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    #[cfg(test)]
    pub fn from_json(raw: &str) -> Result<Self, ArtifactError> {
        Self::parse(raw, Path::new("<inline>"))
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ArtifactError> {
        let document: ModelDocument =
            serde_json::from_str(raw).map_err(|source| ArtifactError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_document(document)
    }

    fn from_document(document: ModelDocument) -> Result<Self, ArtifactError> {
        let learner = document.learner;
        let objective = learner.objective.name.as_str();
        if !matches!(objective, "binary:logistic" | "reg:logistic") {
            return Err(ArtifactError::Unsupported(format!("objective {objective}")));
        }
        let booster = learner.gradient_booster.name.as_str();
        if booster != "gbtree" {
            return Err(ArtifactError::Unsupported(format!("booster {booster}")));
        }

        let params = learner.learner_model_param;
        let base_score = parse_param(&params.base_score)?;
        if !(base_score > 0.0 && base_score < 1.0) {
            return Err(ArtifactError::Malformed(format!(
                "base_score {base_score} is not a probability"
            )));
        }
        let num_features = match params.num_feature.as_deref() {
            Some(raw) => match parse_param(raw)? as usize {
                0 => None,
                n => Some(n),
            },
            None => None,
        };

        let mut trees = Vec::with_capacity(learner.gradient_booster.model.trees.len());
        for (id, raw) in learner.gradient_booster.model.trees.into_iter().enumerate() {
            if raw.split_type.iter().any(|kind| *kind != 0) {
                return Err(ArtifactError::Unsupported(format!(
                    "categorical splits in tree {id}"
                )));
            }
            let tree = Tree {
                left: raw.left_children,
                right: raw.right_children,
                split_index: raw.split_indices,
                split_condition: raw.split_conditions,
                default_left: raw.default_left.into_iter().map(Flag::is_set).collect(),
            };
            tree.validate(id)?;
            trees.push(tree);
        }

        Ok(Self {
            trees,
            base_margin: logit(base_score),
            num_features,
            feature_names: learner.feature_names,
        })
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw additive score before the logistic transform.
    pub fn margin(&self, row: &[f64]) -> f32 {
        let row: Vec<f32> = row.iter().map(|value| *value as f32).collect();
        self.trees
            .iter()
            .fold(self.base_margin, |sum, tree| sum + tree.leaf_value(&row))
    }
}

impl Classifier for TreeEnsemble {
    fn predict(&self, row: &[f64]) -> (u8, f64) {
        let probability = sigmoid(f64::from(self.margin(row)));
        let label = u8::from(probability > DECISION_BOUNDARY);
        (label, probability)
    }

    fn num_features(&self) -> Option<usize> {
        self.num_features
    }

    fn feature_names(&self) -> Option<&[String]> {
        if self.feature_names.is_empty() {
            None
        } else {
            Some(&self.feature_names)
        }
    }
}

fn sigmoid(margin: f64) -> f64 {
    1.0 / (1.0 + (-margin).exp())
}

fn logit(probability: f64) -> f32 {
    (probability / (1.0 - probability)).ln() as f32
}

/// XGBoost stores scalar params as strings, newer releases as `"[5E-1]"`.
fn parse_param(raw: &str) -> Result<f64, ArtifactError> {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<f64>()
        .map_err(|_| ArtifactError::Malformed(format!("unparseable model param {raw:?}")))
}

#[derive(Debug, Deserialize)]
struct ModelDocument {
    learner: Learner,
}

#[derive(Debug, Deserialize)]
struct Learner {
    #[serde(default)]
    feature_names: Vec<String>,
    gradient_booster: GradientBooster,
    learner_model_param: LearnerModelParam,
    objective: Objective,
}

#[derive(Debug, Deserialize)]
struct GradientBooster {
    name: String,
    model: BoosterModel,
}

#[derive(Debug, Deserialize)]
struct BoosterModel {
    trees: Vec<RawTree>,
}

#[derive(Debug, Deserialize)]
struct RawTree {
    left_children: Vec<i32>,
    right_children: Vec<i32>,
    split_indices: Vec<u32>,
    split_conditions: Vec<f32>,
    default_left: Vec<Flag>,
    #[serde(default)]
    split_type: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct LearnerModelParam {
    base_score: String,
    #[serde(default)]
    num_feature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Objective {
    name: String,
}

/// `default_left` is 0/1 in older dumps and booleans in newer ones.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(u8),
}

impl Flag {
    fn is_set(self) -> bool {
        match self {
            Flag::Bool(value) => value,
            Flag::Int(value) => value != 0,
        }
    }
}
