use std::path::PathBuf;

use thiserror::Error;

use crate::registry::BucketId;

/// Request-scoped failures of the prediction pipeline.
#[derive(Debug, Error)]
pub enum PredictError {
    /// No bucket has a classifier, even after an on-demand reload.
    #[error("model not ready: no classifier bucket is loaded")]
    ModelNotReady,
    /// The request routed to a bucket whose classifier failed to load.
    #[error("classifier for bucket {bucket} is unavailable")]
    BucketUnavailable { bucket: BucketId },
    /// Input that cannot be coerced into a feature vector.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Failures while reading a classifier artifact from disk.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("unsupported model: {0}")]
    Unsupported(String),
    #[error("malformed model: {0}")]
    Malformed(String),
    #[error("schema mismatch for bucket {bucket}: {detail}")]
    SchemaMismatch { bucket: BucketId, detail: String },
}

impl ArtifactError {
    /// Missing or unreadable files may appear later; parse and schema errors will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArtifactError::Read { .. })
    }
}
