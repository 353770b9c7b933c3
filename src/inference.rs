use std::sync::Arc;

use crate::error::PredictError;
use crate::features::FeatureVector;
use crate::models::PredictionResult;
use crate::registry::{ModelBucket, RegistryHandle};

/// Runs a feature vector through the classifier of the bucket its term count routes to.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    registry: Arc<RegistryHandle>,
}

impl InferenceEngine {
    pub fn new(registry: Arc<RegistryHandle>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn predict(
        &self,
        features: &FeatureVector,
        term_count: usize,
    ) -> Result<PredictionResult, PredictError> {
        let mut snapshot = self.registry.snapshot();
        if !snapshot.is_loaded() {
            snapshot = self.registry.reload_once();
            if !snapshot.is_loaded() {
                return Err(PredictError::ModelNotReady);
            }
        }

        let bucket = snapshot.select_bucket(term_count);
        tracing::debug!(term_count, bucket = %bucket.id, "routing prediction");
        let classifier = bucket
            .classifier
            .as_ref()
            .ok_or(PredictError::BucketUnavailable { bucket: bucket.id })?;

        let row = ordered_row(bucket, features);
        let (label, probability) = classifier.predict(&row);
        Ok(PredictionResult { label, probability })
    }
}

/// Feature values in the bucket's declared order; absent or non-finite names become 0.0.
pub fn ordered_row(bucket: &ModelBucket, features: &FeatureVector) -> Vec<f64> {
    bucket
        .schema
        .iter()
        .map(|name| features.value_or_zero(name))
        .collect()
}
