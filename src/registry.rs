//! Term-indexed classifier buckets and the handle the inference path reads them through.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;

use crate::config::{artifact_path, RetryPolicy, ServiceConfig};
use crate::ensemble::{Classifier, TreeEnsemble};
use crate::error::ArtifactError;

const TERM1_SCHEMA: &[&str] = &[
    "TERM1",
    "TERM1_missing",
    "COUNT_F",
    "COUNT_WIU",
    "OLD_GPA_M6",
    "GENDER_ENCODED",
    "FAC_ENCODED",
    "has_F",
    "multiple_F",
    "low_gpa",
    "very_low_gpa",
    "early_warning",
    "current_term",
];

const TERM2_SCHEMA: &[&str] = &[
    "TERM1",
    "TERM2",
    "TERM1_missing",
    "TERM2_missing",
    "COUNT_F",
    "COUNT_WIU",
    "OLD_GPA_M6",
    "avg_gpa_up_to_now",
    "min_gpa_up_to_now",
    "max_gpa_up_to_now",
    "gpa_change_from_start",
    "consecutive_decline_2",
    "GENDER_ENCODED",
    "FAC_ENCODED",
    "has_F",
    "multiple_F",
    "low_gpa",
    "early_warning",
    "current_term",
];

const TERM3_SCHEMA: &[&str] = &[
    "TERM1",
    "TERM2",
    "TERM3",
    "TERM4",
    "TERM5",
    "TERM6",
    "TERM7",
    "TERM8",
    "TERM1_missing",
    "TERM2_missing",
    "TERM3_missing",
    "COUNT_F",
    "COUNT_WIU",
    "OLD_GPA_M6",
    "GPA",
    "num_terms_completed",
    "last_gpa",
    "gpa_trend",
    "avg_gpa_up_to_now",
    "min_gpa_up_to_now",
    "max_gpa_up_to_now",
    "gpa_std_up_to_now",
    "gpa_change_from_start",
    "improvement_from_hs",
    "decline_last_term",
    "consecutive_decline_2",
    "declining_trend",
    "GENDER_ENCODED",
    "FAC_ENCODED",
    "has_F",
    "multiple_F",
    "low_gpa",
    "very_low_gpa",
    "early_warning",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketId {
    Term1,
    Term2,
    /// Three or more completed terms.
    Term3,
}

impl BucketId {
    pub const ALL: [BucketId; 3] = [BucketId::Term1, BucketId::Term2, BucketId::Term3];

    /// One term → term1, two → term2, anything else (including none) → term3.
    pub fn for_terms_completed(term_count: usize) -> Self {
        match term_count {
            1 => BucketId::Term1,
            2 => BucketId::Term2,
            _ => BucketId::Term3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketId::Term1 => "term1",
            BucketId::Term2 => "term2",
            BucketId::Term3 => "term3",
        }
    }

    /// Ordered feature names the bucket's classifier expects.
    pub fn schema(&self) -> &'static [&'static str] {
        match self {
            BucketId::Term1 => TERM1_SCHEMA,
            BucketId::Term2 => TERM2_SCHEMA,
            BucketId::Term3 => TERM3_SCHEMA,
        }
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct ModelBucket {
    pub id: BucketId,
    pub schema: &'static [&'static str],
    pub classifier: Option<Arc<dyn Classifier>>,
}

impl fmt::Debug for ModelBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBucket")
            .field("id", &self.id)
            .field("features", &self.schema.len())
            .field("loaded", &self.classifier.is_some())
            .finish()
    }
}

/// Read-only set of buckets. A reload builds a new registry instead of mutating this one.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    buckets: BTreeMap<BucketId, ModelBucket>,
}

impl ModelRegistry {
    #[cfg(test)]
    pub fn empty() -> Self {
        Self::from_classifiers(std::iter::empty())
    }

    pub fn from_classifiers<I>(classifiers: I) -> Self
    where
        I: IntoIterator<Item = (BucketId, Arc<dyn Classifier>)>,
    {
        let mut loaded: BTreeMap<BucketId, Arc<dyn Classifier>> = classifiers.into_iter().collect();
        let buckets = BucketId::ALL
            .into_iter()
            .map(|id| {
                let bucket = ModelBucket {
                    id,
                    schema: id.schema(),
                    classifier: loaded.remove(&id),
                };
                (id, bucket)
            })
            .collect();
        Self { buckets }
    }

    pub fn select_bucket(&self, term_count: usize) -> &ModelBucket {
        self.bucket(BucketId::for_terms_completed(term_count))
    }

    pub fn bucket(&self, id: BucketId) -> &ModelBucket {
        &self.buckets[&id]
    }

    /// True when at least one bucket has a classifier.
    pub fn is_loaded(&self) -> bool {
        self.buckets.values().any(|bucket| bucket.classifier.is_some())
    }

    pub fn loaded_buckets(&self) -> BTreeMap<BucketId, bool> {
        self.buckets
            .iter()
            .map(|(id, bucket)| (*id, bucket.classifier.is_some()))
            .collect()
    }
}

/// Reads the three bucket artifacts from disk with a bounded retry.
#[derive(Debug, Clone)]
pub struct ModelLoader {
    model_dir: PathBuf,
    retry: RetryPolicy,
}

impl ModelLoader {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            model_dir: config.model_dir.clone(),
            retry: config.retry,
        }
    }

    /// Loads every bucket independently; failed buckets are left empty.
    pub fn load(&self) -> ModelRegistry {
        let mut classifiers: Vec<(BucketId, Arc<dyn Classifier>)> = Vec::new();
        for bucket in BucketId::ALL {
            match self.load_bucket(bucket) {
                Ok(classifier) => classifiers.push((bucket, classifier)),
                Err(err) => {
                    tracing::error!(%bucket, error = %err, "bucket left unloaded");
                }
            }
        }
        let registry = ModelRegistry::from_classifiers(classifiers);
        tracing::info!(
            loaded = registry.is_loaded(),
            buckets = ?registry.loaded_buckets(),
            "model registry ready"
        );
        registry
    }

    fn load_bucket(&self, bucket: BucketId) -> Result<Arc<dyn Classifier>, ArtifactError> {
        let model = self.retrying(bucket, TreeEnsemble::from_path)?;
        Ok(Arc::new(model))
    }

    /// Calls `read` until it succeeds, fails for good, or the retry budget runs out.
    fn retrying<F>(&self, bucket: BucketId, mut read: F) -> Result<TreeEnsemble, ArtifactError>
    where
        F: FnMut(&Path) -> Result<TreeEnsemble, ArtifactError>,
    {
        let path = artifact_path(&self.model_dir, bucket);
        let mut attempt = 1;
        loop {
            match read(&path) {
                Ok(model) => {
                    check_schema(bucket, &model)?;
                    tracing::info!(%bucket, path = %path.display(), trees = model.num_trees(), "classifier loaded");
                    return Ok(model);
                }
                Err(err) if err.is_transient() => match self.retry.delay_after(attempt) {
                    Some(delay) => {
                        tracing::warn!(%bucket, attempt, error = %err, "classifier load failed, retrying");
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }
}

fn check_schema(bucket: BucketId, model: &dyn Classifier) -> Result<(), ArtifactError> {
    let schema = bucket.schema();
    if let Some(width) = model.num_features() {
        if width != schema.len() {
            return Err(ArtifactError::SchemaMismatch {
                bucket,
                detail: format!("model expects {width} features, schema has {}", schema.len()),
            });
        }
    }
    if let Some(names) = model.feature_names() {
        if names.iter().map(String::as_str).ne(schema.iter().copied()) {
            return Err(ArtifactError::SchemaMismatch {
                bucket,
                detail: "feature names differ from the bucket schema".to_string(),
            });
        }
    }
    Ok(())
}

/// Shared access to the current registry snapshot.
///
/// Readers clone an `Arc` and run inference without holding any lock. A reload
/// builds a complete registry first and only locks to swap it in. Only one
/// lazy reload is ever attempted after startup.
#[derive(Debug)]
pub struct RegistryHandle {
    current: RwLock<Arc<ModelRegistry>>,
    reloading: Mutex<()>,
    reload_attempted: AtomicBool,
    loader: ModelLoader,
}

impl RegistryHandle {
    pub fn load(loader: ModelLoader) -> Self {
        let registry = loader.load();
        Self::with_registry(registry, loader)
    }

    pub fn with_registry(registry: ModelRegistry, loader: ModelLoader) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
            reloading: Mutex::new(()),
            reload_attempted: AtomicBool::new(false),
            loader,
        }
    }

    pub fn snapshot(&self) -> Arc<ModelRegistry> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reloads from disk once for the lifetime of the handle. Later calls, and
    /// calls that find a loaded registry, return the current snapshot.
    pub fn reload_once(&self) -> Arc<ModelRegistry> {
        let _guard = self.reloading.lock().unwrap_or_else(PoisonError::into_inner);
        let existing = self.snapshot();
        if existing.is_loaded() || self.reload_attempted.swap(true, Ordering::AcqRel) {
            return existing;
        }

        tracing::info!("reloading model registry");
        let fresh = Arc::new(self.loader.load());
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&fresh);
        fresh
    }
}
