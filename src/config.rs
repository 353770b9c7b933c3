use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;

use crate::registry::BucketId;

pub const DEFAULT_MODEL_DIR: &str = "ml_models";

/// Bounded retry for classifier artifact loading: fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based), `None` once exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts.max(1) {
            None
        } else {
            Some(self.delay)
        }
    }
}

/// What to do with a faculty or gender outside the closed encoding tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CategoryPolicy {
    /// Encode as 0 and keep going.
    #[default]
    #[value(name = "default")]
    DefaultOnUnknown,
    /// Fail the request with `InvalidInput`.
    Reject,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub model_dir: PathBuf,
    pub retry: RetryPolicy,
    pub category_policy: CategoryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            retry: RetryPolicy::default(),
            category_policy: CategoryPolicy::default(),
        }
    }
}

pub fn artifact_path(model_dir: &Path, bucket: BucketId) -> PathBuf {
    model_dir.join(format!("xgboost_{}.json", bucket.as_str()))
}
