use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::CategoryPolicy;
use crate::error::PredictError;
use crate::features::{encode_faculty, encode_gender};
use crate::registry::BucketId;

pub const MAX_TERMS: usize = 10;
pub const MAX_GPA: f64 = 4.0;

/// One student's academic history as received from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStudentRecord {
    pub faculty: String,
    pub gender: String,
    /// Cumulative prior GPA (GPAX).
    pub prior_gpa: f64,
    pub fail_count: u32,
    pub withdrawn_count: u32,
    /// Per-term GPA in order; `None` means the term is not completed yet.
    pub term_gpas: Vec<Option<f64>>,
    #[serde(default)]
    pub current_term: Option<u32>,
}

impl RawStudentRecord {
    pub fn valid_gpas(&self) -> Vec<f64> {
        self.term_gpas.iter().flatten().copied().collect()
    }

    /// Number of completed terms; drives bucket selection.
    pub fn terms_completed(&self) -> usize {
        self.term_gpas.iter().filter(|gpa| gpa.is_some()).count()
    }

    pub fn validate(&self, policy: CategoryPolicy) -> Result<(), PredictError> {
        if self.term_gpas.len() > MAX_TERMS {
            return Err(PredictError::InvalidInput(format!(
                "at most {MAX_TERMS} terms are supported, got {}",
                self.term_gpas.len()
            )));
        }
        check_gpa("prior GPA", self.prior_gpa)?;
        for (index, gpa) in self.term_gpas.iter().enumerate() {
            if let Some(value) = gpa {
                check_gpa(&format!("TERM{}", index + 1), *value)?;
            }
        }

        let unknown_faculty = encode_faculty(&self.faculty).is_none();
        let unknown_gender = encode_gender(&self.gender).is_none();
        match policy {
            CategoryPolicy::Reject if unknown_faculty => Err(PredictError::InvalidInput(
                format!("unknown faculty {:?}", self.faculty),
            )),
            CategoryPolicy::Reject if unknown_gender => Err(PredictError::InvalidInput(
                format!("unknown gender {:?}", self.gender),
            )),
            _ => {
                if unknown_faculty {
                    tracing::warn!(faculty = %self.faculty, "unknown faculty, encoding as 0");
                }
                if unknown_gender {
                    tracing::warn!(gender = %self.gender, "unknown gender, encoding as 0");
                }
                Ok(())
            }
        }
    }
}

fn check_gpa(field: &str, value: f64) -> Result<(), PredictError> {
    if value.is_finite() && (0.0..=MAX_GPA).contains(&value) {
        Ok(())
    } else {
        Err(PredictError::InvalidInput(format!(
            "{field} must be within [0, {MAX_GPA}], got {value}"
        )))
    }
}

/// Classifier output; label and probability are reported as the classifier gives them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: u8,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn name(&self) -> &'static str {
        match self {
            RiskTier::Low => "Low",
            RiskTier::Medium => "Medium",
            RiskTier::High => "High",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            RiskTier::Low => "green",
            RiskTier::Medium => "orange",
            RiskTier::High => "red",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Interpretation {
    RiskReduced,
    RiskIncreased,
    Unchanged,
}

/// Current-versus-projected probabilities for a what-if grade.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub current_prob: f64,
    pub future_prob: f64,
    /// `current_prob - future_prob`; positive means the projected grade lowers risk.
    pub improvement: f64,
}

impl Comparison {
    pub fn interpretation(&self) -> Interpretation {
        if self.improvement > 0.0 {
            Interpretation::RiskReduced
        } else if self.improvement < 0.0 {
            Interpretation::RiskIncreased
        } else {
            Interpretation::Unchanged
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionReport {
    pub id: Uuid,
    pub bucket: BucketId,
    pub terms_completed: usize,
    pub prediction: u8,
    pub prediction_label: &'static str,
    pub dropout_probability: f64,
    pub dropout_percentage: String,
    pub risk_level: &'static str,
    pub risk_color: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl PredictionReport {
    pub fn new(bucket: BucketId, terms_completed: usize, result: PredictionResult) -> Self {
        let tier = crate::risk::classify(result.probability);
        Self {
            id: Uuid::new_v4(),
            bucket,
            terms_completed,
            prediction: result.label,
            prediction_label: if result.label == 1 { "Dropout" } else { "Graduate" },
            dropout_probability: result.probability,
            dropout_percentage: format!("{:.2}%", result.probability * 100.0),
            risk_level: tier.name(),
            risk_color: tier.color(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub id: Uuid,
    pub future_gpa: f64,
    pub current_probability: f64,
    pub current_risk_level: &'static str,
    pub future_probability: f64,
    pub future_risk_level: &'static str,
    pub improvement: f64,
    pub interpretation: Interpretation,
    pub timestamp: DateTime<Utc>,
}

impl ScenarioReport {
    pub fn new(future_gpa: f64, comparison: Comparison) -> Self {
        Self {
            id: Uuid::new_v4(),
            future_gpa,
            current_probability: comparison.current_prob,
            current_risk_level: crate::risk::classify(comparison.current_prob).name(),
            future_probability: comparison.future_prob,
            future_risk_level: crate::risk::classify(comparison.future_prob).name(),
            improvement: comparison.improvement,
            interpretation: comparison.interpretation(),
            timestamp: Utc::now(),
        }
    }
}

/// One scored row of a batch run.
#[derive(Debug, Clone)]
pub struct StudentScore {
    pub student_id: String,
    pub faculty: String,
    pub tier: RiskTier,
    pub probability: f64,
    pub terms_completed: usize,
    pub scenario: Option<(f64, Comparison)>,
}

#[derive(Debug, Clone)]
pub struct TierSummary {
    pub tier: RiskTier,
    pub count: usize,
    pub avg_probability: f64,
}
