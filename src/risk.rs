use crate::error::PredictError;
use crate::features::FeatureVector;
use crate::inference::InferenceEngine;
use crate::models::{Comparison, RiskTier, StudentScore};
use crate::scenario;

pub const MEDIUM_RISK_FROM: f64 = 0.3;
pub const HIGH_RISK_FROM: f64 = 0.6;

/// Tier boundaries belong to the tier above: 0.3 is Medium, 0.6 is High.
pub fn classify(probability: f64) -> RiskTier {
    if probability < MEDIUM_RISK_FROM {
        RiskTier::Low
    } else if probability < HIGH_RISK_FROM {
        RiskTier::Medium
    } else {
        RiskTier::High
    }
}

/// Scores the current state and the state after one more term at `future_gpa`.
pub fn compare(
    engine: &InferenceEngine,
    current: &FeatureVector,
    current_term_count: usize,
    future_gpa: f64,
) -> Result<Comparison, PredictError> {
    let current_prob = engine.predict(current, current_term_count)?.probability;
    let projected = scenario::project(current, future_gpa, current_term_count);
    let future_prob = engine.predict(&projected, current_term_count + 1)?.probability;

    Ok(Comparison {
        current_prob,
        future_prob,
        improvement: current_prob - future_prob,
    })
}

/// Highest probability first.
pub fn rank_scores(mut scores: Vec<StudentScore>) -> Vec<StudentScore> {
    scores.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scores
}
