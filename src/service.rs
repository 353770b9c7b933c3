use crate::config::CategoryPolicy;
use crate::error::PredictError;
use crate::features::{FeatureVector, FeatureVectorBuilder};
use crate::inference::InferenceEngine;
use crate::models::{PredictionReport, RawStudentRecord, ScenarioReport, StudentScore};
use crate::registry::BucketId;
use crate::risk;
use crate::roster::RosterEntry;

/// Full request path: validate, derive features, route, classify.
#[derive(Debug, Clone)]
pub struct DropoutService {
    engine: InferenceEngine,
    builder: FeatureVectorBuilder,
    policy: CategoryPolicy,
}

impl DropoutService {
    pub fn new(engine: InferenceEngine, policy: CategoryPolicy) -> Self {
        Self {
            engine,
            builder: FeatureVectorBuilder,
            policy,
        }
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    fn features(&self, record: &RawStudentRecord) -> Result<(FeatureVector, usize), PredictError> {
        record.validate(self.policy)?;
        Ok((self.builder.build(record), record.terms_completed()))
    }

    pub fn assess(&self, record: &RawStudentRecord) -> Result<PredictionReport, PredictError> {
        let (features, terms_completed) = self.features(record)?;
        let result = self.engine.predict(&features, terms_completed)?;
        Ok(PredictionReport::new(
            BucketId::for_terms_completed(terms_completed),
            terms_completed,
            result,
        ))
    }

    pub fn what_if(
        &self,
        record: &RawStudentRecord,
        future_gpa: f64,
    ) -> Result<ScenarioReport, PredictError> {
        check_future_gpa(future_gpa)?;
        let (features, terms_completed) = self.features(record)?;
        let comparison = risk::compare(&self.engine, &features, terms_completed, future_gpa)?;
        Ok(ScenarioReport::new(future_gpa, comparison))
    }

    /// Scores one roster entry, including its what-if branch when a future grade is given.
    pub fn score(&self, entry: &RosterEntry) -> Result<StudentScore, PredictError> {
        let (features, terms_completed) = self.features(&entry.record)?;
        let (probability, scenario) = match entry.future_gpa {
            Some(future_gpa) => {
                check_future_gpa(future_gpa)?;
                let comparison =
                    risk::compare(&self.engine, &features, terms_completed, future_gpa)?;
                (comparison.current_prob, Some((future_gpa, comparison)))
            }
            None => {
                let probability = self.engine.predict(&features, terms_completed)?.probability;
                (probability, None)
            }
        };

        Ok(StudentScore {
            student_id: entry.student_id.clone(),
            faculty: entry.record.faculty.clone(),
            tier: risk::classify(probability),
            probability,
            terms_completed,
            scenario,
        })
    }
}

fn check_future_gpa(future_gpa: f64) -> Result<(), PredictError> {
    if future_gpa.is_finite() && (0.0..=crate::models::MAX_GPA).contains(&future_gpa) {
        Ok(())
    } else {
        Err(PredictError::InvalidInput(format!(
            "future GPA must be within [0, {}], got {future_gpa}",
            crate::models::MAX_GPA
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::ensemble::Classifier;
    use crate::inference::tests::{engine_with, FixedClassifier};
    use crate::models::Interpretation;

    fn student(term_gpas: Vec<Option<f64>>) -> RawStudentRecord {
        RawStudentRecord {
            faculty: "วิศวกรรมศาสตร์".to_string(),
            gender: "ชาย".to_string(),
            prior_gpa: 1.8,
            fail_count: 2,
            withdrawn_count: 0,
            term_gpas,
            current_term: None,
        }
    }

    fn service() -> DropoutService {
        let engine = engine_with(vec![
            (BucketId::Term1, FixedClassifier::new(0.1) as Arc<dyn Classifier>),
            (BucketId::Term2, FixedClassifier::new(0.65) as Arc<dyn Classifier>),
            (BucketId::Term3, FixedClassifier::new(0.40) as Arc<dyn Classifier>),
        ]);
        DropoutService::new(engine, CategoryPolicy::DefaultOnUnknown)
    }

    #[test]
    fn two_completed_terms_route_to_term2() {
        let mut terms = vec![Some(2.0), Some(1.5)];
        terms.extend(vec![None; 8]);
        let report = service().assess(&student(terms)).unwrap();

        assert_eq!(report.bucket, BucketId::Term2);
        assert_eq!(report.terms_completed, 2);
        assert_eq!(report.risk_level, "High");
        assert_eq!(report.prediction, 1);
    }

    #[test]
    fn what_if_reports_reduced_risk() {
        let report = service()
            .what_if(&student(vec![Some(2.0), Some(1.5)]), 3.2)
            .unwrap();
        assert_eq!(report.current_risk_level, "High");
        assert_eq!(report.future_risk_level, "Medium");
        assert_eq!(report.interpretation, Interpretation::RiskReduced);
    }

    #[test]
    fn invalid_input_is_rejected_before_inference() {
        let err = service().assess(&student(vec![Some(5.0)])).unwrap_err();
        assert!(matches!(err, PredictError::InvalidInput(_)));

        let err = service()
            .what_if(&student(vec![Some(2.0)]), -1.0)
            .unwrap_err();
        assert!(matches!(err, PredictError::InvalidInput(_)));
    }

    #[test]
    fn roster_entry_scores_with_scenario() {
        let entry = RosterEntry {
            student_id: "s-001".to_string(),
            record: student(vec![Some(2.0), Some(1.5)]),
            future_gpa: Some(3.0),
        };
        let score = service().score(&entry).unwrap();
        assert_eq!(score.tier, crate::models::RiskTier::High);
        let (future_gpa, comparison) = score.scenario.unwrap();
        assert_eq!(future_gpa, 3.0);
        assert!(comparison.improvement > 0.0);
    }

    #[derive(Debug, Default)]
    struct CountingClassifier {
        calls: AtomicUsize,
    }

    impl Classifier for CountingClassifier {
        fn predict(&self, _row: &[f64]) -> (u8, f64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (1, 0.7)
        }
    }

    #[test]
    fn roster_scenario_predicts_current_row_once() {
        let term2 = Arc::new(CountingClassifier::default());
        let engine = engine_with(vec![
            (BucketId::Term2, Arc::clone(&term2) as Arc<dyn Classifier>),
            (BucketId::Term3, FixedClassifier::new(0.2) as Arc<dyn Classifier>),
        ]);
        let service = DropoutService::new(engine, CategoryPolicy::DefaultOnUnknown);

        let with_scenario = RosterEntry {
            student_id: "s-002".to_string(),
            record: student(vec![Some(2.0), Some(1.5)]),
            future_gpa: Some(3.5),
        };
        let score = service.score(&with_scenario).unwrap();
        assert_eq!(term2.calls.load(Ordering::SeqCst), 1);
        let (_, comparison) = score.scenario.unwrap();
        assert_eq!(score.probability, comparison.current_prob);
        assert_eq!(comparison.future_prob, 0.2);

        let plain = RosterEntry {
            future_gpa: None,
            ..with_scenario
        };
        service.score(&plain).unwrap();
        assert_eq!(term2.calls.load(Ordering::SeqCst), 2);
    }
}
