use crate::features::{mean, term_key, FeatureVector, TERM_FIELDS};

/// Builds the feature vector a student would have after one more term at `future_gpa`.
///
/// Only `GPA`, `last_gpa`, `num_terms_completed` and `gpa_trend` are
/// recomputed; every other field keeps its current value. The recomputation
/// reads the positive `TERM1..TERM8` entries, so a real 0.0 term grade counts
/// as "not taken". When the next term is past `TERM8` the assumed grade is dropped.
pub fn project(current: &FeatureVector, future_gpa: f64, current_term_count: usize) -> FeatureVector {
    let next_term = current_term_count + 1;
    let staged = if next_term <= TERM_FIELDS {
        current.with_overrides([(term_key(next_term), future_gpa)])
    } else {
        tracing::debug!(next_term, "projected term has no per-term field, grade ignored");
        current.clone()
    };

    let taken: Vec<f64> = (1..=TERM_FIELDS)
        .map(|term| staged.value_or_zero(&term_key(term)))
        .filter(|gpa| *gpa > 0.0)
        .collect();

    let (Some(&first), Some(&last)) = (taken.first(), taken.last()) else {
        return staged;
    };

    let mut updates = vec![
        ("GPA", mean(&taken)),
        ("last_gpa", last),
        ("num_terms_completed", taken.len() as f64),
    ];
    if taken.len() >= 2 {
        updates.push(("gpa_trend", last - first));
    }
    staged.with_overrides(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVectorBuilder;
    use crate::models::RawStudentRecord;

    fn features_for(term_gpas: Vec<Option<f64>>) -> FeatureVector {
        FeatureVectorBuilder.build(&RawStudentRecord {
            faculty: "บริหารธุรกิจ".to_string(),
            gender: "หญิง".to_string(),
            prior_gpa: 2.3,
            fail_count: 1,
            withdrawn_count: 0,
            term_gpas,
            current_term: None,
        })
    }

    #[test]
    fn next_term_is_filled_and_aggregates_recomputed() {
        let current = features_for(vec![Some(2.0), Some(1.5)]);
        let future = project(&current, 3.5, 2);

        assert_eq!(future.get("TERM3"), Some(3.5));
        assert_eq!(future.get("num_terms_completed"), Some(3.0));
        assert_eq!(future.get("last_gpa"), Some(3.5));
        assert!((future.value_or_zero("GPA") - 7.0 / 3.0).abs() < 1e-9);
        assert_eq!(future.get("gpa_trend"), Some(1.5));
    }

    #[test]
    fn projection_does_not_touch_the_original() {
        let current = features_for(vec![Some(2.0), Some(1.5)]);
        let snapshot = current.clone();
        let _ = project(&current, 3.5, 2);
        assert_eq!(current, snapshot);
    }

    #[test]
    fn non_recomputed_fields_keep_their_values() {
        let current = features_for(vec![Some(2.0), Some(1.5)]);
        let future = project(&current, 3.5, 2);
        for name in ["consecutive_decline_2", "gpa_std", "avg_gpa_up_to_now", "TERM3_missing"] {
            assert_eq!(future.get(name), current.get(name), "{name}");
        }
    }

    #[test]
    fn completed_count_grows_by_one() {
        for count in 1..TERM_FIELDS {
            let terms = vec![Some(2.5); count];
            let current = features_for(terms);
            let future = project(&current, 2.0, count);
            assert_eq!(
                future.get("num_terms_completed"),
                Some((count + 1) as f64),
                "count {count}"
            );
        }
    }

    #[test]
    fn grade_beyond_eighth_term_is_dropped() {
        let current = features_for(vec![Some(3.0); 8]);
        let future = project(&current, 1.0, 8);
        assert_eq!(future.get("TERM9"), None);
        assert_eq!(future.get("num_terms_completed"), Some(8.0));
        assert_eq!(future.get("last_gpa"), Some(3.0));
    }

    #[test]
    fn zero_grade_counts_as_not_taken() {
        let current = features_for(vec![Some(2.0), Some(0.0)]);
        let future = project(&current, 3.0, 2);
        assert_eq!(future.get("num_terms_completed"), Some(2.0));
        assert_eq!(future.get("gpa_trend"), Some(1.0));
    }

    #[test]
    fn single_taken_term_keeps_previous_trend() {
        let current = features_for(vec![]);
        let future = project(&current, 2.8, 0);
        assert_eq!(future.get("TERM1"), Some(2.8));
        assert_eq!(future.get("num_terms_completed"), Some(1.0));
        assert_eq!(future.get("gpa_trend"), Some(0.0));
    }
}
