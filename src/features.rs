//! Derivation of the named numeric features the classifiers consume.
//!
//! Every builder step writes a disjoint set of names. The only overlap is the
//! failure flags, which are emitted twice (`has_F`/`has_f`,
//! `multiple_F`/`multiple_f`) because the classifiers and the UI read
//! different spellings of the same value.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::RawStudentRecord;

/// Per-term fields only exist for the first eight terms.
pub const TERM_FIELDS: usize = 8;
/// Missingness indicators only exist for the first three terms.
pub const MISSING_FIELDS: usize = 3;

const FACULTY_CODES: [(&str, u8); 6] = [
    ("วิทยาศาสตร์และเทคโนโลยี", 0),
    ("วิศวกรรมศาสตร์", 1),
    ("บริหารธุรกิจ", 2),
    ("ศิลปศาสตร์", 3),
    ("แพทยศาสตร์", 4),
    ("อื่นๆ", 5),
];

const GENDER_CODES: [(&str, u8); 2] = [("ชาย", 0), ("หญิง", 1)];

pub fn encode_faculty(faculty: &str) -> Option<u8> {
    lookup(&FACULTY_CODES, faculty)
}

pub fn encode_gender(gender: &str) -> Option<u8> {
    lookup(&GENDER_CODES, gender)
}

fn lookup(table: &[(&str, u8)], value: &str) -> Option<u8> {
    let value = value.trim();
    table
        .iter()
        .find(|(name, _)| *name == value)
        .map(|(_, code)| *code)
}

pub fn term_key(term: usize) -> String {
    format!("TERM{term}")
}

pub fn missing_key(term: usize) -> String {
    format!("TERM{term}_missing")
}

/// Immutable name → value mapping. Derived vectors are built from a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: BTreeMap<String, f64>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Value for `name`, 0.0 when absent or not a usable number.
    pub fn value_or_zero(&self, name: &str) -> f64 {
        match self.get(name) {
            Some(value) if value.is_finite() => value,
            _ => 0.0,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Copy of this vector with `updates` applied on top.
    pub fn with_overrides<I, K>(&self, updates: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut values = self.values.clone();
        for (name, value) in updates {
            values.insert(name.into(), value);
        }
        Self { values }
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for FeatureVector {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GpaSummary {
    avg: f64,
    min: f64,
    max: f64,
    std: f64,
    last: f64,
    trend: f64,
    count: usize,
}

impl GpaSummary {
    fn of(gpas: &[f64]) -> Self {
        let (Some(&first), Some(&last)) = (gpas.first(), gpas.last()) else {
            return Self {
                avg: 0.0,
                min: 0.0,
                max: 0.0,
                std: 0.0,
                last: 0.0,
                trend: 0.0,
                count: 0,
            };
        };
        Self {
            avg: mean(gpas),
            min: gpas.iter().copied().fold(f64::INFINITY, f64::min),
            max: gpas.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            std: population_std(gpas),
            last,
            trend: if gpas.len() >= 2 { last - first } else { 0.0 },
            count: gpas.len(),
        }
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation (ddof = 0); 0.0 below two values.
fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureVectorBuilder;

impl FeatureVectorBuilder {
    /// Derives the full feature set for one student. Never fails: unknown
    /// categories encode as 0 (validation decides beforehand whether that is allowed).
    pub fn build(&self, record: &RawStudentRecord) -> FeatureVector {
        let valid = record.valid_gpas();
        let summary = GpaSummary::of(&valid);
        let mut features: Vec<(String, f64)> = Vec::with_capacity(48);

        for term in 1..=TERM_FIELDS {
            let value = record
                .term_gpas
                .get(term - 1)
                .copied()
                .flatten()
                .unwrap_or(0.0);
            features.push((term_key(term), value));
        }
        for term in 1..=MISSING_FIELDS {
            let absent = matches!(record.term_gpas.get(term - 1), None | Some(None));
            features.push((missing_key(term), flag(absent)));
        }

        let fail_count = f64::from(record.fail_count);
        features.extend([
            ("COUNT_F".to_string(), fail_count),
            ("COUNT_WIU".to_string(), f64::from(record.withdrawn_count)),
            ("OLD_GPA_M6".to_string(), record.prior_gpa),
            ("GPA".to_string(), summary.avg),
            ("avg_gpa_up_to_now".to_string(), summary.avg),
            ("min_gpa_up_to_now".to_string(), summary.min),
            ("max_gpa_up_to_now".to_string(), summary.max),
            ("gpa_std".to_string(), summary.std),
            ("last_gpa".to_string(), summary.last),
            ("num_terms_completed".to_string(), summary.count as f64),
            ("gpa_trend".to_string(), summary.trend),
            ("improvement_from_hs".to_string(), summary.trend),
        ]);

        features.extend(risk_flags(record.prior_gpa, record.fail_count, &valid));
        features.extend(change_features(&valid));

        features.extend([
            (
                "GENDER_ENCODED".to_string(),
                f64::from(encode_gender(&record.gender).unwrap_or(0)),
            ),
            (
                "FAC_ENCODED".to_string(),
                f64::from(encode_faculty(&record.faculty).unwrap_or(0)),
            ),
            (
                "current_term".to_string(),
                f64::from(record.current_term.unwrap_or(1)),
            ),
        ]);

        features.into_iter().collect()
    }
}

fn risk_flags(prior_gpa: f64, fail_count: u32, valid: &[f64]) -> Vec<(String, f64)> {
    let has_f = flag(fail_count > 0);
    let multiple_f = flag(fail_count > 1);
    let declining = valid.len() >= 3 && {
        let (earlier, recent) = valid.split_at(valid.len() - 2);
        mean(recent) < mean(earlier)
    };

    vec![
        ("has_F".to_string(), has_f),
        ("multiple_F".to_string(), multiple_f),
        ("has_f".to_string(), has_f),
        ("multiple_f".to_string(), multiple_f),
        ("low_gpa".to_string(), flag(prior_gpa < 2.0)),
        ("very_low_gpa".to_string(), flag(prior_gpa < 1.5)),
        (
            "early_warning".to_string(),
            flag(prior_gpa < 2.5 && fail_count > 0),
        ),
        ("declining_trend".to_string(), flag(declining)),
    ]
}

fn change_features(valid: &[f64]) -> Vec<(String, f64)> {
    let (change, std, decline_last, consecutive) = match valid {
        [first, .., last] => {
            let second_last = valid[valid.len() - 2];
            let (earlier, recent) = valid.split_at(valid.len() - 2);
            let earlier_avg = if earlier.is_empty() { *first } else { mean(earlier) };
            (
                last - first,
                population_std(valid),
                flag(mean(recent) < earlier_avg),
                flag(*last < second_last),
            )
        }
        _ => (0.0, 0.0, 0.0, 0.0),
    };

    vec![
        ("gpa_change_from_start".to_string(), change),
        ("gpa_std_up_to_now".to_string(), std),
        ("decline_last_term".to_string(), decline_last),
        ("consecutive_decline_2".to_string(), consecutive),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(prior_gpa: f64, fail_count: u32, term_gpas: Vec<Option<f64>>) -> RawStudentRecord {
        RawStudentRecord {
            faculty: "วิศวกรรมศาสตร์".to_string(),
            gender: "ชาย".to_string(),
            prior_gpa,
            fail_count,
            withdrawn_count: 0,
            term_gpas,
            current_term: None,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn struggling_engineering_student() {
        let mut terms = vec![Some(2.0), Some(1.5)];
        terms.extend(vec![None; 8]);
        let features = FeatureVectorBuilder.build(&record(1.8, 2, terms));

        assert_eq!(features.get("has_F"), Some(1.0));
        assert_eq!(features.get("multiple_F"), Some(1.0));
        assert_eq!(features.get("low_gpa"), Some(1.0));
        assert_eq!(features.get("very_low_gpa"), Some(0.0));
        assert_eq!(features.get("early_warning"), Some(1.0));
        assert_close(features.value_or_zero("gpa_trend"), -0.5);
        assert_eq!(features.get("TERM1"), Some(2.0));
        assert_eq!(features.get("TERM2"), Some(1.5));
        assert_eq!(features.get("TERM3"), Some(0.0));
        assert_eq!(features.get("TERM1_missing"), Some(0.0));
        assert_eq!(features.get("TERM3_missing"), Some(1.0));
        assert_eq!(features.get("FAC_ENCODED"), Some(1.0));
        assert_eq!(features.get("GENDER_ENCODED"), Some(0.0));
        assert_eq!(features.get("num_terms_completed"), Some(2.0));
        assert_eq!(features.get("consecutive_decline_2"), Some(1.0));
        // Two terms: the recent pair is compared against the first term.
        assert_eq!(features.get("decline_last_term"), Some(1.0));
    }

    #[test]
    fn no_completed_terms_zeroes_aggregates() {
        let features = FeatureVectorBuilder.build(&record(3.0, 0, vec![None; 10]));

        for name in [
            "GPA",
            "avg_gpa_up_to_now",
            "min_gpa_up_to_now",
            "max_gpa_up_to_now",
            "gpa_std",
            "gpa_std_up_to_now",
            "last_gpa",
            "num_terms_completed",
            "gpa_trend",
            "gpa_change_from_start",
        ] {
            assert_eq!(features.get(name), Some(0.0), "{name}");
        }
        for term in 1..=MISSING_FIELDS {
            assert_eq!(features.get(&missing_key(term)), Some(1.0));
        }
    }

    #[test]
    fn short_input_marks_missing_positions() {
        let features = FeatureVectorBuilder.build(&record(3.0, 0, vec![Some(3.2)]));
        assert_eq!(features.get("TERM1_missing"), Some(0.0));
        assert_eq!(features.get("TERM2_missing"), Some(1.0));
        assert_eq!(features.get("TERM3_missing"), Some(1.0));
        assert_eq!(features.get("gpa_trend"), Some(0.0));
        assert_eq!(features.get("gpa_std"), Some(0.0));
    }

    #[test]
    fn late_terms_feed_aggregates_only() {
        let mut terms = vec![Some(3.0); 8];
        terms.push(Some(1.0));
        terms.push(Some(1.0));
        let features = FeatureVectorBuilder.build(&record(3.0, 0, terms));

        assert_eq!(features.get("TERM9"), None);
        assert_eq!(features.get("num_terms_completed"), Some(10.0));
        assert_eq!(features.get("last_gpa"), Some(1.0));
        assert_eq!(features.get("min_gpa_up_to_now"), Some(1.0));
        assert_close(features.value_or_zero("GPA"), 2.6);
        assert_eq!(features.get("declining_trend"), Some(1.0));
    }

    #[test]
    fn aggregates_use_population_std() {
        let features =
            FeatureVectorBuilder.build(&record(3.0, 0, vec![Some(4.0), Some(3.0), Some(2.0)]));
        assert_close(features.value_or_zero("GPA"), 3.0);
        assert_close(features.value_or_zero("gpa_std"), (2.0f64 / 3.0).sqrt());
        assert_close(features.value_or_zero("gpa_std_up_to_now"), (2.0f64 / 3.0).sqrt());
        assert_eq!(features.get("max_gpa_up_to_now"), Some(4.0));
        assert_eq!(features.get("declining_trend"), Some(1.0));
        assert_eq!(features.get("decline_last_term"), Some(1.0));
        assert_eq!(features.get("consecutive_decline_2"), Some(1.0));
    }

    #[test]
    fn failure_flags_are_dual_cased() {
        let features = FeatureVectorBuilder.build(&record(2.2, 1, vec![Some(2.5)]));
        assert_eq!(features.get("has_F"), features.get("has_f"));
        assert_eq!(features.get("multiple_F"), features.get("multiple_f"));
        assert_eq!(features.get("has_F"), Some(1.0));
        assert_eq!(features.get("multiple_F"), Some(0.0));
        assert_eq!(features.get("early_warning"), Some(1.0));
    }

    #[test]
    fn unknown_categories_encode_as_zero() {
        let mut student = record(3.0, 0, vec![Some(3.0)]);
        student.faculty = "Unknown".to_string();
        student.gender = "other".to_string();
        student.current_term = Some(4);
        let features = FeatureVectorBuilder.build(&student);
        assert_eq!(features.get("FAC_ENCODED"), Some(0.0));
        assert_eq!(features.get("GENDER_ENCODED"), Some(0.0));
        assert_eq!(features.get("current_term"), Some(4.0));
    }

    #[test]
    fn building_twice_is_bit_identical() {
        let student = record(2.1, 3, vec![Some(2.7), None, Some(1.9), Some(2.2)]);
        let first = FeatureVectorBuilder.build(&student);
        let second = FeatureVectorBuilder.build(&student);
        assert_eq!(first.len(), second.len());
        for ((name_a, a), (name_b, b)) in first.iter().zip(second.iter()) {
            assert_eq!(name_a, name_b);
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn overrides_leave_original_untouched() {
        let original = FeatureVectorBuilder.build(&record(3.0, 0, vec![Some(3.0)]));
        let updated = original.with_overrides([("TERM2", 2.5)]);
        assert_eq!(original.get("TERM2"), Some(0.0));
        assert_eq!(updated.get("TERM2"), Some(2.5));
    }
}
