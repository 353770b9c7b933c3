use std::io::Read;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::RawStudentRecord;

/// One CSV row; empty term cells mean the term is not completed.
#[derive(Debug, Clone, Deserialize)]
struct RosterRow {
    student_id: String,
    faculty: String,
    gender: String,
    gpax: f64,
    count_f: u32,
    #[serde(default)]
    count_wiu: Option<u32>,
    term1: Option<f64>,
    term2: Option<f64>,
    term3: Option<f64>,
    term4: Option<f64>,
    term5: Option<f64>,
    term6: Option<f64>,
    term7: Option<f64>,
    term8: Option<f64>,
    term9: Option<f64>,
    term10: Option<f64>,
    #[serde(default)]
    future_gpa: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub student_id: String,
    pub record: RawStudentRecord,
    pub future_gpa: Option<f64>,
}

impl From<RosterRow> for RosterEntry {
    fn from(row: RosterRow) -> Self {
        let mut term_gpas = vec![
            row.term1, row.term2, row.term3, row.term4, row.term5, row.term6, row.term7,
            row.term8, row.term9, row.term10,
        ];
        // Trailing empty terms carry no information.
        while matches!(term_gpas.last(), Some(None)) {
            term_gpas.pop();
        }

        RosterEntry {
            student_id: row.student_id,
            record: RawStudentRecord {
                faculty: row.faculty,
                gender: row.gender,
                prior_gpa: row.gpax,
                fail_count: row.count_f,
                withdrawn_count: row.count_wiu.unwrap_or(0),
                term_gpas,
                current_term: None,
            },
            future_gpa: row.future_gpa,
        }
    }
}

pub fn read_csv(csv_path: &Path) -> anyhow::Result<Vec<RosterEntry>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    read_roster(file).with_context(|| format!("failed to read roster {}", csv_path.display()))
}

pub fn read_roster<R: Read>(input: R) -> anyhow::Result<Vec<RosterEntry>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut entries = Vec::new();

    for (line, result) in reader.deserialize::<RosterRow>().enumerate() {
        let row = result.with_context(|| format!("invalid roster row {}", line + 1))?;
        entries.push(RosterEntry::from(row));
    }

    Ok(entries)
}
