use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{RiskTier, StudentScore, TierSummary};

pub fn summarize_by_tier(scores: &[StudentScore]) -> Vec<TierSummary> {
    let mut map: std::collections::BTreeMap<RiskTier, (usize, f64)> =
        std::collections::BTreeMap::new();

    for score in scores {
        let entry = map.entry(score.tier).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += score.probability;
    }

    // Highest tier first.
    map.into_iter()
        .rev()
        .map(|(tier, (count, total_probability))| TierSummary {
            tier,
            count,
            avg_probability: if count == 0 {
                0.0
            } else {
                total_probability / count as f64
            },
        })
        .collect()
}

/// `scores` are expected ranked, highest risk first.
pub fn build_report(
    source: &str,
    generated_at: DateTime<Utc>,
    scores: &[StudentScore],
    rejected: usize,
) -> String {
    let summaries = summarize_by_tier(scores);

    let mut output = String::new();

    let _ = writeln!(output, "# Dropout Risk Report");
    let _ = writeln!(
        output,
        "Generated for {} at {} ({} scored, {} rejected)",
        source,
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        scores.len(),
        rejected
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Risk Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No students scored.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} students (avg probability {:.2})",
                summary.tier.name(),
                summary.tier.color(),
                summary.count,
                summary.avg_probability
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Students");

    if scores.is_empty() {
        let _ = writeln!(output, "No students scored.");
    } else {
        for score in scores.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}) {} risk, probability {:.2} after {} terms",
                score.student_id,
                score.faculty,
                score.tier.name(),
                score.probability,
                score.terms_completed
            );
        }
    }

    let scenarios: Vec<&StudentScore> = scores.iter().filter(|s| s.scenario.is_some()).collect();
    if !scenarios.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## What-if Scenarios");
        for score in scenarios {
            if let Some((future_gpa, comparison)) = &score.scenario {
                let _ = writeln!(
                    output,
                    "- {} with next-term GPA {:.2}: {:.2} -> {:.2} (change {:+.2})",
                    score.student_id,
                    future_gpa,
                    comparison.current_prob,
                    comparison.future_prob,
                    comparison.improvement
                );
            }
        }
    }

    output
}
