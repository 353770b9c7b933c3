use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tokio::task::JoinSet;

mod config;
mod ensemble;
mod error;
mod features;
mod inference;
mod logging;
mod models;
mod registry;
mod report;
mod risk;
mod roster;
mod scenario;
mod service;

use config::{CategoryPolicy, RetryPolicy, ServiceConfig, DEFAULT_MODEL_DIR};
use error::PredictError;
use inference::InferenceEngine;
use models::RawStudentRecord;
use registry::{ModelLoader, RegistryHandle};
use service::DropoutService;

#[derive(Parser)]
#[command(name = "dropout-risk")]
#[command(about = "Student dropout risk prediction from term grade history", long_about = None)]
struct Cli {
    /// Directory holding xgboost_term1.json, xgboost_term2.json and xgboost_term3.json
    #[arg(long, env = "DROPOUT_MODEL_DIR", default_value = DEFAULT_MODEL_DIR, global = true)]
    model_dir: PathBuf,
    /// Attempts per classifier artifact before the bucket is left unloaded
    #[arg(long, env = "DROPOUT_LOAD_ATTEMPTS", default_value_t = 3, global = true)]
    load_attempts: u32,
    /// Fixed delay between load attempts
    #[arg(long, env = "DROPOUT_LOAD_DELAY_MS", default_value_t = 1000, global = true)]
    load_delay_ms: u64,
    /// How to treat a faculty or gender outside the known tables
    #[arg(long, value_enum, default_value_t = CategoryPolicy::DefaultOnUnknown, global = true)]
    unknown_category: CategoryPolicy,
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            model_dir: self.model_dir.clone(),
            retry: RetryPolicy {
                max_attempts: self.load_attempts,
                delay: Duration::from_millis(self.load_delay_ms),
            },
            category_policy: self.unknown_category,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Predict dropout risk for one student
    Predict {
        #[command(flatten)]
        student: StudentArgs,
    },
    /// Compare current risk with risk after a hypothetical next-term GPA
    WhatIf {
        #[command(flatten)]
        student: StudentArgs,
        #[arg(long)]
        future_gpa: f64,
    },
    /// Score every student in a CSV roster and write a markdown report
    Batch {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Report which classifier buckets are loaded
    Health,
}

#[derive(Args)]
struct StudentArgs {
    #[arg(long)]
    faculty: String,
    #[arg(long)]
    gender: String,
    /// Cumulative prior GPA (GPAX)
    #[arg(long)]
    gpax: f64,
    #[arg(long, default_value_t = 0)]
    count_f: u32,
    #[arg(long, default_value_t = 0)]
    count_wiu: u32,
    /// Comma separated term GPAs in order; leave a slot empty for a term not completed ("2.0,1.5,,3.1")
    #[arg(long, default_value = "")]
    terms: String,
    #[arg(long)]
    current_term: Option<u32>,
}

impl StudentArgs {
    fn into_record(self) -> Result<RawStudentRecord, PredictError> {
        Ok(RawStudentRecord {
            term_gpas: parse_terms(&self.terms)?,
            faculty: self.faculty,
            gender: self.gender,
            prior_gpa: self.gpax,
            fail_count: self.count_f,
            withdrawn_count: self.count_wiu,
            current_term: self.current_term,
        })
    }
}

fn parse_terms(raw: &str) -> Result<Vec<Option<f64>>, PredictError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(str::trim)
        .enumerate()
        .map(|(index, value)| match value {
            "" => Ok(None),
            value => value.parse::<f64>().map(Some).map_err(|_| {
                PredictError::InvalidInput(format!("TERM{} is not a number: {value:?}", index + 1))
            }),
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init()?;

    let config = cli.service_config();
    let loader = ModelLoader::new(&config);
    let handle = tokio::task::spawn_blocking(move || RegistryHandle::load(loader))
        .await
        .context("model loading task failed")?;
    let engine = InferenceEngine::new(Arc::new(handle));
    let service = Arc::new(DropoutService::new(engine, config.category_policy));

    match cli.command {
        Commands::Predict { student } => {
            let record = student.into_record()?;
            let report = service.assess(&record)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::WhatIf {
            student,
            future_gpa,
        } => {
            let record = student.into_record()?;
            let report = service.what_if(&record, future_gpa)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Batch { csv, out, limit } => {
            let entries = roster::read_csv(&csv)?;
            let total = entries.len();

            let mut tasks = JoinSet::new();
            for entry in entries {
                let service = Arc::clone(&service);
                tasks.spawn_blocking(move || {
                    let result = service.score(&entry);
                    (entry.student_id, result)
                });
            }

            let mut scores = Vec::with_capacity(total);
            let mut rejected = 0usize;
            while let Some(joined) = tasks.join_next().await {
                let (student_id, result) = joined.context("scoring task failed")?;
                match result {
                    Ok(score) => scores.push(score),
                    Err(PredictError::ModelNotReady) => {
                        return Err(PredictError::ModelNotReady.into());
                    }
                    Err(err) => {
                        tracing::warn!(%student_id, error = %err, "student skipped");
                        rejected += 1;
                    }
                }
            }

            let scores = risk::rank_scores(scores);
            if scores.is_empty() {
                println!("No students could be scored.");
            } else {
                println!("Top students by dropout risk:");
                for score in scores.iter().take(limit) {
                    println!(
                        "- {} ({}) {} risk, probability {:.2} after {} terms",
                        score.student_id,
                        score.faculty,
                        score.tier.name(),
                        score.probability,
                        score.terms_completed
                    );
                }
            }

            let source = csv.display().to_string();
            let report = report::build_report(&source, Utc::now(), &scores, rejected);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::Health => {
            let registry = service.engine().registry().snapshot();
            let loaded = registry.is_loaded();
            let state = if loaded { "healthy" } else { "unhealthy" };
            let status = json!({
                "status": state,
                "model_loaded": loaded,
                "buckets": registry.loaded_buckets(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_terms_with_gaps() {
        assert_eq!(
            parse_terms("2.0, 1.5,,3.1").unwrap(),
            vec![Some(2.0), Some(1.5), None, Some(3.1)]
        );
        assert!(parse_terms("").unwrap().is_empty());
    }

    #[test]
    fn unparseable_term_is_invalid_input() {
        assert!(matches!(
            parse_terms("2.0,abc"),
            Err(PredictError::InvalidInput(_))
        ));
    }

    #[test]
    fn cli_defaults_build_service_config() {
        let cli = Cli::parse_from(["dropout-risk", "health"]);
        let config = cli.service_config();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.category_policy, CategoryPolicy::DefaultOnUnknown);
    }
}
