//! JSON export of scan results.

use crate::errors::ErrorKind;
use crate::models::{PlatformResult, ScanOutcome, ScanUnit};
use crate::pipeline::BatchSummary;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Serialize)]
struct FailureRecord<'a> {
    code: &'a str,
    start_date: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
    reason: &'static str,
    error: &'a ErrorKind,
}

#[derive(Debug, Serialize)]
struct SummaryFile<'a> {
    #[serde(flatten)]
    summary: &'a BatchSummary,
    generated_at: chrono::NaiveDateTime,
    failures: Vec<FailureRecord<'a>>,
}

pub fn result_path(dir: &Path, unit: &ScanUnit) -> PathBuf {
    dir.join(format!("{}.json", unit.key()))
}

pub fn write_result(dir: &Path, result: &PlatformResult) -> Result<PathBuf> {
    let path = result_path(dir, &result.unit());
    let file = std::fs::File::create(&path).with_context(|| format!("Could not create {:?}", path))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), result)
        .with_context(|| format!("Could not write {:?}", path))?;
    Ok(path)
}

/// Write one payload per successful unit (optionally only those with platform
/// days) and a `summary.json`. Returns the number of payloads written.
pub fn write_results(dir: &Path, summary: &BatchSummary, only_platform: bool) -> Result<usize> {
    std::fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;

    let mut written = 0usize;
    for result in summary.outcomes.iter().filter_map(|o| o.result()) {
        if only_platform && result.platform_days == 0 {
            continue;
        }
        write_result(dir, result)?;
        written += 1;
    }

    let failures = summary
        .outcomes
        .iter()
        .filter_map(|o| match o {
            ScanOutcome::Failure { unit, error } => Some(FailureRecord {
                code: &unit.symbol,
                start_date: unit.start_date,
                end_date: unit.end_date,
                reason: error.label(),
                error,
            }),
            _ => None,
        })
        .collect();

    let file = SummaryFile { summary, generated_at: chrono::Utc::now().naive_utc(), failures };
    let path = dir.join("summary.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&file)?)
        .with_context(|| format!("Could not write {:?}", path))?;

    info!("Exported {} result files to {:?}", written, dir);
    Ok(written)
}
