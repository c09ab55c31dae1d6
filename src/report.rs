//! Report creation for completed trial runs.
//!
//! Produces a plain-text analysis (status summary plus per-status
//! breakdown sections), a colorized variant for the terminal, and a JSON
//! twin for tooling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use console::Style;
use serde::Serialize;

use crate::error::Result;
use crate::run::{MutantReport, MutantTrialResult, ResultsSummary, TrialStatus};

/// Mutants of one status, paired for section building.
#[derive(Debug, Clone)]
pub struct ReportedMutants {
    pub status: TrialStatus,
    pub mutants: Vec<MutantReport>,
}

/// Terminal-ready report fragments with coloring applied.
#[derive(Debug, Clone)]
pub struct DisplayResults {
    pub summary: String,
    pub survived: String,
    pub detected: String,
}

/// Filter trial results down to the mutants with a given status.
pub fn get_reported_results(
    trial_results: &[MutantTrialResult],
    status: TrialStatus,
) -> ReportedMutants {
    let mutants = trial_results
        .iter()
        .filter(|t| t.status() == status)
        .map(|t| t.mutant.clone())
        .collect();
    ReportedMutants { status, mutants }
}

/// Status counts for the summary header, plus the total.
pub fn get_status_summary(trial_results: &[MutantTrialResult]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for trial in trial_results {
        *counts.entry(trial.status().to_string()).or_insert(0) += 1;
    }
    let mut summary: Vec<(String, usize)> = counts.into_iter().collect();
    summary.push(("TOTAL RUNS".to_string(), trial_results.len()));
    summary
}

fn build_report_section(status: TrialStatus, mutants: &[MutantReport]) -> String {
    let header = format!("\n{status}");
    let mut section = vec![header.clone(), "-".repeat(header.len() - 1)];

    for mutant in mutants {
        section.push(format!(
            "{}: (l: {}, c: {}) - mutation from {} to {}",
            mutant.src_file.display(),
            mutant.src_idx.lineno,
            mutant.src_idx.col_offset,
            mutant.src_idx.op_type,
            mutant.mutation,
        ));
        for line in mutant.diff.lines() {
            section.push(format!("    {line}"));
        }
    }

    section.join("\n")
}

/// Create the analysis text for the trials, plus a colorized variant for
/// terminal display: survivors red, detections green.
pub fn analyze_mutant_trials(trial_results: &[MutantTrialResult]) -> (String, DisplayResults) {
    let survived = get_reported_results(trial_results, TrialStatus::Survived);
    let detected = get_reported_results(trial_results, TrialStatus::Detected);
    let errors = get_reported_results(trial_results, TrialStatus::Error);
    let timeouts = get_reported_results(trial_results, TrialStatus::Timeout);
    let unknowns = get_reported_results(trial_results, TrialStatus::Unknown);

    let mut report_sections = Vec::new();

    let summary_header = "Overall mutation trial summary";
    report_sections.push(format!("{summary_header}\n{}", "=".repeat(summary_header.len())));
    for (status, count) in get_status_summary(trial_results) {
        report_sections.push(format!(" - {status}: {count}"));
    }

    let display_summary = report_sections.join("\n");
    let mut display_survived = String::new();
    let mut display_detected = String::new();

    let section_header = "Mutations by result status";
    report_sections.push(format!("\n\n{section_header}\n{}", "=".repeat(section_header.len())));

    for reported in [survived, detected, errors, timeouts, unknowns] {
        if reported.mutants.is_empty() {
            continue;
        }
        let section = build_report_section(reported.status, &reported.mutants);

        match reported.status {
            TrialStatus::Survived => {
                display_survived = Style::new().red().apply_to(&section).to_string();
            }
            TrialStatus::Detected => {
                display_detected = Style::new().green().apply_to(&section).to_string();
            }
            _ => {}
        }

        report_sections.push(section);
    }

    (
        report_sections.join("\n"),
        DisplayResults {
            summary: display_summary,
            survived: display_survived,
            detected: display_detected,
        },
    )
}

/// Mutants counted against the `--exception` survivor tolerance:
/// survivors plus timeouts, both being trials the suite failed to fail.
pub fn surviving_count(trial_results: &[MutantTrialResult]) -> usize {
    trial_results
        .iter()
        .filter(|t| matches!(t.status(), TrialStatus::Survived | TrialStatus::Timeout))
        .count()
}

/// Write the text report to disk, creating parent directories as needed.
pub fn write_report(report: &str, location: &Path) -> Result<()> {
    if let Some(parent) = location.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(location, report)?;
    Ok(())
}

/// Machine-readable twin of the text report.
#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub total_runs: usize,
    pub survived: usize,
    pub detected: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub unknowns: usize,
    pub n_locs_mutated: usize,
    pub n_locs_identified: usize,
    pub runtime_secs: f64,
    pub trials: Vec<TrialRecord>,
}

#[derive(Debug, Serialize)]
pub struct TrialRecord {
    pub src_file: PathBuf,
    pub lineno: usize,
    pub col_offset: usize,
    pub original: String,
    pub mutation: String,
    pub status: TrialStatus,
    pub return_code: i32,
    pub diff: String,
}

pub fn json_report(summary: &ResultsSummary) -> JsonReport {
    let count = |status: TrialStatus| {
        summary
            .results
            .iter()
            .filter(|t| t.status() == status)
            .count()
    };

    JsonReport {
        total_runs: summary.results.len(),
        survived: count(TrialStatus::Survived),
        detected: count(TrialStatus::Detected),
        errors: count(TrialStatus::Error),
        timeouts: count(TrialStatus::Timeout),
        unknowns: count(TrialStatus::Unknown),
        n_locs_mutated: summary.n_locs_mutated,
        n_locs_identified: summary.n_locs_identified,
        runtime_secs: summary.total_runtime.as_secs_f64(),
        trials: summary
            .results
            .iter()
            .map(|t| TrialRecord {
                src_file: t.mutant.src_file.clone(),
                lineno: t.mutant.src_idx.lineno,
                col_offset: t.mutant.src_idx.col_offset,
                original: t.mutant.src_idx.op_type.to_string(),
                mutation: t.mutant.mutation.to_string(),
                status: t.status(),
                return_code: t.return_code,
                diff: t.mutant.diff.clone(),
            })
            .collect(),
    }
}
