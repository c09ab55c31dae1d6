use std::path::PathBuf;
use std::time::Duration;

use pymut::indexer::LocIndex;
use pymut::ops::MutationOp;
use pymut::report;
use pymut::run::{MutantReport, MutantTrialResult, ResultsSummary, TrialStatus};
use tempfile::TempDir;

fn trial(return_code: i32, lineno: usize) -> MutantTrialResult {
    MutantTrialResult {
        mutant: MutantReport {
            src_file: PathBuf::from("pkg/app.py"),
            src_idx: LocIndex {
                ast_class: "BinOp",
                lineno,
                col_offset: 4,
                end_lineno: Some(lineno),
                end_col_offset: Some(9),
                op_type: MutationOp::Add,
            },
            mutation: MutationOp::Mult,
            diff: "- x = a + b\n+ x = a * b\n".to_string(),
        },
        return_code,
    }
}

fn mixed_results() -> Vec<MutantTrialResult> {
    vec![trial(0, 1), trial(0, 2), trial(1, 3), trial(2, 4), trial(3, 5), trial(9, 6)]
}

// --- status summary ---

#[test]
fn status_summary_counts_by_status() {
    let summary = report::get_status_summary(&mixed_results());
    let lookup = |key: &str| {
        summary
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    };
    assert_eq!(lookup("SURVIVED"), 2);
    assert_eq!(lookup("DETECTED"), 1);
    assert_eq!(lookup("ERROR"), 1);
    assert_eq!(lookup("TIMEOUT"), 1);
    assert_eq!(lookup("UNKNOWN"), 1);
    assert_eq!(lookup("TOTAL RUNS"), 6);
}

#[test]
fn reported_results_filter_by_status() {
    let results = mixed_results();
    let survived = report::get_reported_results(&results, TrialStatus::Survived);
    assert_eq!(survived.mutants.len(), 2);
    assert_eq!(survived.status, TrialStatus::Survived);

    let unknown = report::get_reported_results(&results, TrialStatus::Unknown);
    assert_eq!(unknown.mutants.len(), 1);
}

// --- analysis text ---

#[test]
fn analysis_contains_summary_and_sections() {
    let (text, display) = report::analyze_mutant_trials(&mixed_results());

    assert!(text.contains("Overall mutation trial summary"));
    assert!(text.contains("Mutations by result status"));
    assert!(text.contains("SURVIVED"));
    assert!(text.contains("DETECTED"));
    assert!(text.contains("pkg/app.py: (l: 1, c: 4) - mutation from Add to Mult"));

    assert!(display.summary.contains("TOTAL RUNS: 6"));
    assert!(!display.survived.is_empty());
    assert!(!display.detected.is_empty());
}

#[test]
fn analysis_includes_mutation_diffs() {
    let (text, _) = report::analyze_mutant_trials(&mixed_results());
    assert!(text.contains("- x = a + b"));
    assert!(text.contains("+ x = a * b"));
}

#[test]
fn analysis_of_empty_results_has_only_totals() {
    let (text, display) = report::analyze_mutant_trials(&[]);
    assert!(text.contains("TOTAL RUNS: 0"));
    assert!(display.survived.is_empty());
    assert!(display.detected.is_empty());
}

// --- survivor tolerance ---

#[test]
fn surviving_count_includes_timeouts() {
    assert_eq!(report::surviving_count(&mixed_results()), 3);
    assert_eq!(report::surviving_count(&[trial(1, 1)]), 0);
}

// --- report file ---

#[test]
fn write_report_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let location = dir.path().join("reports").join("mutation.rst");

    report::write_report("contents", &location).unwrap();
    assert_eq!(std::fs::read_to_string(&location).unwrap(), "contents");
}

// --- json twin ---

#[test]
fn json_report_mirrors_counts() {
    let summary = ResultsSummary {
        results: mixed_results(),
        n_locs_mutated: 4,
        n_locs_identified: 9,
        total_runtime: Duration::from_millis(1500),
    };

    let json = report::json_report(&summary);
    assert_eq!(json.total_runs, 6);
    assert_eq!(json.survived, 2);
    assert_eq!(json.detected, 1);
    assert_eq!(json.errors, 1);
    assert_eq!(json.timeouts, 1);
    assert_eq!(json.unknowns, 1);
    assert_eq!(json.n_locs_mutated, 4);
    assert_eq!(json.n_locs_identified, 9);
    assert!((json.runtime_secs - 1.5).abs() < 0.001);

    let serialized = serde_json::to_string(&json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&serialized).unwrap();
    assert_eq!(value["trials"].as_array().unwrap().len(), 6);
    assert_eq!(value["trials"][0]["original"], "Add");
    assert_eq!(value["trials"][0]["mutation"], "Mult");
    assert_eq!(value["trials"][0]["status"], "Survived");
}
