//! Trial integration tests that exercise the real interpreter.
//!
//! Every test probes for `python3` first and skips when it is absent, so
//! the suite stays green on interpreter-less build hosts.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use pymut::cache::PythonRuntime;
use pymut::genome::GenomeGroup;
use pymut::indexer::LocIndex;
use pymut::ops::MutationOp;
use pymut::run::{self, Config, TrialStatus};
use pymut::Error;
use tempfile::TempDir;

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn cmds(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// `add_five` fixture: one arithmetic site with six substitutes.
fn write_project(dir: &Path) -> PathBuf {
    let src = dir.join("single.py");
    fs::write(&src, "def add_five(b):\n    return b + 5\n").unwrap();
    src
}

/// Test script that pins the function's behavior.
fn write_good_test(dir: &Path) -> PathBuf {
    let script = dir.join("check_single.py");
    fs::write(
        &script,
        "from single import add_five\n\nassert add_five(5) == 10\n",
    )
    .unwrap();
    script
}

/// Test script that asserts nothing useful.
fn write_vacuous_test(dir: &Path) -> PathBuf {
    let script = dir.join("check_nothing.py");
    fs::write(&script, "from single import add_five\n\nassert True\n").unwrap();
    script
}

fn add_target(group: &mut GenomeGroup, src: &Path) -> (PathBuf, LocIndex) {
    group.add_file(src);
    let target = group
        .targets()
        .unwrap()
        .into_iter()
        .find(|t| t.loc_idx.op_type == MutationOp::Add)
        .expect("fixture must contain one Add site");
    (target.source_path, target.loc_idx)
}

// --- interpreter probe and compile ---

#[test]
fn probe_reports_cache_scheme() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let runtime = PythonRuntime::probe(None).unwrap();
    assert!(!runtime.cache_tag.is_empty());
    assert!(runtime.cache_tag.contains('-'), "e.g. cpython-312");
}

#[test]
fn probe_of_missing_interpreter_fails() {
    let result = PythonRuntime::probe(Some(Path::new("pymut_no_such_python")));
    assert!(matches!(result, Err(Error::Interpreter(_))));
}

#[test]
fn compile_source_is_deterministic() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let runtime = PythonRuntime::probe(None).unwrap();
    let first = runtime.compile_source("x = 1 + 2\n", "mod.py").unwrap();
    let second = runtime.compile_source("x = 1 + 2\n", "mod.py").unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn compile_source_rejects_bad_syntax() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let runtime = PythonRuntime::probe(None).unwrap();
    let result = runtime.compile_source("def broken(:\n", "mod.py");
    assert!(matches!(result, Err(Error::Interpreter(_))));
}

// --- mutant synthesis ---

#[test]
fn mutate_synthesizes_inspectable_artifact() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let src = write_project(dir.path());

    let runtime = PythonRuntime::probe(None).unwrap();
    let mut group = GenomeGroup::new();
    let (path, target) = add_target(&mut group, &src);
    let genome = group.get_mut(&path).unwrap();

    let mutant = genome
        .mutate(&runtime, &target, MutationOp::Mult, false)
        .unwrap();

    assert!(mutant.mutant_source.contains("b * 5"));
    assert!(!mutant.mutant_code.is_empty());
    assert!(mutant.cfile.to_string_lossy().contains(&runtime.cache_tag));
    assert_eq!(mutant.mutation, MutationOp::Mult);
    assert!(mutant.source_size > 0);

    // construction is side-effect free
    assert!(!dir.path().join("__pycache__").exists());
    // the genome source on disk is untouched
    assert_eq!(
        fs::read_to_string(&src).unwrap(),
        "def add_five(b):\n    return b + 5\n"
    );
}

#[test]
fn repeated_synthesis_is_deterministic_and_order_independent() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let src = write_project(dir.path());

    let runtime = PythonRuntime::probe(None).unwrap();
    let mut group = GenomeGroup::new();
    let (path, target) = add_target(&mut group, &src);
    let genome = group.get_mut(&path).unwrap();

    let first = genome
        .mutate(&runtime, &target, MutationOp::Mult, false)
        .unwrap();
    // a different mutation in between must not disturb the cached tree
    let _ = genome
        .mutate(&runtime, &target, MutationOp::Sub, false)
        .unwrap();
    let again = genome
        .mutate(&runtime, &target, MutationOp::Mult, false)
        .unwrap();

    assert_eq!(first.mutant_source, again.mutant_source);
    assert_eq!(first.mutant_code, again.mutant_code);
}

// --- single trials through the cache swap ---

#[test]
fn defect_pinning_test_detects_the_mutant() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let src = write_project(dir.path());
    let script = write_good_test(dir.path());

    let runtime = PythonRuntime::probe(None).unwrap();
    let mut group = GenomeGroup::new();
    let (path, target) = add_target(&mut group, &src);
    let genome = group.get_mut(&path).unwrap();

    let test_cmds = cmds(&["python3", &script.to_string_lossy()]);
    let result = run::create_mutation_run_trial(
        genome,
        &runtime,
        &target,
        MutationOp::Mult,
        &test_cmds,
        &Config::default(),
    )
    .unwrap();

    assert_eq!(result.status(), TrialStatus::Detected, "25 != 10 must fail the suite");

    // the artifact is removed after the trial, success or not
    let cfile = runtime
        .cache_file_loc(&fs::canonicalize(&src).unwrap())
        .unwrap();
    assert!(!cfile.exists(), "mutant artifact must be cleaned up");
}

#[test]
fn unmutated_baseline_passes_the_pinning_test() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    write_project(dir.path());
    let script = write_good_test(dir.path());

    let elapsed = run::clean_trial(
        dir.path(),
        &cmds(&["python3", &script.to_string_lossy()]),
    )
    .unwrap();
    assert!(elapsed > Duration::ZERO);
}

#[test]
fn exit_code_two_records_error_status() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let src = write_project(dir.path());

    let runtime = PythonRuntime::probe(None).unwrap();
    let mut group = GenomeGroup::new();
    let (path, target) = add_target(&mut group, &src);
    let genome = group.get_mut(&path).unwrap();

    let result = run::create_mutation_run_trial(
        genome,
        &runtime,
        &target,
        MutationOp::Mult,
        &cmds(&["sh", "-c", "exit 2"]),
        &Config::default(),
    )
    .unwrap();
    assert_eq!(result.status(), TrialStatus::Error);
}

#[test]
fn timed_out_trial_recorded_and_artifact_removed() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let src = write_project(dir.path());

    let runtime = PythonRuntime::probe(None).unwrap();
    let mut group = GenomeGroup::new();
    let (path, target) = add_target(&mut group, &src);
    let genome = group.get_mut(&path).unwrap();

    let config = Config {
        max_runtime: Duration::from_millis(200),
        ..Config::default()
    };
    let result = run::create_mutation_run_trial(
        genome,
        &runtime,
        &target,
        MutationOp::Mult,
        &cmds(&["sleep", "30"]),
        &config,
    )
    .unwrap();

    assert_eq!(result.status(), TrialStatus::Timeout);

    let cfile = runtime
        .cache_file_loc(&fs::canonicalize(&src).unwrap())
        .unwrap();
    assert!(!cfile.exists(), "artifact must be removed even on timeout");
}

// --- per-site operation loops ---

#[test]
fn vacuous_test_survives_every_arithmetic_substitute() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let src = write_project(dir.path());
    let script = write_vacuous_test(dir.path());

    let runtime = PythonRuntime::probe(None).unwrap();
    let mut group = GenomeGroup::new();
    group.add_file(&src);
    let target = group
        .targets()
        .unwrap()
        .into_iter()
        .find(|t| t.loc_idx.op_type == MutationOp::Add)
        .unwrap();

    let config = Config::default(); // no break flags
    let mut rng = fastrand::Rng::with_seed(87);
    let results = run::mutation_sample_dispatch(
        &target,
        &mut group,
        &runtime,
        &cmds(&["python3", &script.to_string_lossy()]),
        &config,
        &mut rng,
        run::create_mutation_run_trial,
    )
    .unwrap();

    assert_eq!(results.len(), 6, "six substitutes for +");
    assert!(results.iter().all(|r| r.status() == TrialStatus::Survived));
}

#[test]
fn break_on_detected_halts_after_first_trial() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let src = write_project(dir.path());
    let script = write_good_test(dir.path());

    let runtime = PythonRuntime::probe(None).unwrap();
    let mut group = GenomeGroup::new();
    group.add_file(&src);
    let target = group
        .targets()
        .unwrap()
        .into_iter()
        .find(|t| t.loc_idx.op_type == MutationOp::Add)
        .unwrap();

    let config = Config {
        break_on_detected: true,
        break_on_survival: false,
        ..Config::default()
    };
    let mut rng = fastrand::Rng::with_seed(87);
    let results = run::mutation_sample_dispatch(
        &target,
        &mut group,
        &runtime,
        &cmds(&["python3", &script.to_string_lossy()]),
        &config,
        &mut rng,
        run::create_mutation_run_trial,
    )
    .unwrap();

    assert_eq!(results.len(), 1, "stop after the first DETECTED trial");
    assert_eq!(results[0].status(), TrialStatus::Detected);
}

// --- full runs ---

#[test]
fn sequential_run_caps_sample_and_summarizes() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    let src = write_project(dir.path());

    let config = Config {
        n_locations: 100, // far above the one available site
        random_seed: Some(42),
        ..Config::default()
    };
    let summary = run::run_mutation_trials(dir.path(), &cmds(&["true"]), &config).unwrap();

    assert_eq!(summary.n_locs_identified, 1);
    assert_eq!(summary.n_locs_mutated, 1);
    assert_eq!(summary.results.len(), 6);
    assert!(summary
        .results
        .iter()
        .all(|r| r.status() == TrialStatus::Survived));
    assert!(summary.total_runtime > Duration::ZERO);

    // the working tree is left pristine
    assert_eq!(
        fs::read_to_string(&src).unwrap(),
        "def add_five(b):\n    return b + 5\n"
    );
    let cache_dir = dir.path().join("__pycache__");
    if cache_dir.exists() {
        let leftover: Vec<_> = fs::read_dir(&cache_dir)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".pyc"))
            .collect();
        assert!(leftover.is_empty(), "no mutant artifacts may remain");
    }
}

#[test]
fn seeded_runs_draw_operations_in_the_same_order() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let config = Config {
        n_locations: 1,
        random_seed: Some(7),
        ..Config::default()
    };
    let first = run::run_mutation_trials(dir.path(), &cmds(&["true"]), &config).unwrap();
    let second = run::run_mutation_trials(dir.path(), &cmds(&["true"]), &config).unwrap();

    let ops = |summary: &run::ResultsSummary| -> Vec<MutationOp> {
        summary.results.iter().map(|r| r.mutant.mutation).collect()
    };
    assert_eq!(ops(&first), ops(&second));
}

#[test]
fn parallel_run_uses_private_caches_and_cleans_up() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    write_project(dir.path());
    fs::write(
        dir.path().join("flags.py"),
        "def flip(v):\n    return v > 0\n",
    )
    .unwrap();

    let config = Config {
        n_locations: 100,
        random_seed: Some(11),
        multi_processing: true,
        ..Config::default()
    };
    let summary = run::run_mutation_trials(dir.path(), &cmds(&["true"]), &config).unwrap();

    assert_eq!(summary.n_locs_identified, 2);
    assert_eq!(summary.n_locs_mutated, 2);
    assert!(!summary.results.is_empty());
    assert!(summary
        .results
        .iter()
        .all(|r| r.status() == TrialStatus::Survived));

    let parallel_root = std::env::current_dir().unwrap().join(run::PARALLEL_CACHE_DIR);
    assert!(
        !parallel_root.exists(),
        "private cache directories are discarded with the run"
    );
}
