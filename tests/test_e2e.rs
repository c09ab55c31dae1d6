use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

fn pymut_bin() -> &'static str {
    env!("CARGO_BIN_EXE_pymut")
}

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn write_project(dir: &Path) {
    fs::write(
        dir.join("single.py"),
        "def add_five(b):\n    return b + 5\n",
    )
    .unwrap();
}

// --- categories ---

#[test]
fn categories_lists_operator_groups() {
    let output = Command::new(pymut_bin())
        .arg("categories")
        .output()
        .expect("failed to run pymut");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[bn]"));
    assert!(stdout.contains("BinOp"));
    assert!(stdout.contains("[sr]"));
    assert!(stdout.contains("Slice_UPosToZero"));
}

// --- scan ---

#[test]
fn scan_lists_located_targets() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("app.py"), "x = a + b\ny = a > b\n").unwrap();

    let output = Command::new(pymut_bin())
        .args(["scan", &dir.path().to_string_lossy()])
        .output()
        .expect("failed to run pymut");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("app.py"));
    assert!(stdout.contains("Add"));
    assert!(stdout.contains("Gt"));
}

#[test]
fn scan_json_is_parseable() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("app.py"), "x = a + b\n").unwrap();

    let output = Command::new(pymut_bin())
        .args(["scan", &dir.path().to_string_lossy(), "--json"])
        .output()
        .expect("failed to run pymut");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let scanned: serde_json::Value = serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("invalid JSON: {e}\nstdout: {stdout}"));

    let targets = scanned[0]["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["op_type"], "Add");
    assert_eq!(targets[0]["ast_class"], "BinOp");
    assert_eq!(targets[0]["lineno"], 1);
}

#[test]
fn scan_respects_category_whitelist() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("app.py"), "x = a + b\ny = a > b\n").unwrap();

    let output = Command::new(pymut_bin())
        .args(["scan", &dir.path().to_string_lossy(), "-w", "cp", "--json"])
        .output()
        .expect("failed to run pymut");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let scanned: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    let targets = scanned[0]["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["op_type"], "Gt");
}

// --- run: configuration and baseline failures ---

#[test]
fn run_with_invalid_mode_exits_2() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let output = Command::new(pymut_bin())
        .args(["run", ".", "-t", "true", "-m", "bogus"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run pymut");
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn run_with_failing_baseline_exits_3() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let output = Command::new(pymut_bin())
        .args(["run", ".", "-t", "false"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run pymut");

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("baseline"), "stderr: {stderr}");
}

#[test]
fn run_with_missing_source_exits_2() {
    let dir = TempDir::new().unwrap();

    let output = Command::new(pymut_bin())
        .args(["run", "/nonexistent/source/dir", "-t", "true"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run pymut");
    assert_eq!(output.status.code(), Some(2));
}

// --- run: end to end against the interpreter ---

#[test]
fn run_json_report_end_to_end() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let output = Command::new(pymut_bin())
        .args([
            "run", ".", "-t", "true", "--json", "--seed", "42", "-m", "f",
        ])
        .current_dir(dir.path())
        .output()
        .expect("failed to run pymut");

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let report: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "invalid JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });

    assert_eq!(report["total_runs"], 6);
    assert_eq!(report["survived"], 6);
    assert_eq!(report["n_locs_identified"], 1);
    assert_eq!(report["n_locs_mutated"], 1);
}

#[test]
fn run_survivor_tolerance_exits_1() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let output = Command::new(pymut_bin())
        .args([
            "run", ".", "-t", "true", "-m", "f", "--seed", "3", "-x", "1",
        ])
        .current_dir(dir.path())
        .output()
        .expect("failed to run pymut");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn run_writes_text_report() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let output = Command::new(pymut_bin())
        .args([
            "run", ".", "-t", "true", "-m", "f", "--seed", "9", "-o", "mutation.rst",
        ])
        .current_dir(dir.path())
        .output()
        .expect("failed to run pymut");
    assert_eq!(output.status.code(), Some(0));

    let report = fs::read_to_string(dir.path().join("mutation.rst")).unwrap();
    assert!(report.contains("Overall mutation trial summary"));
    assert!(report.contains("SURVIVED"));
}

#[test]
fn run_leaves_sources_untouched() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = TempDir::new().unwrap();
    write_project(dir.path());
    let original = fs::read_to_string(dir.path().join("single.py")).unwrap();

    Command::new(pymut_bin())
        .args(["run", ".", "-t", "true", "-m", "f", "--seed", "5"])
        .current_dir(dir.path())
        .output()
        .expect("failed to run pymut");

    assert_eq!(
        fs::read_to_string(dir.path().join("single.py")).unwrap(),
        original,
        "sources are never mutated on disk"
    );
}
