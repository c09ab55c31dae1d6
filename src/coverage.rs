//! Consumption of externally supplied line coverage.
//!
//! Coverage is advisory input, produced by an external collector and read
//! here as a `coverage json` document: measured files map to their
//! executed lines and, when context recording was enabled, to the tests
//! that executed each line. Missing coverage is not an error, only a lost
//! optimization.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct RawCoverage {
    #[serde(default)]
    files: BTreeMap<String, RawFileCoverage>,
}

#[derive(Debug, Deserialize)]
struct RawFileCoverage {
    #[serde(default)]
    executed_lines: Vec<usize>,
    #[serde(default)]
    contexts: BTreeMap<String, Vec<String>>,
}

/// Per-file coverage: executed lines plus optional per-line test contexts.
#[derive(Debug, Clone, Default)]
pub struct FileCoverage {
    pub lines: BTreeSet<usize>,
    pub contexts: BTreeMap<usize, Vec<String>>,
}

/// Coverage for all measured files, keyed by resolved source path.
#[derive(Debug, Clone, Default)]
pub struct CoverageMap {
    files: BTreeMap<PathBuf, FileCoverage>,
}

impl CoverageMap {
    /// Load a `coverage json` document.
    pub fn load(coverage_file: &Path) -> Result<Self> {
        if !coverage_file.exists() {
            return Err(Error::CoverageMissing(coverage_file.to_path_buf()));
        }

        let raw = fs::read_to_string(coverage_file)?;
        let parsed: RawCoverage = serde_json::from_str(&raw)
            .map_err(|e| Error::Coverage(format!("{}: {e}", coverage_file.display())))?;

        let mut files = BTreeMap::new();
        for (measured, data) in parsed.files {
            let mut contexts = BTreeMap::new();
            for (line, tests) in data.contexts {
                if let Ok(line) = line.parse::<usize>() {
                    let tests: Vec<String> =
                        tests.into_iter().filter(|t| !t.is_empty()).collect();
                    if !tests.is_empty() {
                        contexts.insert(line, tests);
                    }
                }
            }
            files.insert(
                resolve(Path::new(&measured)),
                FileCoverage {
                    lines: data.executed_lines.into_iter().collect(),
                    contexts,
                },
            );
        }

        Ok(CoverageMap { files })
    }

    /// Executed lines for a measured source file, absent when the file
    /// was not measured.
    pub fn line_coverage(&self, src_file: &Path) -> Option<&BTreeSet<usize>> {
        self.files.get(&resolve(src_file)).map(|f| &f.lines)
    }

    /// Tests recorded as covering a specific line, empty when contexts
    /// were not collected.
    pub fn tests_covering_line(&self, src_file: &Path, line: usize) -> &[String] {
        self.files
            .get(&resolve(src_file))
            .and_then(|f| f.contexts.get(&line))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn measured_files(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
