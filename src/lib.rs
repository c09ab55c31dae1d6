//! pymut: mutation testing for Python test suites.
//!
//! The engine indexes mutable sites in parsed source trees, synthesizes
//! mutants as swapped bytecode-cache artifacts (the `.py` files on disk
//! are never touched), runs the external test command against each
//! mutant, and classifies whether the suite caught the defect.

pub mod cache;
pub mod coverage;
pub mod error;
pub mod filters;
pub mod genome;
pub mod indexer;
pub mod ops;
pub mod report;
pub mod run;

use std::fs;
use std::path::{Path, PathBuf};

pub use crate::error::{Error, Result};
pub use crate::genome::{Genome, GenomeGroup, GenomeGroupTarget, Mutant};
pub use crate::indexer::LocIndex;
pub use crate::ops::MutationOp;
pub use crate::run::{Config, MutantTrialResult, ResultsSummary, TrialStatus};

/// Recursively collect every `.py` file under a directory.
pub fn find_py_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_py_files(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_py_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            if entry.file_name() != "__pycache__" {
                collect_py_files(&path, files)?;
            }
        } else if file_type.is_file() && path.extension().is_some_and(|e| e == "py") {
            files.push(path);
        }
    }
    Ok(())
}

/// Test-file naming convention: `test_*` prefix or `*_test` suffix stem.
pub fn is_test_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.starts_with("test_") || stem.ends_with("_test"))
}
