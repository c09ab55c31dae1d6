use std::path::PathBuf;

use thiserror::Error;

use crate::ops::MutationOp;

/// Crate-wide error type.
///
/// Trial outcomes (survived/detected/error/timeout/unknown) are never
/// errors; only failures of the engine itself surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid run configuration: bad sample size, unknown category codes,
    /// unsupported cache invalidation environment. Fatal, no retry.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A single source file failed to parse. The file is skipped and the
    /// run continues with the remaining files.
    #[error("failed to parse {}: {detail}", .file.display())]
    Parse { file: PathBuf, detail: String },

    /// The requested mutation is not a valid substitute for the target
    /// site's category. Programmer error at the call site.
    #[error("{mutation} is not a member of the valid substitutes for category '{category}'")]
    MutationRejected { mutation: MutationOp, category: String },

    /// The location index is not among the genome's targets.
    #[error("unknown mutation target: {0}")]
    UnknownTarget(String),

    /// The test suite failed with zero mutations applied; mutant trials
    /// would be meaningless.
    #[error("baseline trial failed, mutant results would be meaningless: {0}")]
    Baseline(String),

    /// The coverage file does not exist. Callers may fall back to the
    /// unrestricted sample space.
    #[error("coverage file does not exist: {}", .0.display())]
    CoverageMissing(PathBuf),

    /// The coverage file exists but could not be understood.
    #[error("coverage data: {0}")]
    Coverage(String),

    /// Probing or invoking the host Python interpreter failed.
    #[error("python interpreter: {0}")]
    Interpreter(String),

    /// The bytecode cache path is unusable (symlink, irregular file).
    #[error("artifact cache: {0}")]
    Cache(String),

    /// The external test command could not be launched at all.
    #[error("test command: {0}")]
    Command(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
