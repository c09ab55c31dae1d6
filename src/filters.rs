//! Filters over sets of location indices.
//!
//! Two filters restrict the mutation targets a genome reports: the
//! category-code filter keeps only sites whose operation belongs to an
//! allowed operator group, and the coverage filter keeps only sites on
//! lines an external coverage run actually executed. Both are pure over
//! their inputs.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::coverage::CoverageMap;
use crate::error::{Error, Result};
use crate::indexer::LocIndex;
use crate::ops::{self, MutationOp};

/// Filter location indices by two-letter mutation category code.
#[derive(Debug, Clone, Default)]
pub struct CategoryCodeFilter {
    codes: BTreeSet<String>,
}

impl CategoryCodeFilter {
    /// Build a filter from category codes. Unknown codes are a
    /// configuration error, surfaced immediately.
    pub fn new<I, S>(codes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let codes: BTreeSet<String> = codes.into_iter().map(Into::into).collect();
        let invalid: Vec<&String> = codes.iter().filter(|c| !ops::is_valid_code(c)).collect();
        if !invalid.is_empty() {
            return Err(Error::Configuration(format!(
                "invalid category codes: {invalid:?}, valid codes: {:?}",
                ops::valid_codes()
            )));
        }
        Ok(CategoryCodeFilter { codes })
    }

    pub fn codes(&self) -> &BTreeSet<String> {
        &self.codes
    }

    /// All operations belonging to the filter's categories.
    pub fn valid_mutations(&self) -> BTreeSet<MutationOp> {
        ops::OP_GROUPS
            .iter()
            .filter(|g| self.codes.contains(g.category))
            .flat_map(|g| g.operations.iter().copied())
            .collect()
    }

    /// Keep only indices whose operation is in an allowed category. An
    /// empty code set filters nothing.
    pub fn filter(&self, loc_idxs: &BTreeSet<LocIndex>) -> BTreeSet<LocIndex> {
        if self.codes.is_empty() {
            return loc_idxs.clone();
        }
        let valid = self.valid_mutations();
        loc_idxs
            .iter()
            .filter(|l| valid.contains(&l.op_type))
            .cloned()
            .collect()
    }
}

/// Filter location indices down to covered lines.
///
/// The coverage document holds many measured files, so the source file is
/// an argument of `filter` while the document is read once and cached.
#[derive(Debug, Clone)]
pub struct CoverageFilter {
    coverage_file: PathBuf,
    data: Option<CoverageMap>,
}

impl CoverageFilter {
    pub fn new(coverage_file: impl Into<PathBuf>) -> Self {
        CoverageFilter {
            coverage_file: coverage_file.into(),
            data: None,
        }
    }

    pub fn coverage_file(&self) -> &Path {
        &self.coverage_file
    }

    /// The parsed coverage document, loaded lazily.
    ///
    /// Fails with [`Error::CoverageMissing`] when the file does not
    /// exist; callers fall back to the unfiltered target set.
    pub fn data(&mut self) -> Result<&CoverageMap> {
        if self.data.is_none() {
            self.data = Some(CoverageMap::load(&self.coverage_file)?);
        }
        match &self.data {
            Some(map) => Ok(map),
            None => Err(Error::CoverageMissing(self.coverage_file.clone())),
        }
    }

    /// Keep only indices whose line is covered in `source_file`. A
    /// measured file with no recorded lines, or an unmeasured file,
    /// yields an empty set.
    pub fn filter(
        &mut self,
        loc_idxs: &BTreeSet<LocIndex>,
        source_file: &Path,
    ) -> Result<BTreeSet<LocIndex>> {
        let data = self.data()?;
        let covered = data.line_coverage(source_file).cloned().unwrap_or_default();
        Ok(loc_idxs
            .iter()
            .filter(|l| covered.contains(&l.lineno))
            .cloned()
            .collect())
    }
}
