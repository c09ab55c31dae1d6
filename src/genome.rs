//! Source units ("genomes"), their groups, and mutant synthesis.
//!
//! A [`Genome`] wraps one Python source file with lazily computed state:
//! the parse tree and the set of mutable sites. Changing the source path
//! invalidates both; changing the coverage file invalidates only the
//! covered-site cache. A [`GenomeGroup`] manages a keyed collection of
//! genomes with bulk filter and coverage assignment.
//!
//! Mutants are synthesized from a genome at one [`LocIndex`]. The cached
//! tree is read-only during synthesis; the mutation is a fresh spliced
//! source string, so the genome stays pristine and repeated synthesis is
//! order-independent.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use tree_sitter::Tree;

use crate::cache::{self, PythonRuntime};
use crate::error::{Error, Result};
use crate::filters::{CategoryCodeFilter, CoverageFilter};
use crate::indexer::{self, LocIndex, MutateVisitor};
use crate::ops::{self, MutationOp};

/// Default coverage document consulted for covered-target optimization.
pub const DEFAULT_COVERAGE_FILE: &str = "coverage.json";

/// One synthesized mutant: a compiled substitute for a source file with
/// exactly one site altered.
///
/// Immutable once built. Construction has no filesystem side effect;
/// [`Mutant::write_cache`] is the explicit step that swaps the artifact
/// into the interpreter's cache.
#[derive(Debug, Clone)]
pub struct Mutant {
    /// Marshalled code object of the mutated module.
    pub mutant_code: Vec<u8>,
    /// Mutated source text, kept for inspection and diff rendering.
    pub mutant_source: String,
    /// Resolved path of the pristine source file.
    pub src_file: PathBuf,
    /// Cache location the import system derives for `src_file`.
    pub cfile: PathBuf,
    /// Interpreter magic number stamped into the artifact header.
    pub magic: [u8; 4],
    /// Source stat snapshot the header must echo for the artifact to be
    /// accepted as up to date.
    pub source_mtime: u32,
    pub source_size: u32,
    /// File mode applied to the written artifact.
    pub mode: u32,
    /// The mutated site.
    pub src_idx: LocIndex,
    /// The operation substituted in.
    pub mutation: MutationOp,
}

impl Mutant {
    /// Write the artifact into the shared `__pycache__`, replacing any
    /// stale entries for the source file.
    pub fn write_cache(&self) -> Result<()> {
        cache::check_cache_invalidation_mode()?;
        let bytecode =
            cache::timestamp_pyc(self.magic, self.source_mtime, self.source_size, &self.mutant_code);
        cache::remove_existing_cache_files(&self.src_file);
        cache::create_cache_dirs(&self.cfile)?;
        debug!("writing mutant cache file: {}", self.cfile.display());
        cache::write_atomic(&self.cfile, &bytecode, self.mode)
    }

    /// Write the artifact under a private cache root laid out for a
    /// `PYTHONPYCACHEPREFIX` override, returning the written path.
    pub fn write_cache_under(&self, cache_root: &Path, cache_tag: &str) -> Result<PathBuf> {
        let cfile = cache::prefixed_cache_file(cache_root, &self.src_file, cache_tag)?;
        let bytecode =
            cache::timestamp_pyc(self.magic, self.source_mtime, self.source_size, &self.mutant_code);
        cache::create_cache_dirs(&cfile)?;
        debug!("writing parallel mutant cache file: {}", cfile.display());
        cache::write_atomic(&cfile, &bytecode, self.mode)?;
        Ok(cfile)
    }
}

/// Unified diff of a mutation, deletions and insertions only.
pub fn mutation_diff(original: &str, mutated: &str) -> String {
    use similar::{ChangeTag, TextDiff};
    let diff = TextDiff::from_lines(original, mutated);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => out.push_str(&format!("- {change}")),
            ChangeTag::Insert => out.push_str(&format!("+ {change}")),
            ChangeTag::Equal => {}
        }
    }
    out
}

/// One Python source file and its lazily derived state.
pub struct Genome {
    source_file: PathBuf,
    coverage_file: Option<PathBuf>,
    filter_codes: BTreeSet<String>,
    // lazy caches, cleared by the setters above them
    source: Option<String>,
    tree: Option<Tree>,
    targets: Option<BTreeSet<LocIndex>>,
    covered: Option<BTreeSet<LocIndex>>,
}

impl Genome {
    /// Create a genome for a source file with the default coverage file.
    pub fn new(source_file: impl Into<PathBuf>) -> Self {
        Genome {
            source_file: source_file.into(),
            coverage_file: Some(PathBuf::from(DEFAULT_COVERAGE_FILE)),
            filter_codes: BTreeSet::new(),
            source: None,
            tree: None,
            targets: None,
            covered: None,
        }
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Point the genome at a different source file, invalidating the
    /// parse tree and target caches.
    pub fn set_source_file(&mut self, source_file: impl Into<PathBuf>) {
        self.source_file = source_file.into();
        self.source = None;
        self.tree = None;
        self.targets = None;
        self.covered = None;
    }

    pub fn coverage_file(&self) -> Option<&Path> {
        self.coverage_file.as_deref()
    }

    /// Set or clear the coverage file, invalidating the covered-target
    /// cache.
    pub fn set_coverage_file(&mut self, coverage_file: Option<PathBuf>) {
        self.coverage_file = coverage_file;
        self.covered = None;
    }

    pub fn filter_codes(&self) -> &BTreeSet<String> {
        &self.filter_codes
    }

    /// Replace the category-code filter. Codes are validated eagerly;
    /// filtering itself applies on every target access so it is never
    /// stale.
    pub fn set_filter_codes<I, S>(&mut self, codes: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filter = CategoryCodeFilter::new(codes)?;
        self.filter_codes = filter.codes().clone();
        Ok(())
    }

    fn ensure_parsed(&mut self) -> Result<()> {
        if self.tree.is_none() || self.source.is_none() {
            let source = fs::read_to_string(&self.source_file)?;
            let tree = indexer::parse(&source, &self.source_file)?;
            self.source = Some(source);
            self.tree = Some(tree);
            self.targets = None;
        }
        Ok(())
    }

    fn parsed(&mut self) -> Result<(&str, &Tree)> {
        self.ensure_parsed()?;
        match (&self.source, &self.tree) {
            (Some(source), Some(tree)) => Ok((source.as_str(), tree)),
            _ => Err(Error::Parse {
                file: self.source_file.clone(),
                detail: "parse cache unavailable".to_string(),
            }),
        }
    }

    /// The source text, read and cached on first access.
    pub fn source_text(&mut self) -> Result<String> {
        let (source, _) = self.parsed()?;
        Ok(source.to_string())
    }

    /// All mutable sites in the file, scanned once and cached, with the
    /// category filter applied on the way out.
    pub fn targets(&mut self) -> Result<BTreeSet<LocIndex>> {
        if self.targets.is_none() {
            let (source, tree) = self.parsed()?;
            let locs = MutateVisitor::scan(source, tree);
            debug!(
                "{}: {} mutation targets located",
                self.source_file.display(),
                locs.len()
            );
            self.targets = Some(locs);
        }
        let filter = CategoryCodeFilter::new(self.filter_codes.iter().cloned())?;
        Ok(filter.filter(self.targets.as_ref().unwrap_or(&BTreeSet::new())))
    }

    /// Targets on lines the coverage document marks as executed, cached
    /// until the coverage file changes.
    ///
    /// Fails with [`Error::CoverageMissing`] when no coverage document
    /// exists; callers treat that as "use all targets".
    pub fn covered_targets(&mut self) -> Result<BTreeSet<LocIndex>> {
        let Some(coverage_file) = self.coverage_file.clone() else {
            return Err(Error::Configuration(
                "coverage file is not set on the genome".to_string(),
            ));
        };

        if self.covered.is_none() {
            let unfiltered = {
                // coverage restriction applies to the unfiltered scan so the
                // cache stays valid across filter changes
                let saved = std::mem::take(&mut self.filter_codes);
                let all = self.targets();
                self.filter_codes = saved;
                all?
            };
            let mut filter = CoverageFilter::new(&coverage_file);
            let source_file = self.resolved_source_file();
            self.covered = Some(filter.filter(&unfiltered, &source_file)?);
        }

        let filter = CategoryCodeFilter::new(self.filter_codes.iter().cloned())?;
        Ok(filter.filter(self.covered.as_ref().unwrap_or(&BTreeSet::new())))
    }

    fn resolved_source_file(&self) -> PathBuf {
        fs::canonicalize(&self.source_file).unwrap_or_else(|_| self.source_file.clone())
    }

    /// Synthesize a mutant at `target_idx` with `mutation` substituted.
    ///
    /// Rejects operations outside the target's valid substitute set and
    /// targets that are not in this genome. The cached tree is never
    /// modified. With `write_cache` the artifact is also swapped into the
    /// interpreter cache before returning.
    pub fn mutate(
        &mut self,
        runtime: &PythonRuntime,
        target_idx: &LocIndex,
        mutation: MutationOp,
        write_cache: bool,
    ) -> Result<Mutant> {
        let substitutes = ops::substitutes_for(target_idx.op_type);
        if !substitutes.contains(&mutation) {
            let category = ops::category_code(target_idx.ast_class)
                .unwrap_or("??")
                .to_string();
            return Err(Error::MutationRejected { mutation, category });
        }

        if !self.targets()?.contains(target_idx) {
            return Err(Error::UnknownTarget(format!(
                "{}: ({}, {}) {} is not in the genome targets",
                self.source_file.display(),
                target_idx.lineno,
                target_idx.col_offset,
                target_idx.op_type
            )));
        }

        let src_display = self.source_file.display().to_string();
        let (source, tree) = self.parsed()?;
        let edit = MutateVisitor::apply(source, tree, target_idx, mutation).ok_or_else(|| {
            Error::UnknownTarget(format!(
                "{src_display}: ({}, {}) produced no rewrite for {}",
                target_idx.lineno, target_idx.col_offset, mutation
            ))
        })?;
        let mutant_source = indexer::apply_edit(source, &edit);

        let src_file = self.resolved_source_file();
        let mutant_code =
            runtime.compile_source(&mutant_source, &src_file.to_string_lossy())?;
        let cfile = runtime.cache_file_loc(&src_file)?;
        let (source_mtime, source_size, mode) = cache::source_stats(&src_file)?;

        let mutant = Mutant {
            mutant_code,
            mutant_source,
            src_file,
            cfile,
            magic: runtime.magic,
            source_mtime,
            source_size,
            mode,
            src_idx: target_idx.clone(),
            mutation,
        };

        if write_cache {
            mutant.write_cache()?;
        }

        Ok(mutant)
    }
}

/// A (source path, location index) pair from a group's combined targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenomeGroupTarget {
    pub source_path: PathBuf,
    pub loc_idx: LocIndex,
}

/// An ordered collection of genomes keyed by source path.
#[derive(Default)]
pub struct GenomeGroup {
    store: BTreeMap<PathBuf, Genome>,
}

impl GenomeGroup {
    pub fn new() -> Self {
        GenomeGroup::default()
    }

    /// Build a group from a single file or, recursively, a folder.
    pub fn from_source_location(source_location: &Path) -> Result<Self> {
        let mut group = GenomeGroup::new();
        if source_location.is_dir() {
            group.add_folder(source_location, &[], true)?;
        } else if source_location.is_file() {
            group.add_file(source_location);
        } else {
            return Err(Error::Configuration(format!(
                "{} is not a folder or file",
                source_location.display()
            )));
        }
        Ok(group)
    }

    pub fn add_genome(&mut self, genome: Genome) {
        self.store.insert(genome.source_file().to_path_buf(), genome);
    }

    pub fn add_file(&mut self, source_file: &Path) {
        self.add_genome(Genome::new(source_file));
    }

    /// Add every `.py` file under a folder, skipping excluded files and,
    /// by default, test files (`test_*` / `*_test` stems).
    pub fn add_folder(
        &mut self,
        source_folder: &Path,
        exclude_files: &[PathBuf],
        ignore_test_files: bool,
    ) -> Result<()> {
        if !source_folder.is_dir() {
            return Err(Error::Configuration(format!(
                "{} is not a directory",
                source_folder.display()
            )));
        }

        let excluded: BTreeSet<PathBuf> = exclude_files
            .iter()
            .map(|e| fs::canonicalize(e).unwrap_or_else(|_| e.clone()))
            .collect();

        for file in crate::find_py_files(source_folder)? {
            if ignore_test_files && crate::is_test_file(&file) {
                continue;
            }
            let resolved = fs::canonicalize(&file).unwrap_or_else(|_| file.clone());
            if excluded.contains(&resolved) {
                continue;
            }
            self.add_file(&file);
        }
        Ok(())
    }

    /// Set the category filter on every genome in the group.
    pub fn set_filter<I, S>(&mut self, filter_codes: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String> + Clone,
    {
        let codes: Vec<String> = filter_codes.into_iter().map(Into::into).collect();
        for genome in self.store.values_mut() {
            genome.set_filter_codes(codes.iter().cloned())?;
        }
        Ok(())
    }

    /// Set a common coverage file on every genome in the group.
    pub fn set_coverage(&mut self, coverage_file: Option<PathBuf>) {
        for genome in self.store.values_mut() {
            genome.set_coverage_file(coverage_file.clone());
        }
    }

    pub fn get_mut(&mut self, source_path: &Path) -> Option<&mut Genome> {
        self.store.get_mut(source_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &Genome)> {
        self.store.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PathBuf, &mut Genome)> {
        self.store.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &PathBuf> {
        self.store.keys()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// All targets across the group as (path, index) pairs. Files that
    /// fail to parse are skipped with a diagnostic.
    pub fn targets(&mut self) -> Result<BTreeSet<GenomeGroupTarget>> {
        self.combined(Genome::targets)
    }

    /// All covered targets across the group. A missing coverage file on
    /// any genome fails the whole call so callers can fall back.
    pub fn covered_targets(&mut self) -> Result<BTreeSet<GenomeGroupTarget>> {
        self.combined(Genome::covered_targets)
    }

    fn combined(
        &mut self,
        per_genome: fn(&mut Genome) -> Result<BTreeSet<LocIndex>>,
    ) -> Result<BTreeSet<GenomeGroupTarget>> {
        let mut out = BTreeSet::new();
        for (path, genome) in self.store.iter_mut() {
            let locs = match per_genome(genome) {
                Ok(locs) => locs,
                Err(Error::Parse { file, detail }) => {
                    tracing::warn!("skipping {}: {}", file.display(), detail);
                    continue;
                }
                Err(e) => return Err(e),
            };
            out.extend(locs.into_iter().map(|loc_idx| GenomeGroupTarget {
                source_path: path.clone(),
                loc_idx,
            }));
        }
        Ok(out)
    }
}
