//! Trial controller and concurrency dispatcher.
//!
//! Runs the mutation trials: draws a seeded sample of sites, iterates
//! substitute operations per site in random order without replacement,
//! swaps each mutant's compiled artifact into place, invokes the external
//! test command, and interprets the exit status. Sequential by default;
//! parallel mode fans whole sites out to a thread pool where every trial
//! gets a private cache directory.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{self, PythonRuntime};
use crate::error::{Error, Result};
use crate::genome::{self, Genome, GenomeGroup, GenomeGroupTarget};
use crate::indexer::LocIndex;
use crate::ops::{self, MutationOp};

/// Extra seconds granted to parallel trials for worker-pool dispatch
/// overhead.
pub const PARALLEL_TIMEOUT_BUFFER: Duration = Duration::from_secs(10);

/// Root directory for private per-mutant cache trees in parallel mode.
pub const PARALLEL_CACHE_DIR: &str = ".pymut_cache";

/// Run configuration for a full trial suite. Read-only during execution.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of sample locations to mutate.
    pub n_locations: usize,
    /// Files excluded from folder scans.
    pub exclude_files: Vec<PathBuf>,
    /// Category codes restricting the sample space; empty means all.
    pub filter_codes: Vec<String>,
    /// Seed for reproducible sampling and operation draws.
    pub random_seed: Option<u64>,
    pub break_on_survival: bool,
    pub break_on_detected: bool,
    pub break_on_error: bool,
    pub break_on_unknown: bool,
    pub break_on_timeout: bool,
    /// Skip coverage-based sample restriction even when coverage exists.
    pub ignore_coverage: bool,
    /// Coverage document consulted for the covered-target optimization.
    pub coverage_file: Option<PathBuf>,
    /// Per-trial ceiling on the test command's runtime.
    pub max_runtime: Duration,
    /// Dispatch sites across a worker pool instead of sequentially.
    pub multi_processing: bool,
    /// Let trial subprocesses write to the terminal instead of
    /// discarding their output.
    pub show_output: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            n_locations: 10,
            exclude_files: Vec::new(),
            filter_codes: Vec::new(),
            random_seed: None,
            break_on_survival: false,
            break_on_detected: false,
            break_on_error: false,
            break_on_unknown: false,
            break_on_timeout: false,
            ignore_coverage: false,
            coverage_file: None,
            max_runtime: Duration::from_secs(10),
            multi_processing: false,
            show_output: false,
        }
    }
}

/// Classified outcome of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrialStatus {
    Survived,
    Detected,
    Error,
    Timeout,
    Unknown,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TrialStatus::Survived => "SURVIVED",
            TrialStatus::Detected => "DETECTED",
            TrialStatus::Error => "ERROR",
            TrialStatus::Timeout => "TIMEOUT",
            TrialStatus::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Reduced mutant projection carried in results, cheap to clone and send
/// across worker channels.
#[derive(Debug, Clone, Serialize)]
pub struct MutantReport {
    pub src_file: PathBuf,
    pub src_idx: LocIndex,
    pub mutation: MutationOp,
    /// Source diff of the applied mutation.
    pub diff: String,
}

/// One trial's result: the mutant plus the raw exit status of the test
/// command, with the classified status derived on demand.
#[derive(Debug, Clone, Serialize)]
pub struct MutantTrialResult {
    pub mutant: MutantReport,
    pub return_code: i32,
}

impl MutantTrialResult {
    /// Exit-status classification: 0 passed despite the defect, 1 the
    /// suite caught it, 2 the run itself errored, 3 is the recorded
    /// timeout code, anything else is unknown.
    pub fn status(&self) -> TrialStatus {
        match self.return_code {
            0 => TrialStatus::Survived,
            1 => TrialStatus::Detected,
            2 => TrialStatus::Error,
            3 => TrialStatus::Timeout,
            _ => TrialStatus::Unknown,
        }
    }
}

/// Results of a full run.
#[derive(Debug)]
pub struct ResultsSummary {
    pub results: Vec<MutantTrialResult>,
    pub n_locs_mutated: usize,
    pub n_locs_identified: usize,
    pub total_runtime: Duration,
}

/// How one timed subprocess ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    Exited(i32),
    TimedOut,
}

/// Signature shared by the sequential and parallel-cache trial runners so
/// the dispatch loop is agnostic to the execution mode.
pub type TrialRunner = fn(
    &mut Genome,
    &PythonRuntime,
    &LocIndex,
    MutationOp,
    &[String],
    &Config,
) -> Result<MutantTrialResult>;

/// Run an argv-style command with an optional deadline. On timeout the
/// child is force-killed and reaped. Exit via signal maps to code -1.
pub fn run_cmd_timed(
    cmds: &[String],
    timeout: Option<Duration>,
    env: &[(String, String)],
    show_output: bool,
) -> Result<TrialOutcome> {
    let Some((program, args)) = cmds.split_first() else {
        return Err(Error::Configuration("empty test command".to_string()));
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    for (key, value) in env {
        cmd.env(key, value);
    }
    if !show_output {
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Command(format!("failed to run {program}: {e}")))?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Ok(TrialOutcome::Exited(status.code().unwrap_or(-1)));
            }
            Ok(None) => {
                if let Some(limit) = timeout {
                    if start.elapsed() > limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Ok(TrialOutcome::TimedOut);
                    }
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                return Err(Error::Command(format!("failed to wait on {program}: {e}")));
            }
        }
    }
}

/// Remove all cache files under the source location and run the test
/// suite with zero mutations applied. A failing baseline makes every
/// mutant result meaningless, so it is fatal.
pub fn clean_trial(src_loc: &Path, test_cmds: &[String]) -> Result<Duration> {
    cache::remove_existing_cache_files(src_loc);

    info!("running clean trial");
    let Some((program, args)) = test_cmds.split_first() else {
        return Err(Error::Configuration("empty test command".to_string()));
    };

    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::Baseline(format!("failed to run {program}: {e}")))?;
    let elapsed = start.elapsed();

    if !output.status.success() {
        return Err(Error::Baseline(format!(
            "clean trial does not pass.\n{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(elapsed)
}

/// Build the genome group for the source location with the config's
/// excludes and category filter applied.
pub fn get_genome_group(src_loc: &Path, config: &Config) -> Result<GenomeGroup> {
    let mut group = GenomeGroup::new();

    if src_loc.is_file() {
        group.add_file(src_loc);
    } else {
        group.add_folder(src_loc, &config.exclude_files, true)?;
    }

    if let Some(coverage_file) = &config.coverage_file {
        group.set_coverage(Some(coverage_file.clone()));
    }

    if !config.filter_codes.is_empty() {
        info!("category restriction, chosen categories: {:?}", {
            let mut sorted = config.filter_codes.clone();
            sorted.sort();
            sorted
        });
        group.set_filter(config.filter_codes.iter().cloned())?;
    }

    for (path, genome) in group.iter_mut() {
        match genome.targets() {
            Ok(targets) => {
                info!("{} mutation targets found in {}", targets.len(), path.display());
            }
            Err(Error::Parse { file, detail }) => {
                warn!("skipping {}: {}", file.display(), detail);
            }
            Err(e) => return Err(e),
        }
    }

    for excluded in &config.exclude_files {
        info!("{} excluded", excluded.display());
    }

    Ok(group)
}

/// The sample space: covered targets by default, all targets when
/// coverage is ignored or no coverage document exists. Sorted for
/// reproducible seeded sampling.
pub fn get_sample(group: &mut GenomeGroup, ignore_coverage: bool) -> Result<Vec<GenomeGroupTarget>> {
    let sample = if ignore_coverage {
        info!("ignoring coverage file for sample space creation");
        group.targets()?
    } else {
        match group.covered_targets() {
            Ok(covered) => covered,
            Err(Error::CoverageMissing(file)) => {
                info!(
                    "coverage file {} does not exist, sampling from all targets",
                    file.display()
                );
                group.targets()?
            }
            Err(e) => return Err(e),
        }
    };

    let mut sample: Vec<GenomeGroupTarget> = sample.into_iter().collect();
    sample.sort_by(|a, b| {
        (
            &a.source_path,
            a.loc_idx.lineno,
            a.loc_idx.col_offset,
            a.loc_idx.end_lineno,
            a.loc_idx.end_col_offset,
            a.loc_idx.op_type,
        )
            .cmp(&(
                &b.source_path,
                b.loc_idx.lineno,
                b.loc_idx.col_offset,
                b.loc_idx.end_lineno,
                b.loc_idx.end_col_offset,
                b.loc_idx.op_type,
            ))
    });
    Ok(sample)
}

/// Draw `n_locations` sites from the sample space without replacement.
///
/// A request at or above the space size uses the whole sample, reported
/// rather than failed; a request for zero locations is a configuration
/// error.
pub fn get_mutation_sample_locations(
    sample_space: &[GenomeGroupTarget],
    n_locations: usize,
    rng: &mut fastrand::Rng,
) -> Result<Vec<GenomeGroupTarget>> {
    if n_locations == 0 {
        return Err(Error::Configuration(
            "n_locations must be greater than zero".to_string(),
        ));
    }

    if n_locations <= sample_space.len() {
        info!(
            "selecting {} locations from {} potentials",
            n_locations,
            sample_space.len()
        );
        Ok(rng
            .choose_multiple(sample_space.iter(), n_locations)
            .into_iter()
            .cloned()
            .collect())
    } else {
        info!(
            "{} exceeds sample space, using full sample: {}",
            n_locations,
            sample_space.len()
        );
        Ok(sample_space.to_vec())
    }
}

/// Break-on policy: log the trial result and report whether the site's
/// operation loop should stop early.
pub fn trial_output_check_break(
    trial_result: &MutantTrialResult,
    config: &Config,
    sample_src: &Path,
    sample_idx: &LocIndex,
) -> bool {
    let switches = [
        (TrialStatus::Survived, config.break_on_survival, "survival"),
        (TrialStatus::Detected, config.break_on_detected, "detected"),
        (TrialStatus::Error, config.break_on_error, "error"),
        (TrialStatus::Timeout, config.break_on_timeout, "timeout"),
        (TrialStatus::Unknown, config.break_on_unknown, "unknown"),
    ];

    for (status, break_flag, desc) in switches {
        if trial_result.status() != status {
            continue;
        }
        info!(
            "result: {} at {}: ({}, {})",
            status,
            sample_src.display(),
            sample_idx.lineno,
            sample_idx.col_offset
        );
        if break_flag {
            info!("break on {desc}: stopping further mutations at location");
            return true;
        }
    }

    false
}

fn report_for(genome: &mut Genome, mutant: &genome::Mutant) -> MutantReport {
    let diff = genome
        .source_text()
        .map(|original| genome::mutation_diff(&original, &mutant.mutant_source))
        .unwrap_or_default();
    MutantReport {
        src_file: mutant.src_file.clone(),
        src_idx: mutant.src_idx.clone(),
        mutation: mutant.mutation,
        diff,
    }
}

/// One trial in shared-cache mode: swap the artifact into `__pycache__`,
/// run the test command, then remove it (always, timeouts included).
pub fn create_mutation_run_trial(
    genome: &mut Genome,
    runtime: &PythonRuntime,
    target_idx: &LocIndex,
    mutation: MutationOp,
    test_cmds: &[String],
    config: &Config,
) -> Result<MutantTrialResult> {
    debug!("running trial for {mutation}");

    let mutant = genome.mutate(runtime, target_idx, mutation, true)?;

    let outcome = run_cmd_timed(test_cmds, Some(config.max_runtime), &[], config.show_output);
    cache::remove_existing_cache_files(&mutant.src_file);
    let outcome = outcome?;

    let return_code = match outcome {
        TrialOutcome::Exited(code) => code,
        TrialOutcome::TimedOut => 3,
    };

    Ok(MutantTrialResult {
        mutant: report_for(genome, &mutant),
        return_code,
    })
}

/// One trial in parallel mode: the artifact goes into a fresh private
/// cache directory and the subprocess is pointed at it through the
/// `PYTHONPYCACHEPREFIX` environment override, so concurrent workers
/// never race on the shared cache location.
pub fn create_mutation_run_parallelcache_trial(
    genome: &mut Genome,
    runtime: &PythonRuntime,
    target_idx: &LocIndex,
    mutation: MutationOp,
    test_cmds: &[String],
    config: &Config,
) -> Result<MutantTrialResult> {
    cache::check_cache_invalidation_mode()?;

    let mutant = genome.mutate(runtime, target_idx, mutation, false)?;

    let parallel_cache = std::env::current_dir()?
        .join(PARALLEL_CACHE_DIR)
        .join(format!("{:016x}", fastrand::u64(..)));
    mutant.write_cache_under(&parallel_cache, &runtime.cache_tag)?;

    let env = [(
        "PYTHONPYCACHEPREFIX".to_string(),
        parallel_cache.to_string_lossy().to_string(),
    )];
    let outcome = run_cmd_timed(
        test_cmds,
        Some(config.max_runtime + PARALLEL_TIMEOUT_BUFFER),
        &env,
        config.show_output,
    );

    debug!("removing parallel cache dir: {}", parallel_cache.display());
    if let Err(e) = std::fs::remove_dir_all(&parallel_cache) {
        warn!("could not remove {}: {e}", parallel_cache.display());
    }
    let outcome = outcome?;

    let return_code = match outcome {
        TrialOutcome::Exited(code) => code,
        TrialOutcome::TimedOut => 3,
    };

    Ok(MutantTrialResult {
        mutant: report_for(genome, &mutant),
        return_code,
    })
}

/// Run the full operation loop for one sampled site: substitutes are
/// drawn at random without replacement and trialed one at a time until
/// the set is exhausted or a break-on condition fires.
pub fn mutation_sample_dispatch(
    target: &GenomeGroupTarget,
    group: &mut GenomeGroup,
    runtime: &PythonRuntime,
    test_cmds: &[String],
    config: &Config,
    rng: &mut fastrand::Rng,
    trial_runner: TrialRunner,
) -> Result<Vec<MutantTrialResult>> {
    info!(
        "current target location: {}, ({}, {}) {}",
        target.source_path.display(),
        target.loc_idx.lineno,
        target.loc_idx.col_offset,
        target.loc_idx.op_type
    );

    let mut operations: Vec<MutationOp> =
        ops::substitutes_for(target.loc_idx.op_type).into_iter().collect();
    debug!("mutation operations: {operations:?}");

    let genome = group.get_mut(&target.source_path).ok_or_else(|| {
        Error::UnknownTarget(format!(
            "{} is not in the genome group",
            target.source_path.display()
        ))
    })?;

    let mut results = Vec::new();
    while !operations.is_empty() {
        let current = operations.swap_remove(rng.usize(..operations.len()));

        let trial_result =
            trial_runner(genome, runtime, &target.loc_idx, current, test_cmds, config)?;
        let stop =
            trial_output_check_break(&trial_result, config, &target.source_path, &target.loc_idx);
        results.push(trial_result);
        if stop {
            break;
        }
    }

    Ok(results)
}

/// Main entry point for running the mutation trials.
///
/// Builds the genome group, draws the seeded sample, and executes the
/// trials sequentially or across the worker pool. Baseline (clean) trials
/// are the caller's concern.
pub fn run_mutation_trials(
    src_loc: &Path,
    test_cmds: &[String],
    config: &Config,
) -> Result<ResultsSummary> {
    let start = Instant::now();

    let runtime = PythonRuntime::probe(None)?;
    let mut group = get_genome_group(src_loc, config)?;

    info!("setting random seed to: {:?}", config.random_seed);
    let mut rng = match config.random_seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };

    let sample_space = get_sample(&mut group, config.ignore_coverage)?;
    info!("total sample space size: {}", sample_space.len());
    let mutation_sample =
        get_mutation_sample_locations(&sample_space, config.n_locations, &mut rng)?;

    let results = if config.multi_processing {
        run_parallel_trials(src_loc, &mutation_sample, &runtime, test_cmds, config)?
    } else {
        info!("running serial (single worker) dispatch mode");
        let mut results = Vec::new();
        for target in &mutation_sample {
            results.extend(mutation_sample_dispatch(
                target,
                &mut group,
                &runtime,
                test_cmds,
                config,
                &mut rng,
                create_mutation_run_trial,
            )?);
        }
        results
    };

    let parallel_root = std::env::current_dir()?.join(PARALLEL_CACHE_DIR);
    if parallel_root.exists() {
        // per-trial subdirectories are removed as trials finish, so this
        // only succeeds once the tree is empty
        info!("cleaning up parallel cache dir {}", parallel_root.display());
        if let Err(e) = std::fs::remove_dir(&parallel_root) {
            info!("{} is not empty and cannot be removed: {e}", parallel_root.display());
        }
    }

    Ok(ResultsSummary {
        results,
        n_locs_mutated: mutation_sample.len(),
        n_locs_identified: sample_space.len(),
        total_runtime: start.elapsed(),
    })
}

/// Fan sampled sites out to a fixed-size worker pool.
///
/// Configuration flows to workers by reference and results flow back by
/// value over channels; each worker owns a private genome group, so no
/// parse state is shared. Result order across sites is unspecified.
fn run_parallel_trials(
    src_loc: &Path,
    mutation_sample: &[GenomeGroupTarget],
    runtime: &PythonRuntime,
    test_cmds: &[String],
    config: &Config,
) -> Result<Vec<MutantTrialResult>> {
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(mutation_sample.len().max(1));
    info!("running parallel dispatch mode, workers: {workers}");

    let (job_tx, job_rx) = mpsc::channel::<GenomeGroupTarget>();
    for target in mutation_sample {
        let _ = job_tx.send(target.clone());
    }
    drop(job_tx);
    let jobs = Arc::new(Mutex::new(job_rx));

    let (result_tx, result_rx) = mpsc::channel::<Result<Vec<MutantTrialResult>>>();

    thread::scope(|scope| {
        for worker_id in 0..workers {
            let jobs = Arc::clone(&jobs);
            let result_tx = result_tx.clone();
            let runtime = runtime.clone();

            scope.spawn(move || {
                let mut group = match get_genome_group(src_loc, config) {
                    Ok(group) => group,
                    Err(e) => {
                        let _ = result_tx.send(Err(e));
                        return;
                    }
                };
                let mut rng = match config.random_seed {
                    Some(seed) => fastrand::Rng::with_seed(seed.wrapping_add(worker_id as u64)),
                    None => fastrand::Rng::new(),
                };

                loop {
                    let job = match jobs.lock() {
                        Ok(rx) => rx.recv(),
                        Err(_) => break,
                    };
                    let Ok(target) = job else { break };

                    let outcome = mutation_sample_dispatch(
                        &target,
                        &mut group,
                        &runtime,
                        test_cmds,
                        config,
                        &mut rng,
                        create_mutation_run_parallelcache_trial,
                    );
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
    });

    let mut results = Vec::new();
    let mut first_error = None;
    for outcome in result_rx {
        match outcome {
            Ok(mut site_results) => results.append(&mut site_results),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}
