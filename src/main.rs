use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use console::Style;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use pymut::error::Error;
use pymut::run::{self, Config};
use pymut::{cache, ops, report};

#[derive(Parser)]
#[command(name = "pymut", version, about = "Python mutation testing via bytecode-cache swapping")]
struct Cli {
    /// Turn on DEBUG level diagnostic output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run mutation trials against a source location
    Run {
        /// Source file or package directory to mutate
        #[arg(default_value = ".")]
        src: PathBuf,
        /// Test command to run against each mutant
        #[arg(short, long, default_value = "pytest")]
        testcmds: String,
        /// Number of locations to sample for mutation
        #[arg(short, long, default_value_t = 10)]
        nlocations: usize,
        /// Running mode: f full, s break-on-survival, d break-on-detected,
        /// sd both
        #[arg(short, long, default_value = "s")]
        mode: String,
        /// Random seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,
        /// Files to exclude from the folder scan (repeatable)
        #[arg(short, long)]
        exclude: Vec<PathBuf>,
        /// Category codes to allow (repeatable, see `pymut categories`)
        #[arg(short, long)]
        whitelist: Vec<String>,
        /// Category codes to deny (repeatable)
        #[arg(short, long)]
        blacklist: Vec<String>,
        /// Skip the coverage-based sample restriction
        #[arg(long)]
        ignore_coverage: bool,
        /// Coverage JSON document to restrict the sample space
        #[arg(long)]
        coverage_file: Option<PathBuf>,
        /// Max seconds a single trial may run before being killed
        #[arg(long, default_value_t = 10.0)]
        timeout: f64,
        /// Dispatch sites across a worker pool
        #[arg(long)]
        parallel: bool,
        /// Write the text report to this location
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Print the JSON report to stdout instead of the text summary
        #[arg(long)]
        json: bool,
        /// Exit non-zero when surviving mutants reach this count
        #[arg(short = 'x', long)]
        exception: Option<usize>,
    },
    /// List the mutation targets found in a source location
    Scan {
        /// Source file or package directory to scan
        #[arg(default_value = ".")]
        src: PathBuf,
        /// Category codes to allow (repeatable)
        #[arg(short, long)]
        whitelist: Vec<String>,
        /// Category codes to deny (repeatable)
        #[arg(short, long)]
        blacklist: Vec<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the supported mutation categories and operations
    Categories,
}

fn main() {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Commands::Run {
            src,
            testcmds,
            nlocations,
            mode,
            seed,
            exclude,
            whitelist,
            blacklist,
            ignore_coverage,
            coverage_file,
            timeout,
            parallel,
            output,
            json,
            exception,
        } => cmd_run(RunArgs {
            src,
            testcmds,
            nlocations,
            mode,
            seed,
            exclude,
            whitelist,
            blacklist,
            ignore_coverage,
            coverage_file,
            timeout,
            parallel,
            output,
            json,
            exception,
            show_output: cli.debug,
        }),
        Commands::Scan {
            src,
            whitelist,
            blacklist,
            json,
        } => cmd_scan(src, whitelist, blacklist, json),
        Commands::Categories => cmd_categories(),
    };

    process::exit(exit_code);
}

struct RunArgs {
    src: PathBuf,
    testcmds: String,
    nlocations: usize,
    mode: String,
    seed: Option<u64>,
    exclude: Vec<PathBuf>,
    whitelist: Vec<String>,
    blacklist: Vec<String>,
    ignore_coverage: bool,
    coverage_file: Option<PathBuf>,
    timeout: f64,
    parallel: bool,
    output: Option<PathBuf>,
    json: bool,
    exception: Option<usize>,
    show_output: bool,
}

/// Translation of the `-m` running mode into break-on flag combinations.
struct RunMode {
    mode: String,
}

impl RunMode {
    fn new(mode: &str) -> Result<Self, Error> {
        if !["f", "s", "d", "sd"].contains(&mode) {
            return Err(Error::Configuration(format!(
                "invalid mode '{mode}', choose one of: f, s, d, sd"
            )));
        }
        Ok(RunMode {
            mode: mode.to_string(),
        })
    }

    fn break_on_survival(&self) -> bool {
        matches!(self.mode.as_str(), "s" | "sd")
    }

    fn break_on_detection(&self) -> bool {
        matches!(self.mode.as_str(), "d" | "sd")
    }
}

/// Combine whitelist and blacklist codes into the effective allow set.
/// An empty result means no category restriction.
fn selected_categories(whitelist: &[String], blacklist: &[String]) -> Vec<String> {
    let base: Vec<String> = if whitelist.is_empty() {
        if blacklist.is_empty() {
            return Vec::new();
        }
        ops::valid_codes().into_iter().map(String::from).collect()
    } else {
        whitelist.to_vec()
    };

    base.into_iter()
        .filter(|code| !blacklist.contains(code))
        .collect()
}

fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Configuration(_) | Error::MutationRejected { .. } | Error::UnknownTarget(_) => 2,
        _ => 3,
    }
}

fn cmd_run(args: RunArgs) -> i32 {
    let run_mode = match RunMode::new(&args.mode) {
        Ok(m) => m,
        Err(e) => {
            print_error(&e.to_string());
            return 2;
        }
    };

    if let Err(e) = cache::check_cache_invalidation_mode() {
        print_error(&e.to_string());
        return 2;
    }

    let test_cmds: Vec<String> = args.testcmds.split_whitespace().map(String::from).collect();

    let config = Config {
        n_locations: args.nlocations,
        exclude_files: args.exclude,
        filter_codes: selected_categories(&args.whitelist, &args.blacklist),
        random_seed: args.seed,
        break_on_survival: run_mode.break_on_survival(),
        break_on_detected: run_mode.break_on_detection(),
        break_on_error: false,
        break_on_unknown: false,
        break_on_timeout: false,
        ignore_coverage: args.ignore_coverage,
        coverage_file: args.coverage_file,
        max_runtime: std::time::Duration::from_secs_f64(args.timeout.max(0.0)),
        multi_processing: args.parallel,
        show_output: args.show_output,
    };

    // Baseline: the suite must pass unmutated or every result is noise
    if let Err(e) = run::clean_trial(&args.src, &test_cmds) {
        print_error(&e.to_string());
        return exit_code_for(&e);
    }

    let summary = match run::run_mutation_trials(&args.src, &test_cmds, &config) {
        Ok(summary) => summary,
        Err(e) => {
            print_error(&e.to_string());
            return exit_code_for(&e);
        }
    };

    // Trailing clean trial restores a pristine cache for the working tree
    if let Err(e) = run::clean_trial(&args.src, &test_cmds) {
        print_error(&e.to_string());
        return exit_code_for(&e);
    }

    let (text_report, display) = report::analyze_mutant_trials(&summary.results);

    if args.json {
        match serde_json::to_string(&report::json_report(&summary)) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                print_error(&format!("could not serialize report: {e}"));
                return 3;
            }
        }
    } else {
        println!("{}", display.summary);
        println!(
            " - Locations mutated / identified: {} / {}",
            summary.n_locs_mutated, summary.n_locs_identified
        );
        println!(
            " - Total runtime: {:.2}s",
            summary.total_runtime.as_secs_f64()
        );
        if !display.survived.is_empty() {
            println!("{}", display.survived);
        }
        if !display.detected.is_empty() {
            println!("{}", display.detected);
        }
    }

    if let Some(location) = &args.output {
        if let Err(e) = report::write_report(&text_report, location) {
            print_error(&e.to_string());
            return 3;
        }
    }

    if let Some(tolerance) = args.exception {
        let surviving = report::surviving_count(&summary.results);
        if tolerance > 0 && surviving >= tolerance {
            print_error(&format!(
                "surviving mutation count {surviving} is at or above the tolerance {tolerance}"
            ));
            return 1;
        }
    }

    0
}

fn cmd_scan(src: PathBuf, whitelist: Vec<String>, blacklist: Vec<String>, json: bool) -> i32 {
    let config = Config {
        filter_codes: selected_categories(&whitelist, &blacklist),
        ..Config::default()
    };

    let mut group = match run::get_genome_group(&src, &config) {
        Ok(group) => group,
        Err(e) => {
            print_error(&e.to_string());
            return exit_code_for(&e);
        }
    };

    #[derive(serde::Serialize)]
    struct ScannedFile {
        src_file: PathBuf,
        targets: Vec<pymut::LocIndex>,
    }

    let mut scanned = Vec::new();
    for (path, genome) in group.iter_mut() {
        let targets = match genome.targets() {
            Ok(targets) => targets,
            Err(Error::Parse { .. }) => continue,
            Err(e) => {
                print_error(&e.to_string());
                return exit_code_for(&e);
            }
        };
        scanned.push(ScannedFile {
            src_file: path.clone(),
            targets: targets.into_iter().collect(),
        });
    }

    if json {
        match serde_json::to_string(&scanned) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                print_error(&format!("could not serialize scan: {e}"));
                return 3;
            }
        }
        return 0;
    }

    let file_style = Style::new().cyan().bold();
    let dim = Style::new().dim();
    for file in &scanned {
        println!(
            "{} {}",
            file_style.apply_to(file.src_file.display()),
            dim.apply_to(format!("({} targets)", file.targets.len())),
        );
        for target in &file.targets {
            println!(
                "  (l: {}, c: {}) {} {}",
                target.lineno,
                target.col_offset,
                target.op_type,
                dim.apply_to(format!("[{}]", target.ast_class)),
            );
        }
    }

    0
}

fn cmd_categories() -> i32 {
    let code_style = Style::new().cyan().bold();
    println!("Mutation categories and operations:\n");
    for group in ops::OP_GROUPS {
        println!(
            "  {} {} - {}",
            code_style.apply_to(format!("[{}]", group.category)),
            group.name,
            group.desc,
        );
        let operations: Vec<String> = group.operations.iter().map(|op| op.to_string()).collect();
        println!("       operations: {}", operations.join(", "));
    }
    0
}
