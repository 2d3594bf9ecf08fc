use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use wikirevert::config::{DetectConfig, ExtractConfig, DETECT_BATCH_SIZE, EXTRACT_BATCH_SIZE};
use wikirevert::detect::{run_detect, run_detect_with_categories, DetectReport};
use wikirevert::extract::{run_extract, ExtractReport};
use wikirevert::inputs::CategoryMap;

/// Exit code when a run was stopped by Ctrl-C; its artifacts only cover part of the input.
const EXIT_INTERRUPTED: u8 = 130;
/// Exit code when some shards failed while the others completed.
const EXIT_PARTIAL: u8 = 3;

#[derive(Parser)]
#[command(name = "wikirevert")]
#[command(about = "Extract page histories from Wikimedia dumps and detect revert cycles")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv); RUST_LOG overrides it
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Worker threads (defaults to one per core)
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the revisions of all listed titles as one Parquet file per shard
    Extract(ExtractArgs),
    /// Classify vandalism and restoration edits in extracted revisions
    Detect(DetectArgs),
    /// Extract, then detect
    Run(RunArgs),
}

#[derive(Args)]
struct ExtractArgs {
    /// CSV with a `wikipedia_title` column
    #[arg(short, long)]
    titles: PathBuf,

    /// Directory for the `revisions_<N>.parquet` files and `matched_titles.txt`
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Rows per Parquet batch
    #[arg(long, default_value_t = EXTRACT_BATCH_SIZE)]
    batch_size: usize,

    /// Dump shards (.xml, .xml.gz, .xml.bz2 or .xml.zst)
    #[arg(required = true)]
    shards: Vec<PathBuf>,
}

#[derive(Args)]
struct DetectArgs {
    /// Directory holding the output of `extract`
    #[arg(short, long)]
    input_dir: PathBuf,

    /// CSV with `wikipedia_title` and `party_group` columns
    #[arg(short, long)]
    categories: PathBuf,

    /// Events file (defaults to `vandalism_events.parquet` in the input directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Rows per Parquet batch
    #[arg(long, default_value_t = DETECT_BATCH_SIZE)]
    batch_size: usize,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    extract: ExtractArgs,

    /// CSV with `wikipedia_title` and `party_group` columns
    #[arg(short, long)]
    categories: PathBuf,
}

/// Sets `stop` on the first Ctrl-C and exits right away on the second. The signal is awaited
/// on a helper thread so the workers only ever poll an atomic.
fn install_interrupt_handler(stop: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!(error = %err, "could not start signal runtime, Ctrl-C will not flush");
                    return;
                }
            };
            runtime.block_on(async {
                loop {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        warn!(error = %err, "signal handler failed");
                        return;
                    }
                    if stop.swap(true, Ordering::Relaxed) {
                        eprintln!("Second interrupt, exiting without flushing.");
                        std::process::exit(EXIT_INTERRUPTED.into());
                    }
                    warn!("interrupt received, finishing current pages (press Ctrl-C again to exit now)");
                }
            });
        });

    if let Err(err) = spawned {
        warn!(error = %err, "could not spawn signal thread");
    }
}

fn extract_config(args: ExtractArgs) -> ExtractConfig {
    let mut config = ExtractConfig::new(args.shards, args.titles, args.output_dir);
    config.batch_size = args.batch_size;
    config
}

fn print_extract_summary(report: &ExtractReport) {
    for shard in &report.shards {
        eprintln!(
            "{}: {:?}, {} pages scanned, {} matched, {} revisions, {} anomalies{}",
            shard.shard.display(),
            shard.status,
            shard.pages_scanned,
            shard.pages_matched,
            shard.revisions_written,
            shard.anomalies,
            shard
                .error
                .as_deref()
                .map(|err| format!(" ({err})"))
                .unwrap_or_default(),
        );
    }
    eprintln!(
        "{} shards, {} pages scanned, {} matched ({} unique titles), {} revisions written",
        report.shards.len(),
        report.pages_scanned(),
        report.pages_matched(),
        report.matched_titles.len(),
        report.revisions_written(),
    );
}

fn print_detect_summary(report: &DetectReport) {
    if report.interrupted {
        eprintln!("Detection interrupted after {} pages.", report.pages_processed);
    }
    eprintln!(
        "{} pages ({} skipped, {} with vandalism), {} groups, {} vandalism edits, {} restorations",
        report.pages_processed,
        report.pages_skipped,
        report.pages_with_vandalism,
        report.groups,
        report.vandalism_rows,
        report.restoration_rows,
    );
    if report.negative_latency_rows > 0 {
        eprintln!("{} rows with negative restoration time", report.negative_latency_rows);
    }
    if report.multi_shard_titles > 0 || report.duplicate_revisions_dropped > 0 {
        eprintln!(
            "{} titles split across shards, {} duplicate revisions dropped",
            report.multi_shard_titles, report.duplicate_revisions_dropped,
        );
    }
    match &report.output {
        Some(path) => eprintln!("Output: {}", path.display()),
        None => eprintln!("No vandalism detected."),
    }
}

enum Outcome {
    Complete,
    Interrupted,
    Partial(usize),
}

fn extract_outcome(report: &ExtractReport) -> Outcome {
    if report.interrupted() {
        Outcome::Interrupted
    } else {
        match report.failed().count() {
            0 => Outcome::Complete,
            failed => Outcome::Partial(failed),
        }
    }
}

fn detect_outcome(report: &DetectReport) -> Outcome {
    if report.interrupted {
        Outcome::Interrupted
    } else {
        Outcome::Complete
    }
}

fn run(command: Commands, stop: &AtomicBool) -> Result<Outcome, Box<dyn std::error::Error>> {
    match command {
        Commands::Extract(args) => {
            let report = run_extract(&extract_config(args), stop)?;
            print_extract_summary(&report);
            Ok(extract_outcome(&report))
        }
        Commands::Detect(args) => {
            let mut config = DetectConfig::new(args.input_dir, args.categories);
            config.batch_size = args.batch_size;
            if let Some(output) = args.output {
                config.output = output;
            }
            let report = run_detect(&config, stop)?;
            print_detect_summary(&report);
            Ok(detect_outcome(&report))
        }
        Commands::Run(args) => {
            let extract = extract_config(args.extract);
            let detect = DetectConfig::new(extract.output_dir.clone(), args.categories);
            // both input tables are checked before the first shard is opened
            let categories = CategoryMap::load(&detect.categories)?;

            let report = run_extract(&extract, stop)?;
            print_extract_summary(&report);
            let outcome = extract_outcome(&report);
            if matches!(outcome, Outcome::Interrupted) {
                return Ok(outcome);
            }

            let report = run_detect_with_categories(&detect, &categories, stop)?;
            print_detect_summary(&report);
            match detect_outcome(&report) {
                Outcome::Complete => Ok(outcome),
                interrupted => Ok(interrupted),
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        if let Err(err) = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
        {
            warn!(error = %err, "could not configure the thread pool");
        }
    }

    let stop = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(Arc::clone(&stop));

    match run(cli.command, &stop) {
        Ok(Outcome::Complete) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Ok(Outcome::Interrupted) => {
            eprintln!("Interrupted: results are partial, buffered rows were flushed.");
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Ok(Outcome::Partial(failed)) => {
            eprintln!("{failed} shard(s) failed: results are partial.");
            ExitCode::from(EXIT_PARTIAL)
        }
        Err(e) => {
            error!("Error: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
