use cei2tei::{PipelineError, Settings, compare, discovery, pipeline, validate};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

// Mimalloc keeps fragmentation down across many short-lived document trees.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CEI to TEI migration tools.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Settings file [default: settings.json]. Flags given on the command
    /// line take precedence.
    #[arg(short, long)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transform every document of the input tree.
    Transform(TransformArgs),
    /// List the XPath shapes used in a corpus.
    Discover(DiscoverArgs),
    /// Compare source documents with their transformed counterparts.
    Compare(CompareArgs),
    /// Validate a random sample of the corpus against a schema.
    Validate(ValidateArgs),
}

#[derive(Args, Debug)]
struct TransformArgs {
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    stylesheet: Option<PathBuf>,
    /// Failure report (CSV).
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    suffix: Option<String>,
}

#[derive(Args, Debug)]
struct DiscoverArgs {
    #[arg(long)]
    directory: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    suffix: Option<String>,
    /// Parser threads, 0 for one per CPU.
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long)]
    output: Option<PathBuf>,
    /// Write the JSON report here.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[arg(long)]
    directory: Option<PathBuf>,
    #[arg(long)]
    schema: Option<PathBuf>,
    #[arg(long)]
    sample_size: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

const DEFAULT_SETTINGS: &str = "settings.json";

/// Reads the settings file. A missing default file just means "flags only",
/// a missing file named with `--settings` is an error.
fn load_settings(cli: &Cli) -> Result<Settings, PipelineError> {
    match &cli.settings {
        Some(path) => Settings::load(path),
        None if Path::new(DEFAULT_SETTINGS).exists() => Settings::load(Path::new(DEFAULT_SETTINGS)),
        None => Ok(Settings::default()),
    }
}

fn apply_overrides(settings: &mut Settings, command: &Command) {
    match command {
        Command::Transform(args) => {
            settings.input_directory = args.input.clone().or(settings.input_directory.take());
            settings.output_directory = args.output.clone().or(settings.output_directory.take());
            settings.xslt_stylesheet = args.stylesheet.clone().or(settings.xslt_stylesheet.take());
            if let Some(report) = &args.report {
                settings.error_log = report.clone();
            }
            if let Some(workers) = args.workers {
                settings.workers = workers;
            }
            if let Some(suffix) = &args.suffix {
                settings.suffix = suffix.clone();
            }
        }
        Command::Discover(args) => {
            let section = &mut settings.discovery;
            section.directory = args.directory.clone().or(section.directory.take());
            section.output_directory = args.output.clone().or(section.output_directory.take());
            if let Some(suffix) = &args.suffix {
                section.suffix = suffix.clone();
            }
            if let Some(threads) = args.threads {
                section.threads = threads;
            }
        }
        Command::Compare(args) => {
            settings.input_directory = args.input.clone().or(settings.input_directory.take());
            settings.output_directory = args.output.clone().or(settings.output_directory.take());
            settings.comparison.report = args.report.clone().or(settings.comparison.report.take());
        }
        Command::Validate(args) => {
            let section = &mut settings.validation;
            section.directory = args.directory.clone().or(section.directory.take());
            section.schema = args.schema.clone().or(section.schema.take());
            if let Some(sample_size) = args.sample_size {
                section.sample_size = sample_size;
            }
            section.seed = args.seed.or(section.seed);
        }
    }
}

fn execute(cli: &Cli) -> Result<(), PipelineError> {
    let mut settings = load_settings(cli)?;
    apply_overrides(&mut settings, &cli.command);

    match &cli.command {
        Command::Transform(_) => {
            let summary = pipeline::run(&settings.batch_config()?)?;
            info!(
                "{} documents: {} converted, {} failed.",
                summary.dispatched, summary.succeeded, summary.failed
            );
            if let Some(report) = &summary.report {
                info!("Failures are listed in '{}'.", report.display());
            }
        }
        Command::Discover(_) => {
            discovery::discover(&settings.discovery_config()?)?;
        }
        Command::Compare(_) => {
            compare::compare_trees(&settings.comparison_config()?)?;
        }
        Command::Validate(_) => {
            let summary = validate::validate_corpus(&settings.validation_config()?)?;
            info!(
                "{} of {} sampled fragments are valid.",
                summary.valid,
                summary.results.len()
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match execute(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
