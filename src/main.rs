//! chiprec CLI
//!
//! Command-line tool for identifying the chip a raw firmware dump targets.

use anyhow::{bail, Context};
use chiprec::formatter::{HumanFormatter, JsonFormatter, ReportFormatter, ShortFormatter};
use chiprec::{identify_file, ChipDatabase, DatabaseReader, IdentifyOptions};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Identify ARM Cortex-M chips from raw firmware images.
///
/// Recovers the peripheral addresses the firmware uses and ranks the
/// chips of a peripheral database by how many of them they explain.
#[derive(Parser, Debug)]
#[command(name = "chiprec")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Firmware file(s) to analyze
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Peripheral database (.json, or a SQLite file)
    #[arg(short, long, env = "CHIPREC_DATABASE")]
    database: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Load address of the image (hex)
    #[arg(short, long, default_value = "0x0", value_parser = parse_hex)]
    base_address: u32,

    /// Lowest address treated as MMIO (hex)
    #[arg(long, default_value = "0x40000000", value_parser = parse_hex)]
    threshold: u32,

    /// Addresses at or above this are ignored (hex)
    #[arg(long, value_parser = parse_hex)]
    ceiling: Option<u32>,

    /// Show at most this many candidates
    #[arg(short = 'n', long)]
    max_results: Option<usize>,

    /// Minimum score (0.0 - 1.0)
    #[arg(long, default_value = "0.0")]
    min_score: f64,

    /// List eliminated chips too
    #[arg(long)]
    include_eliminated: bool,

    /// Narrow the result with traced register accesses
    #[arg(short, long)]
    registers: bool,

    /// Skip 16-bit literal loads that may be the tail of a 32-bit instruction
    #[arg(long)]
    strict_boundaries: bool,

    /// Descend into directories given as inputs
    #[arg(short = 'R', long)]
    recursive: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (only output essential info)
    #[arg(short, long)]
    quiet: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
    /// Compact single-line output
    Short,
}

fn parse_hex(value: &str) -> Result<u32, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    let digits = digits.replace('_', "");
    u32::from_str_radix(&digits, 16).map_err(|e| format!("invalid hex address '{}': {}", value, e))
}

impl Args {
    fn options(&self) -> IdentifyOptions {
        IdentifyOptions {
            mmio_threshold: self.threshold,
            mmio_ceiling: self.ceiling,
            max_results: self.max_results,
            min_score: self.min_score,
            include_eliminated: self.include_eliminated,
            strict_boundaries: self.strict_boundaries,
            register_elimination: self.registers,
            ..IdentifyOptions::new()
        }
    }

    fn formatter(&self) -> Box<dyn ReportFormatter> {
        match self.format {
            OutputFormat::Human => Box::new(HumanFormatter {
                verbose: self.verbose,
                quiet: self.quiet,
            }),
            OutputFormat::Json => Box::new(JsonFormatter::new()),
            OutputFormat::Short => Box::new(ShortFormatter::new()),
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("chiprec=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let database = match open_database(&args.database) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = args.options();
    let formatter = args.formatter();
    let mut success = true;

    for path in collect_inputs(&args.files, args.recursive) {
        match analyze_file(&path, database.as_ref(), &options, args.base_address) {
            Ok(output) => print!("{}", formatter.format_report(&output, &path)),
            Err(e) => {
                if !args.quiet {
                    eprintln!("Error analyzing {}: {:#}", path.display(), e);
                }
                success = false;
            }
        }
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Open the database by extension: `.json` is loaded in memory, anything else is SQLite.
fn open_database(path: &Path) -> anyhow::Result<Box<dyn DatabaseReader>> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        let db = ChipDatabase::from_json_file(path)
            .with_context(|| format!("loading chip database {}", path.display()))?;
        debug!(chips = db.len(), "using JSON database");
        return Ok(Box::new(db));
    }
    open_sqlite(path)
}

#[cfg(feature = "sqlite")]
fn open_sqlite(path: &Path) -> anyhow::Result<Box<dyn DatabaseReader>> {
    let db = chiprec::database::sqlite::SqliteDatabase::open(path)
        .with_context(|| format!("opening chip database {}", path.display()))?;
    Ok(Box::new(db))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(path: &Path) -> anyhow::Result<Box<dyn DatabaseReader>> {
    bail!(
        "{} is not a JSON database and SQLite support is not compiled in",
        path.display()
    )
}

/// Expand directories into the files below them when `recursive` is set.
fn collect_inputs(paths: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if recursive && path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "skipping unreadable entry"),
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn analyze_file(
    path: &Path,
    database: &dyn DatabaseReader,
    options: &IdentifyOptions,
    base_address: u32,
) -> anyhow::Result<chiprec::Identification> {
    if path.is_dir() {
        bail!("is a directory (use --recursive)");
    }
    let report = identify_file(path, base_address, database, options)
        .with_context(|| format!("identification of {} failed", path.display()))?;
    Ok(report)
}
