//! pairscan - find archives and their preview images.
//!
//! Usage:
//!   pairscan scan [PATH]      Pair archives with previews and list them
//!   pairscan export [PATH]    Write the scan result as JSON
//!   pairscan --help           Show help

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use pairscan_core::{FilePair, MatchStrategy, ScanConfig, ScanResult};
use pairscan_scan::{
    BatchDispatcher, CompositeSink, GovernorConfig, MemoryMonitor, ProgressSink,
    ResourceGovernor, ScanOrchestrator, ScanRequest, SysinfoSampler, TracingSink,
};

#[derive(Parser)]
#[command(
    name = "pairscan",
    version,
    about = "Find archive files and pair them with their preview images",
    long_about = "pairscan walks a directory tree, pairs every archive with the preview \
                  image that best matches its name, and lists what stayed unpaired."
)]
struct Cli {
    /// JSON file overriding the scan configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Memory budget in MB; scans abort when it is exceeded
    #[arg(long, global = true, default_value = "2048")]
    memory_limit: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and print pairs and unpaired files
    Scan {
        #[command(flatten)]
        scan: ScanArgs,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export the scan result to JSON
    Export {
        #[command(flatten)]
        scan: ScanArgs,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Directory to scan
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Maximum depth to descend
    #[arg(short, long)]
    depth: Option<u32>,

    /// Matching strategy
    #[arg(short, long, default_value = "best")]
    strategy: StrategyArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    First,
    Best,
}

impl From<StrategyArg> for MatchStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::First => MatchStrategy::FirstMatch,
            StrategyArg::Best => MatchStrategy::BestMatch,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let governor = GovernorConfig::with_limit(cli.memory_limit);

    match cli.command {
        Command::Scan { scan, json } => run_scan(config, governor, &scan, json),
        Command::Export { scan, output } => run_export(config, governor, &scan, output),
    }
}

/// Read a scan config from JSON, or use the defaults.
fn load_config(path: Option<&Path>) -> Result<ScanConfig> {
    let Some(path) = path else {
        return Ok(ScanConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: ScanConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    config.validate().map_err(|message| eyre!(message))?;
    Ok(config)
}

/// Run one scan with terminal progress and memory protection.
///
/// A memory monitor samples on a tokio runtime for as long as the scan
/// runs; once its circuit opens the scan stops at the next check.
fn scan(config: ScanConfig, governor: &GovernorConfig, args: &ScanArgs) -> Result<ScanResult> {
    let runtime = tokio::runtime::Runtime::new()?;
    let monitor = MemoryMonitor::new(ResourceGovernor::new(governor.clone()), SysinfoSampler::new());
    let handle = monitor.handle();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = runtime.spawn(monitor.run(shutdown_rx));

    let orchestrator = ScanOrchestrator::new(config)?.with_governor(handle);
    let request = ScanRequest::builder()
        .directory(args.path.clone())
        .max_depth(args.depth)
        .strategy(MatchStrategy::from(args.strategy))
        .use_cache(false)
        .build()?;

    let terminal = |percent: u8, message: &str| {
        eprint!("\r\x1b[K{percent:>3}% {message}");
        if percent == 100 {
            eprintln!();
        }
    };
    let sink = CompositeSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(terminal));
    let sink: Arc<dyn ProgressSink> = Arc::new(sink);

    let result = orchestrator.scan(&request, &|| false, sink);

    let _ = shutdown_tx.send(true);
    runtime.block_on(monitor_task)?;

    if let Some(error) = &result.error {
        bail!("Scan of {} failed: {error}", args.path.display());
    }
    Ok(result)
}

fn run_scan(config: ScanConfig, governor: GovernorConfig, args: &ScanArgs, json: bool) -> Result<()> {
    let result = scan(config, &governor, args)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let root = result.directory.clone();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "{}", "─".repeat(60))?;
    writeln!(out, " {}", root.display())?;
    writeln!(
        out,
        " {} pairs, {} unpaired archives, {} unpaired previews",
        result.file_pairs.len(),
        result.unpaired_archives.len(),
        result.unpaired_previews.len()
    )?;
    writeln!(
        out,
        " {} directories in {:.2}s",
        result.stats.dirs_visited,
        result.stats.duration.as_secs_f64()
    )?;
    writeln!(out, "{}", "─".repeat(60))?;

    // Pairs go out in governor-sized batches, like a gallery would receive them.
    let mut dispatcher = BatchDispatcher::new(ResourceGovernor::new(governor), SysinfoSampler::new());
    let mut write_error = None;
    let summary = dispatcher.dispatch(result.file_pairs.clone(), &|| false, |batch: Vec<FilePair>| {
        for pair in batch {
            if let Err(err) = writeln!(
                out,
                "  {}  <->  {}",
                relative(&root, pair.archive_path()),
                relative(&root, pair.preview_path())
            ) {
                write_error.get_or_insert(err);
            }
        }
    })?;
    if let Some(err) = write_error {
        return Err(err.into());
    }
    tracing::debug!(batches = summary.batches, "Pairs written");

    print_list(&mut out, &root, "Unpaired archives", &result.unpaired_archives)?;
    print_list(&mut out, &root, "Unpaired previews", &result.unpaired_previews)?;

    if !result.warnings.is_empty() {
        writeln!(out)?;
        writeln!(out, "{} warning(s) during scan", result.warnings.len())?;
    }
    Ok(())
}

fn run_export(
    config: ScanConfig,
    governor: GovernorConfig,
    args: &ScanArgs,
    output: Option<PathBuf>,
) -> Result<()> {
    let result = scan(config, &governor, args)?;
    let json = serde_json::to_string_pretty(&result)?;

    match output {
        Some(output_path) => {
            std::fs::write(&output_path, json)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            eprintln!("Exported to {}", output_path.display());
        }
        None => {
            println!("{json}");
        }
    }

    Ok(())
}

fn print_list(out: &mut impl Write, root: &Path, title: &str, paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    writeln!(out)?;
    writeln!(out, " {title}:")?;
    for path in paths {
        writeln!(out, "  {}", relative(root, path))?;
    }
    Ok(())
}

/// Display a path relative to the scan root when possible.
fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
