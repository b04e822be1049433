//! Confluence CLI — scan a universe, analyze one symbol, print configuration.
//!
//! Commands:
//! - `scan`: run scan cycles over the configured universe, printing each trade
//!   signal as one JSON line on stdout
//! - `analyze`: score one symbol across its timeframes and print the analysis
//! - `config`: print the default configuration, or validate a file
//!
//! Logs go to stderr. `RUST_LOG` overrides the level; `--verbose` raises it to debug.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use confluence_core::domain::Timeframe;
use confluence_runner::{
    analyze_symbol, export_snapshot, BarHistory, CsvBarHistory, JsonLinesSink, RunnerConfig,
    Scanner, SyntheticBarHistory,
};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "confluence",
    about = "Confluence — multi-timeframe confluence scoring and trigger scanner"
)]
struct Cli {
    /// Debug-level logging.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// Path to a runner TOML config. Defaults are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of `<SYMBOL>_<tf>.csv` bar files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Use deterministic synthetic bars instead of files.
    #[arg(long, default_value_t = false)]
    synthetic: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the universe periodically and emit trade signals as JSON lines.
    Scan {
        #[command(flatten)]
        source: Source,

        /// Symbols to scan; overrides `scanner.universe`.
        symbols: Vec<String>,

        /// Run a single cycle and exit.
        #[arg(long, default_value_t = false)]
        once: bool,

        /// Write the watchlist snapshot here on exit.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Score one symbol across the configured timeframes.
    Analyze {
        #[command(flatten)]
        source: Source,

        symbol: String,
    },
    /// Print the default configuration as TOML, or validate a config file.
    Config {
        /// Validate this file instead of printing defaults.
        #[arg(long)]
        check: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Scan {
            source,
            symbols,
            once,
            snapshot,
        } => run_scan(&source, symbols, once, snapshot.as_deref()),
        Commands::Analyze { source, symbol } => run_analyze(&source, &symbol),
        Commands::Config { check } => run_config(check.as_deref()),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RunnerConfig> {
    match path {
        Some(path) => RunnerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(RunnerConfig::default()),
    }
}

fn build_history(source: &Source, config: &RunnerConfig) -> Result<Arc<dyn BarHistory>> {
    match (&source.data_dir, source.synthetic) {
        (Some(_), true) => bail!("--data-dir and --synthetic are mutually exclusive"),
        (None, false) => bail!("one of --data-dir or --synthetic is required"),
        (Some(dir), false) => {
            if !dir.is_dir() {
                bail!("data directory does not exist: {}", dir.display());
            }
            Ok(Arc::new(CsvBarHistory::new(dir)))
        }
        (None, true) => Ok(Arc::new(SyntheticBarHistory::new(synthetic_anchor(config)))),
    }
}

/// Far enough back that every configured timeframe has a full fetch of history.
fn synthetic_anchor(config: &RunnerConfig) -> DateTime<Utc> {
    let widest = config
        .engine
        .confluence
        .timeframes()
        .last()
        .copied()
        .unwrap_or(Timeframe::D1);
    let span = widest.duration() * (config.scanner.history_bars as i32 + 10);
    let now = Utc::now();
    let anchor = now - span;
    // Align to the widest interval so every timeframe's bars start on a boundary.
    let secs = widest.duration().num_seconds().max(1);
    DateTime::from_timestamp(anchor.timestamp() - anchor.timestamp().rem_euclid(secs), 0)
        .unwrap_or(anchor)
}

fn run_scan(
    source: &Source,
    symbols: Vec<String>,
    once: bool,
    snapshot: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(source.config.as_deref())?;
    if !symbols.is_empty() {
        config.scanner.universe = symbols;
    }
    if config.scanner.universe.is_empty() {
        bail!("nothing to scan: pass symbols or set scanner.universe");
    }
    config.validate()?;

    let history = build_history(source, &config)?;
    info!(
        source = history.name(),
        symbols = config.scanner.universe.len(),
        fingerprint = %config.engine.fingerprint().short(),
        "starting scanner"
    );
    let scanner = Scanner::new(config, history)?;
    let sink = JsonLinesSink::new(std::io::stdout());

    if once {
        scanner.run_cycle_at(Utc::now(), &sink)?;
    } else {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .context("installing Ctrl-C handler")?;
        scanner.run_loop(&sink, &shutdown, Utc::now)?;
    }

    if let Some(path) = snapshot {
        let snap = scanner.watchlist().snapshot(Utc::now())?;
        export_snapshot(&snap, path)?;
        info!(path = %path.display(), entries = snap.entries.len(), "watchlist snapshot written");
    }
    Ok(())
}

fn run_analyze(source: &Source, symbol: &str) -> Result<()> {
    let config = load_config(source.config.as_deref())?;
    let history = build_history(source, &config)?;
    let analysis = analyze_symbol(
        history.as_ref(),
        &config.engine,
        symbol,
        config.scanner.history_bars,
    )?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn run_config(check: Option<&Path>) -> Result<()> {
    match check {
        Some(path) => {
            let config = RunnerConfig::load(path)?;
            println!(
                "{} is valid (fingerprint {})",
                path.display(),
                config.engine.fingerprint()
            );
        }
        None => print!("{}", RunnerConfig::default().to_toml_string()?),
    }
    Ok(())
}
