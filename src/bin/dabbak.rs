//! # Dabbak CLI - incremental backups with day snapshots
//!
//! Command-line front end of the dabbak library.
//!
//! ## Usage
//! ```bash
//! # Mirror the configured sources and record today's changes
//! dabbak backup
//!
//! # Rebuild the sources as of a day into a new directory
//! dabbak restore /tmp/restore 2024-01-03
//!
//! # Only part of the sources
//! dabbak restore /tmp/restore 2024-01-03 /data/docs/reports
//!
//! # Export history into 4 GiB bundles
//! dabbak package /mnt/usb/export 4g --full
//!
//! # Rebuild the state after editing the mirror by hand
//! dabbak refresh-state
//!
//! # Show the effective configuration
//! dabbak config
//! ```
//!
//! The configuration file is taken from `--config`, then `DABBAK_CONFIG`,
//! then `backup-config.json` beside the executable.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use dabbak::utils::{absolute_normalized, format_bytes, parse_size};
use dabbak::{
    refresh_state, BackupEngine, Config, DabbakError, FileIssue, Packager, Restorer, SnapshotDay,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Dabbak - mirror directories and keep a snapshot of every day's changes
#[derive(Parser)]
#[command(name = "dabbak")]
#[command(version)]
#[command(about = "Incremental mirror backups with dated day snapshots")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Show a spinner while working
    #[arg(long, global = true)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the sources and update today's snapshot
    Backup,

    /// Rebuild the sources as of a day into a new directory
    Restore {
        /// Destination (must not exist)
        dest: PathBuf,

        /// Day to restore (YYYY-MM-DD, default today)
        #[arg(value_parser = parse_day)]
        timestamp: Option<SnapshotDay>,

        /// Only restore files beneath this source path
        source_path: Option<PathBuf>,
    },

    /// Export the history into size-capped bundles
    Package {
        /// Destination directory
        dest: PathBuf,

        /// Bundle size cap: N, Nk, Nm or Ng
        #[arg(value_parser = parse_max_size)]
        max_size: u64,

        /// Last day to include (YYYY-MM-DD, default today)
        #[arg(value_parser = parse_day)]
        timestamp: Option<SnapshotDay>,

        /// Package the whole history and record the cutoff
        #[arg(long)]
        full: bool,

        /// Allow an existing destination
        #[arg(long)]
        force: bool,
    },

    /// Rebuild the full state by reading the full mirror
    RefreshState,

    /// Print the effective configuration
    Config,
}

fn parse_day(s: &str) -> Result<SnapshotDay, String> {
    s.parse().map_err(|e: DabbakError| e.to_string())
}

fn parse_max_size(s: &str) -> Result<u64, String> {
    parse_size(s).map_err(|e| e.to_string())
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<DabbakError>() {
            Some(err) => err.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = Config::locate(cli.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    match cli.command {
        Commands::Backup => cmd_backup(&config, cli.progress),
        Commands::Restore {
            dest,
            timestamp,
            source_path,
        } => cmd_restore(&config, &dest, timestamp, source_path, cli.progress),
        Commands::Package {
            dest,
            max_size,
            timestamp,
            full,
            force,
        } => cmd_package(&config, &dest, max_size, timestamp, full, force, cli.progress),
        Commands::RefreshState => cmd_refresh(&config),
        Commands::Config => {
            println!("{}", config.to_pretty_json()?);
            Ok(())
        }
    }
}

/// Run one backup
///
/// Copies new and changed files into the full mirror and today's snapshot,
/// and removes deleted files from both.
fn cmd_backup(config: &Config, show_progress: bool) -> anyhow::Result<()> {
    let engine = BackupEngine::new(config);
    println!(
        "{} {}",
        "Backing up into day".blue().bold(),
        engine.day().to_string().yellow()
    );

    let progress = spinner(show_progress, "Scanning sources...");
    let report = engine.run()?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    println!("{} Backup complete", "✓".green().bold());
    println!("  New: {}", report.files_new.to_string().cyan());
    println!("  Changed: {}", report.files_changed.to_string().cyan());
    if report.files_carried > 0 {
        println!("  Kept from earlier today: {}", report.files_carried.to_string().cyan());
    }
    println!("  Unchanged: {}", report.files_unchanged.to_string().cyan());
    println!("  Deleted: {}", report.files_deleted.to_string().cyan());
    println!("  Copied: {}", format_bytes(report.bytes_copied).cyan());
    println!("  Time: {}", elapsed(report.duration_ms).cyan());
    print_issues(&report.issues);
    Ok(())
}

/// Restore the sources as of a day
fn cmd_restore(
    config: &Config,
    dest: &Path,
    timestamp: Option<SnapshotDay>,
    source_path: Option<PathBuf>,
    show_progress: bool,
) -> anyhow::Result<()> {
    let until = timestamp.unwrap_or_else(SnapshotDay::today);
    let mut restorer = Restorer::new(config);
    if let Some(source_path) = source_path {
        restorer = restorer.with_filter(absolute_normalized(&source_path)?);
    }

    println!(
        "{} {} {}",
        "Restoring state of".blue().bold(),
        until.to_string().yellow(),
        format!("into {}", dest.display()).dimmed()
    );

    let progress = spinner(show_progress, "Restoring files...");
    let result = restorer.restore(dest, until)?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    if let Some(anchor) = result.anchor {
        if anchor != until {
            println!("  Latest snapshot on or before that day: {}", anchor.to_string().yellow());
        }
    }
    println!("{} Restore complete", "✓".green().bold());
    println!("  Files restored: {}", result.files_restored.to_string().cyan());
    println!("  Written: {}", format_bytes(result.bytes_written).cyan());
    println!("  Time: {}", elapsed(result.duration_ms).cyan());
    print_issues(&result.issues);
    Ok(())
}

/// Export history into bundles
#[allow(clippy::too_many_arguments)]
fn cmd_package(
    config: &Config,
    dest: &Path,
    max_size: u64,
    timestamp: Option<SnapshotDay>,
    full: bool,
    force: bool,
    show_progress: bool,
) -> anyhow::Result<()> {
    let until = timestamp.unwrap_or_else(SnapshotDay::today);
    let heading = if full {
        "Packaging all history up to"
    } else {
        "Packaging changes up to"
    };
    println!(
        "{} {} {}",
        heading.blue().bold(),
        until.to_string().yellow(),
        format!("(bundles of at most {})", format_bytes(max_size)).dimmed()
    );

    let progress = spinner(show_progress, "Packaging files...");
    let result = Packager::new(config, max_size)
        .full(full)
        .force(force)
        .package(dest, until)?;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    println!("{} Packaging complete", "✓".green().bold());
    for bundle in &result.bundles {
        println!("  {}", bundle.display().to_string().cyan());
    }
    println!("  Files packaged: {}", result.files_packaged.to_string().cyan());
    if result.files_skipped_existing > 0 {
        println!(
            "  Already present: {}",
            result.files_skipped_existing.to_string().cyan()
        );
    }
    println!("  Total: {}", format_bytes(result.bytes_packaged).cyan());
    println!("  Time: {}", elapsed(result.duration_ms).cyan());
    if full {
        if result.cutoff_written {
            println!("  Cutoff recorded: {}", until.to_string().yellow());
        } else {
            println!("  {}", "Cutoff not recorded because of errors".yellow());
        }
    }
    print_issues(&result.issues);
    Ok(())
}

/// Rebuild the full state from the mirror
fn cmd_refresh(config: &Config) -> anyhow::Result<()> {
    let start = Instant::now();
    println!("{}", "Rebuilding state from the full mirror...".blue().bold());
    let result = refresh_state(config, SnapshotDay::today())?;

    println!("{} State rebuilt", "✓".green().bold());
    println!("  Files: {}", result.files.to_string().cyan());
    println!("  Time: {}", format_duration(round(start.elapsed())).to_string().cyan());
    print_issues(&result.issues);
    Ok(())
}

fn spinner(enabled: bool, message: &'static str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

fn print_issues(issues: &[FileIssue]) {
    if issues.is_empty() {
        return;
    }
    println!(
        "\n{} {} problem(s):",
        "⚠".yellow().bold(),
        issues.len().to_string().yellow()
    );
    for issue in issues {
        println!("  {}", issue.to_string().red());
    }
}

fn elapsed(ms: u64) -> String {
    format_duration(Duration::from_millis(ms)).to_string()
}

fn round(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
