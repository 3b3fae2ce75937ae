//! Operator CLI for the entitlements storage migration.
//!
//! Loads a storage snapshot, runs the entitlements migration over every entry
//! and prints a stable `report:` summary. `check` is a dry run; `migrate`
//! writes the migrated snapshot back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use migrator::driver::{CancellationToken, run_migrations};
use migrator::exit_codes;
use migrator::io::config::{DEFAULT_CONFIG_FILE, MigratorConfig, load_config, write_config};
use migrator::io::snapshot::{StorageSnapshot, load_snapshot, write_snapshot};
use migrator::logging;
use migrator::migrations::{EntitlementsMigration, MigrationRegistry};
use migrator::report::{RunReport, render_summary, write_report};

#[derive(Parser)]
#[command(
    name = "migrator",
    version,
    about = "Migrate stored references to entitled references"
)]
struct Cli {
    /// Config file (defaults apply when missing).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file with default values.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Dry-run the migration over a snapshot and report what would change.
    Check(RunArgs),
    /// Migrate a snapshot and write the result back.
    Migrate {
        #[command(flatten)]
        run: RunArgs,
        /// Write the migrated snapshot here instead of over the input.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Storage snapshot (JSON).
    snapshot: PathBuf,
    /// Override the configured worker count.
    #[arg(long)]
    workers: Option<usize>,
    /// Write the run report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::InitConfig { force } => cmd_init_config(&cli.config, force),
        Command::Check(args) => cmd_run(&cli.config, &args, None, true),
        Command::Migrate { run, output } => {
            let output = output.unwrap_or_else(|| run.snapshot.clone());
            cmd_run(&cli.config, &run, Some(&output), false)
        }
    }
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &MigratorConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config_path: &Path, args: &RunArgs, output: Option<&Path>, check: bool) -> Result<i32> {
    let config = effective_config(config_path, args, check)?;
    let snapshot = load_snapshot(&args.snapshot)?;
    let (catalog, mut storage) = snapshot.into_parts()?;
    let registry = MigrationRegistry::new()
        .with(EntitlementsMigration::new(catalog.clone()))
        .context("build migration registry")?;
    info!(
        snapshot = %args.snapshot.display(),
        entries = storage.len(),
        dry_run = config.dry_run,
        "running migration"
    );

    let cancel = CancellationToken::new();
    let (report, aborted) = match run_migrations(&mut storage, &registry, &config, &cancel) {
        Ok(report) => (report, None),
        Err(aborted) => (*aborted.report, Some(aborted.error)),
    };
    drop(registry);

    emit_report(&report, args.report.as_deref())?;
    if let Some(output) = output
        && !config.dry_run
        && report.commits > 0
    {
        let migrated = StorageSnapshot::from_parts(catalog, storage)?;
        write_snapshot(output, &migrated)?;
        println!("wrote {}", output.display());
    }
    if let Some(error) = aborted {
        let error = anyhow::Error::new(error);
        eprintln!(
            "migration run aborted after {} entries: {:#}",
            report.entries_visited(),
            error
        );
        return Ok(exit_codes::INVALID);
    }
    Ok(exit_codes::for_report(&report))
}

fn effective_config(path: &Path, args: &RunArgs, check: bool) -> Result<MigratorConfig> {
    let mut config = load_config(path)?;
    if let Some(workers) = args.workers {
        config.workers = workers;
        config.batch_size = config.batch_size.max(workers);
    }
    if check {
        config.dry_run = true;
    }
    config
        .validate()
        .context("invalid command-line overrides")?;
    Ok(config)
}

fn emit_report(report: &RunReport, path: Option<&Path>) -> Result<()> {
    for line in render_summary(report) {
        println!("{line}");
    }
    if let Some(path) = path {
        write_report(path, report)?;
    }
    Ok(())
}
