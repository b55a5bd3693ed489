//! # Cairn Inspect
//!
//! A standalone CLI for looking at the witnessed container registry of a
//! single volume.
//!
//! Every command mounts the volume through the `LifecycleManager`, so the
//! registry is reconciled against the container directory before anything is
//! printed. Run it only against a volume no datanode currently holds.
//!
//! ```text
//! <volume>/container.db                          registry store
//! <volume>/containers/<id>/metadata/<id>.container
//! <volume>/tmp/deleted-containers/<id>/          quarantine
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;
use wcr_core::{ContainerCreateInfo, ContainerId, CreationState};
use wcr_kv::RedbEngine;
use wcr_registry::{
    FsContainerDirectory, LifecycleManager, ReconcileReport, RegistryConfig, RegistryError,
};

type Manager = LifecycleManager<RedbEngine, FsContainerDirectory>;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "cairn-inspect")]
#[command(about = "Inspect and repair a volume's witnessed container registry")]
#[command(version)]
struct Cli {
    /// Volume root directory
    #[arg(long)]
    volume: PathBuf,

    /// Registry configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print records as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered container
    List,
    /// Show the record of one container
    Get {
        /// Container id, with or without a leading '#'
        id: ContainerId,
    },
    /// Mount the volume and report what reconciliation repaired
    Reconcile,
    /// Reclaim unused space in the registry store
    Compact,
    /// List container structures sitting in quarantine
    Quarantined,
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn state_label(state: CreationState) -> ColoredString {
    match state {
        CreationState::PendingCreate => state.to_string().yellow(),
        CreationState::Created => state.to_string().bright_green(),
        CreationState::Recovering => state.to_string().bright_magenta(),
    }
}

fn record_line(id: ContainerId, info: &ContainerCreateInfo) -> String {
    let replica = info
        .replica_index
        .map(|idx| format!("  replica={}", idx))
        .unwrap_or_default();
    format!(
        "{:>12}  {:<16} {:<10} created_at={}{}",
        id.to_string().bright_white(),
        state_label(info.state),
        info.replication.to_string(),
        info.created_at,
        replica
    )
}

fn show_report(report: &ReconcileReport) {
    let path: Vec<String> = report.states.iter().map(|s| s.to_string()).collect();
    step(&format!("states: {}", path.join(" → ").bright_cyan()));
    step(&format!(
        "scanned {} registry entries, {} container structures in {:?}",
        report.registry_entries, report.physical_containers, report.duration
    ));

    if report.is_clean() {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "CONSISTENT — nothing to repair".bright_green().bold()
        );
        return;
    }

    for id in &report.removed_stale {
        step(&format!("{} dropped stale record {}", "−".bright_red(), id));
    }
    for id in &report.removed_incomplete {
        step(&format!("{} dropped interrupted creation {}", "−".bright_red(), id));
    }
    for id in &report.restored {
        step(&format!("{} restored record {}", "+".bright_green(), id));
    }
    for (id, reason) in &report.quarantined {
        step(&format!("{} quarantined {} ({})", "!".bright_yellow(), id, reason));
    }
    println!(
        "\n  {} {}",
        "✓".bright_green().bold(),
        format!("REPAIRED — {} corrective actions", report.repairs())
            .bright_green()
            .bold()
    );
}

// ─── Commands ──────────────────────────────────────────────────────────────

fn mount(cli: &Cli) -> Result<(Manager, Arc<FsContainerDirectory>), RegistryError> {
    let config = match &cli.config {
        Some(path) => RegistryConfig::from_json_file(path)?,
        None => RegistryConfig::default(),
    };
    tracing::debug!(volume = %cli.volume.display(), "mounting volume");
    let directory = Arc::new(FsContainerDirectory::open(&cli.volume)?);
    let manager = LifecycleManager::open(&cli.volume, Arc::clone(&directory), config)?;
    Ok((manager, directory))
}

fn run_list(cli: &Cli, manager: &Manager) -> Result<(), RegistryError> {
    let entries = manager.iter().collect::<Result<Vec<_>, _>>()?;

    if cli.json {
        let map: serde_json::Map<String, serde_json::Value> = entries
            .iter()
            .map(|(id, info)| (id.get().to_string(), serde_json::json!(info)))
            .collect();
        println!("{}", serde_json::Value::Object(map));
        return Ok(());
    }

    header(&format!("REGISTRY — {}", cli.volume.display()));
    if entries.is_empty() {
        println!("  {}", "(no containers)".dimmed());
    }
    for (id, info) in &entries {
        println!("  {}", record_line(*id, info));
    }
    section(&format!("{} containers", entries.len()));
    Ok(())
}

fn run_get(cli: &Cli, manager: &Manager, id: ContainerId) -> Result<bool, RegistryError> {
    let Some(info) = manager.get(id)? else {
        eprintln!("{} container {} is not registered", "✗".bright_red(), id);
        return Ok(false);
    };

    if cli.json {
        println!("{}", serde_json::json!(info));
    } else {
        println!("{}", record_line(id, &info));
    }
    Ok(true)
}

fn run_quarantined(directory: &FsContainerDirectory) -> Result<(), RegistryError> {
    let ids = directory.quarantined_ids()?;
    section(&format!("{} quarantined containers", ids.len()));
    for id in ids {
        step(&id.to_string());
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<bool, RegistryError> {
    let (manager, directory) = mount(cli)?;

    let ok = match &cli.command {
        Commands::List => run_list(cli, &manager).map(|_| true)?,
        Commands::Get { id } => run_get(cli, &manager, *id)?,
        Commands::Reconcile => {
            header(&format!("RECONCILE — {}", cli.volume.display()));
            show_report(manager.reconcile_report());
            true
        }
        Commands::Compact => {
            let compacted = manager.compact()?;
            step(if compacted {
                "store compacted"
            } else {
                "store already compact"
            });
            true
        }
        Commands::Quarantined => run_quarantined(&directory).map(|_| true)?,
    };

    manager.close()?;
    Ok(ok)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(cli.verbose)
        .init();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            eprintln!("{} {}", "error:".bright_red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
