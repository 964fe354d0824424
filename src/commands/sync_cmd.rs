//! Operator commands that trigger and inspect synchronization.

use clap::{Args, Subcommand};
use sqlx::SqlitePool;
use std::sync::Arc;

use super::OutputFormat;
use erp_bridge::config::Config;
use erp_bridge::db::{LocalRecordRepository, SyncRunRepository};
use erp_bridge::models::{EntityType, SyncStatus};
use erp_bridge::sync::{
    AssetStore, HttpRemote, LocalStore, MappingRegistry, RetryPolicy, SyncEngine,
};

/// Analyze, compare and execute synchronization for one entity type
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: SyncSubcommand,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Count new, updated and matched remote records without writing
    Analyze(EntityArgs),

    /// Compare remote and local records
    Compare(EntityArgs),

    /// Run a full synchronization
    Execute(EntityArgs),

    /// Show cumulative counters and local table state
    Status(EntityArgs),

    /// Show recent runs
    Runs {
        #[command(flatten)]
        target: EntityArgs,

        /// Number of runs to show
        #[arg(long, short = 'n', default_value = "10")]
        limit: i64,
    },
}

#[derive(Args)]
struct EntityArgs {
    /// Entity type (item, customer, vendor)
    entity: EntityType,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

impl SyncCommand {
    pub async fn run(
        &self,
        pool: &SqlitePool,
        registry: MappingRegistry,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            SyncSubcommand::Analyze(args) => {
                let engine = build_engine(pool, registry, config)?;
                let analysis = engine.analyze(args.entity).await?;
                print_value(args.format, &analysis)?;
            }
            SyncSubcommand::Compare(args) => {
                let engine = build_engine(pool, registry, config)?;
                let comparison = engine.compare(args.entity, true).await?;
                print_value(args.format, &comparison)?;
            }
            SyncSubcommand::Execute(args) => {
                let engine = build_engine(pool, registry, config)?;
                if let OutputFormat::Text = args.format {
                    println!("Syncing {}...", args.entity);
                }
                let run = engine.execute(args.entity).await?;
                print_value(args.format, &run)?;
            }
            SyncSubcommand::Status(args) => {
                let status = status(pool, &registry, args.entity).await?;
                match args.format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
                    OutputFormat::Text => print_status(args.entity, &status),
                }
            }
            SyncSubcommand::Runs { target, limit } => {
                registry.get(target.entity).await?;
                let runs = SyncRunRepository::new(pool.clone())
                    .list(target.entity, (*limit).max(1))
                    .await?;
                match target.format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
                    OutputFormat::Text => {
                        if runs.is_empty() {
                            println!("No runs recorded for {}.", target.entity);
                        }
                        for run in &runs {
                            println!("{}\n", run);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn build_engine(
    pool: &SqlitePool,
    registry: MappingRegistry,
    config: &Config,
) -> Result<SyncEngine, Box<dyn std::error::Error>> {
    let remote = HttpRemote::from_config(&config.remote)?;
    Ok(SyncEngine::new(
        registry,
        Arc::new(LocalRecordRepository::new(pool.clone())),
        Arc::new(remote),
        SyncRunRepository::new(pool.clone()),
        AssetStore::new(&config.data_dir.value),
        RetryPolicy::from_config(&config.remote),
    ))
}

/// Reads counters without contacting the remote, so it works before
/// credentials are configured.
async fn status(
    pool: &SqlitePool,
    registry: &MappingRegistry,
    entity_type: EntityType,
) -> Result<SyncStatus, Box<dyn std::error::Error>> {
    let mapping = registry.get(entity_type).await?;
    let local = LocalRecordRepository::new(pool.clone())
        .count_by_status(&mapping.local_table)
        .await?;

    Ok(SyncStatus {
        total_synced: mapping.total_synced,
        total_errors: mapping.total_errors,
        last_sync: mapping.last_sync,
        state: registry.state(&mapping),
        local,
    })
}

fn print_status(entity_type: EntityType, status: &SyncStatus) {
    println!("Sync status: {}", entity_type);
    println!("  State:        {}", status.state);
    println!("  Total synced: {}", status.total_synced);
    println!("  Total errors: {}", status.total_errors);
    match status.last_sync {
        Some(ts) => println!("  Last sync:    {}", ts.to_rfc3339()),
        None => println!("  Last sync:    never"),
    }
    println!(
        "  Local rows:   {} ({} synced, {} with errors)",
        status.local.total, status.local.synced, status.local.errors
    );
}

fn print_value<T: serde::Serialize + std::fmt::Display>(
    format: OutputFormat,
    value: &T,
) -> Result<(), serde_json::Error> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", value),
    }
    Ok(())
}
