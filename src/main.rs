use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{ConfigCommand, MappingCommand, SyncCommand};
use erp_bridge::config::Config;
use erp_bridge::db::{init_db, MappingRepository};
use erp_bridge::sync::MappingRegistry;

#[derive(Parser)]
#[command(name = "erp-bridge")]
#[command(version)]
#[command(about = "Synchronize ERP items, customers and vendors with a remote system of record", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage entity mappings
    Mapping(MappingCommand),

    /// Analyze, compare and run synchronization
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "erp_bridge=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Mapping(cmd)) => {
            let registry = open_registry(&config).await?.1;
            cmd.run(&registry).await?;
        }
        Some(Commands::Sync(cmd)) => {
            let (pool, registry) = open_registry(&config).await?;
            cmd.run(&pool, registry, &config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

/// Opens the database and makes sure every entity type has a mapping.
async fn open_registry(
    config: &Config,
) -> Result<(sqlx::SqlitePool, MappingRegistry), Box<dyn std::error::Error>> {
    let pool = init_db(&config.database_path.value).await?;
    let registry = MappingRegistry::new(MappingRepository::new(pool.clone()));
    registry.seed_defaults().await?;
    Ok((pool, registry))
}
