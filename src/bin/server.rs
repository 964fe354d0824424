//! ERP Bridge Server
//!
//! Hosts the sync API and runs the scheduler for timer-driven mappings.
//!
//! # Configuration
//!
//! Read from the same YAML file as the CLI (`--config` or the platform
//! config dir), overridden by `ERP_BRIDGE_*` environment variables:
//!
//! ```yaml
//! database_path: /var/lib/erp-bridge/erp-bridge.db
//! remote:
//!   base_url: "https://www.zohoapis.com/books/v3"
//!   accounts_url: "https://accounts.zoho.com"
//!   organization_id: "60001"
//!   access_token: "..."
//!   refresh_token: "..."
//! server:
//!   port: 8080
//!   api_keys:
//!     - "your-secret-key-here"
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use erp_bridge::config::Config;
use erp_bridge::db::{init_db, LocalRecordRepository, MappingRepository, SyncRunRepository};
use erp_bridge::server::{router, AppState};
use erp_bridge::sync::{AssetStore, HttpRemote, MappingRegistry, RetryPolicy, Scheduler, SyncEngine};

#[derive(Parser)]
#[command(name = "erp-bridge-server")]
#[command(version)]
#[command(about = "HTTP service for the ERP sync engine", long_about = None)]
struct Args {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "erp_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let config = match Config::load(args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = &config.config_file {
        tracing::info!("Config file: {}", path.display());
    }
    tracing::info!("Database: {}", config.database_path.value.display());
    tracing::info!("Data directory: {}", config.data_dir.value.display());

    let pool = match init_db(&config.database_path.value).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    let remote = match HttpRemote::from_config(&config.remote) {
        Ok(remote) => remote,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let registry = MappingRegistry::new(MappingRepository::new(pool.clone()));
    match registry.seed_defaults().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Seeded {} default mapping(s)", n),
        Err(e) => {
            tracing::error!("Failed to seed mappings: {}", e);
            std::process::exit(1);
        }
    }

    let engine = Arc::new(SyncEngine::new(
        registry,
        Arc::new(LocalRecordRepository::new(pool.clone())),
        Arc::new(remote),
        SyncRunRepository::new(pool),
        AssetStore::new(&config.data_dir.value),
        RetryPolicy::from_config(&config.remote),
    ));

    let scheduler = Scheduler::new(
        engine.clone(),
        Duration::from_secs(config.server.scheduler_tick_secs.max(1)),
    );
    tokio::spawn(scheduler.run());

    if config.server.api_keys.is_empty() {
        tracing::warn!("No API keys configured; the API is unauthenticated");
    } else {
        tracing::info!("Loaded {} API key(s)", config.server.api_keys.len());
    }

    let app = router(AppState::new(engine, config.server.api_keys.clone()));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Starting server on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
