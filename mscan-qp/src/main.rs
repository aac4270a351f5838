//! mscan-qp - Queue Processor Microservice
//!
//! Advances the MusicScan content-generation queues one item per tick,
//! driven by an external scheduler hitting the tick endpoints. Also hosts
//! the matrix photo analysis endpoint for the scanning UI.
//!
//! Port: 5841

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mscan_common::config::{config_file_path, RootFolderInitializer, RootFolderResolver, TomlConfig};
use mscan_common::events::EventBus;
use mscan_qp::services::story_generator::{StoryGenerator, STORY_ITEM_TYPES};
use mscan_qp::queue::worker::WorkerRegistry;
use mscan_qp::AppState;

#[derive(Parser, Debug)]
#[command(name = "mscan-qp", version, about = "MusicScan queue processor service")]
struct Args {
    /// Root folder holding the database and config (overrides env/TOML)
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Listen port
    #[arg(long, default_value_t = 5841)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting mscan-qp (Queue Processor) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder
    let resolver = RootFolderResolver::new("mscan-qp").with_cli_arg(args.root_folder);
    let root_folder = resolver.resolve();

    // Step 2: Create root folder directory if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    // Step 3: Open or create database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let db_pool = mscan_qp::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Step 4: Resolve the story API key and register workers. A missing
    // key degrades the service to status/analysis only rather than
    // refusing to start.
    let toml_config = config_file_path("mscan-qp")
        .map(|path| TomlConfig::load_or_default(&path))
        .unwrap_or_default();

    let mut workers = WorkerRegistry::new();
    match mscan_qp::config::resolve_story_api_key(&db_pool, &toml_config).await {
        Ok(api_key) => {
            let generator = Arc::new(StoryGenerator::new(db_pool.clone(), api_key));
            for item_type in STORY_ITEM_TYPES {
                workers.register(item_type, generator.clone());
            }
            info!("Story generation workers registered");
        }
        Err(e) => {
            warn!(error = %e, "Story API key unavailable; story workers not registered");
        }
    }

    // Create event bus for SSE broadcasting
    let event_bus = EventBus::new(100);
    info!("Event bus initialized");

    // Create application state
    let state = AppState::new(db_pool, event_bus, workers);

    // Build router
    let app = mscan_qp::build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port)).await?;
    info!("Listening on http://127.0.0.1:{}", args.port);
    info!("Health check: http://127.0.0.1:{}/health", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
