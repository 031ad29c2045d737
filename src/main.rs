use std::sync::Arc;

use tracing::info;

use depot::{Config, DepotServer, FileStore};

#[tokio::main]
async fn main() -> depot::Result<()> {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.validate()?;

    // Initialize logging
    if let Err(e) = depot::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        depot::logging::init_console_only(&config.logging.level);
    }

    info!("DEPOT - factory file distribution server");
    info!(
        "Serving {} on {}:{}",
        config.storage.root_path, config.server.host, config.server.port
    );

    let store = Arc::new(FileStore::new(&config.storage)?);
    let server = DepotServer::bind(&config.server).await?;

    server.serve(store).await
}
