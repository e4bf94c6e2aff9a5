use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use pod_query_backend::api;
use pod_query_backend::config::Config;
use pod_query_backend::storage::SqliteStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (.env first, then the environment)
    let config = Config::from_env()?;

    // Initialize logging; RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting server on {}", config.server_address());

    // Initialize SQLite storage
    let storage = Arc::new(SqliteStorage::new(&config.database.url).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        e
    })?);

    // Create router with state
    let app: Router = api::routes::create_router_with_state(storage, config.clone());

    // Start server
    let addr: SocketAddr = config.server_address().parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
