use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use tier_cache::config::{Cli, Config};
use tier_cache::maintenance::MaintenanceScheduler;
use tier_cache::server::http_api::{build_router, AppState, JsonCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tier_cache=debug,tower_http=debug"
    } else {
        "tier_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("tier-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    info!(
        l1_max = config.cache.l1.max_entries,
        l1_ttl_ms = config.cache.l1.ttl_ms,
        l2_max = config.cache.l2.max_entries,
        l2_ttl_ms = config.cache.l2.ttl_ms,
        max_memory_bytes = config.cache.max_memory_bytes,
        "Configuration loaded"
    );

    // Build the cache and its background maintenance.
    let cache = Arc::new(JsonCache::from_config(&config)?);
    let scheduler = MaintenanceScheduler::start(cache.clone());

    // Build the HTTP router.
    let app = build_router(Arc::new(AppState::new(cache)));

    // Start the server.
    let listen_addr = config.server.listen;
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
