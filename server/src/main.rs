//! Huddle Server - Main Entry Point
//!
//! Signaling backend for peer-to-peer audio/video conferencing.

use anyhow::Result;
use tracing::info;

use huddle_server::{api, config, crypto, db, rooms};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle_server=debug,tower_http=debug".into()),
        )
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Huddle Server"
    );

    // KV store is best-effort: boot continues without persistence.
    let kv = db::KvStore::connect(&config.kv_url).await;

    // Chat-at-rest key lives and dies with this process.
    let cipher = crypto::ChatCipher::generate();

    let registry = rooms::Registry::new(config.max_participants_default);

    // Build application state and router
    let state = api::AppState::new(registry, kv, cipher, config.clone());
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shutdown complete");

    Ok(())
}
