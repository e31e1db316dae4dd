use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use facehub::{api, config::HubConfig, error::HubError, hub::ConnectionHub};

#[tokio::main]
async fn main() -> Result<(), HubError> {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facehub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting connection hub...");

    let config = HubConfig::from_env();
    config.validate()?;

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| HubError::Bind { addr, source })?;
    tracing::info!("Listening on http://{}", addr);

    let hub = Arc::new(ConnectionHub::new(config));

    let signal_hub = hub.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C");
                signal_hub.shutdown().await;
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    api::serve(listener, hub.clone()).await?;
    hub.shutdown().await;

    tracing::info!("Connection hub stopped");
    Ok(())
}
