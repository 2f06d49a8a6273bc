//! # Relay Server
//!
//! Realtime broadcast relay server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with a specific config file
//! RELAY_CONFIG=/path/to/relay.toml relay
//!
//! # Override individual settings
//! RELAY_PORT=8080 RELAY_HOST=0.0.0.0 RELAY_HUB__QUEUE_CAPACITY=512 relay
//! ```
//!
//! Clients connect to `ws://<host>:<port>/ws?id=<name>`.

use anyhow::Result;
use tenvis_relay_server::{config::Config, handlers};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay=debug,tenvis_relay_server=debug,tenvis_relay_core=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting Relay server on {}:{}", config.host, config.port);

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
