//! # deskrelay
//!
//! Help-desk chat broker: relays messages between remote devices and the
//! admins supporting them.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! deskrelay
//!
//! # Run with a specific config file
//! DESKRELAY_CONFIG=/path/to/deskrelay.toml deskrelay
//!
//! # Run with environment variables
//! DESKRELAY_PORT=8080 DESKRELAY_HOST=0.0.0.0 DESKRELAY_DATA_DIR=/var/lib/deskrelay deskrelay
//! ```

mod config;
mod error;
mod handlers;
mod metrics;
mod settings;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskrelay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        data_dir = %config.storage.data_dir.display(),
        "Starting deskrelay on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
