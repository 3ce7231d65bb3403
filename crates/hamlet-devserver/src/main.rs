//! Development authority server binary.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load [`ServerConfig`] from the environment
//! 3. Create an empty authority on the system clock
//! 4. Serve until the process is stopped

use std::sync::Arc;

use hamlet_authority::AuthorityConfig;
use hamlet_devserver::{AppState, ServerConfig, start_server};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Application entry point for the development server.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the server cannot
/// bind.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("hamlet-devserver starting");

    let config = ServerConfig::from_env()?;
    let authority = AuthorityConfig::default();
    info!(
        host = config.host,
        port = config.port,
        token_ttl_secs = authority.token_ttl.num_seconds(),
        max_offline_minutes = authority.max_offline_minutes,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new(authority));
    start_server(&config, state).await?;
    Ok(())
}
