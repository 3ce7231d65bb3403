//! Development server lifecycle.
//!
//! [`ServerConfig`] comes from the environment; [`start_server`] binds and
//! serves until the process is stopped, and [`serve`] runs on a listener
//! the caller already bound (tests bind port 0).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Where the development server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// TCP port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Load from `HAMLET_DEV_HOST` and `HAMLET_DEV_PORT`, falling back to
    /// the defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the port is not a valid number.
    pub fn from_env() -> Result<Self, ServerError> {
        let defaults = Self::default();
        let host = std::env::var("HAMLET_DEV_HOST").unwrap_or(defaults.host);
        let port = match std::env::var("HAMLET_DEV_PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| ServerError::Config(format!("invalid HAMLET_DEV_PORT {raw:?}: {e}")))?,
            Err(_) => defaults.port,
        };
        Ok(Self { host, port })
    }
}

/// Bind to the configured address and serve until the process ends.
///
/// # Errors
///
/// Returns an error if the address is invalid, the bind fails, or the
/// server hits a fatal I/O error.
pub async fn start_server(config: &ServerConfig, state: Arc<AppState>) -> Result<(), ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))?;

    info!(%addr, "development server listening");
    serve(listener, state).await
}

/// Serve on an already-bound listener.
///
/// # Errors
///
/// Returns [`ServerError::Serve`] on a fatal I/O error.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))
}

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The environment held an unusable value.
    #[error("config error: {0}")]
    Config(String),

    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server failed while serving.
    #[error("serve error: {0}")]
    Serve(String),
}
