//! Error types for the client binary.

use hamlet_gateway::GatewayError;
use hamlet_sync::{ConfigError, StoreError};

/// Top-level error for the client binary.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// An environment variable held an unusable value.
    #[error("invalid {name}: {detail}")]
    Env {
        /// Variable name.
        name: &'static str,
        /// What was wrong with it.
        detail: String,
    },

    /// Sync configuration could not be loaded.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The local store failed.
    #[error("local store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// The authority could not be reached or refused.
    #[error("gateway error: {source}")]
    Gateway {
        /// The underlying gateway error.
        #[from]
        source: GatewayError,
    },
}
