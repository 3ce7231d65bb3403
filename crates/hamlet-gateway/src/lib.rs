//! Remote State Gateway for the Hamlet village client.
//!
//! The gateway is the leaf of the sync engine: it issues request/response
//! calls to the authoritative backend and returns typed results or typed
//! failures. It holds no state and makes no retry decisions.
//!
//! # Modules
//!
//! - [`gateway`] -- The [`Gateway`] trait, one method per authority call
//! - [`error`] -- [`GatewayError`] and its [`FailureClass`] taxonomy
//! - [`http`] -- [`HttpGateway`], the `reqwest` implementation
//! - [`wire`] -- Paths, error bodies and status mapping for the HTTP contract
//! - [`config`] -- [`GatewayConfig`] loaded from the environment

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod wire;

pub use config::GatewayConfig;
pub use error::{FailureClass, GatewayError};
pub use gateway::{Gateway, GatewayResult};
pub use http::HttpGateway;
