//! Development authority server for the Hamlet village client.
//!
//! Serves an in-memory [`Authority`](hamlet_authority::Authority) over the
//! HTTP contract in [`hamlet_gateway::wire`], so the client binary and the
//! `HttpGateway` can be exercised without the real game backend.
//!
//! # Modules
//!
//! - [`state`] -- [`AppState`]: the authority, its clock, token resolution
//! - [`handlers`] -- One handler per route
//! - [`router`] -- [`build_router`] with CORS and request tracing
//! - [`server`] -- [`ServerConfig`], [`start_server`], [`serve`]
//! - [`error`] -- [`ApiError`] and the bearer-token extractor

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use error::{ApiError, Bearer};
pub use router::build_router;
pub use server::{ServerConfig, ServerError, serve, start_server};
pub use state::AppState;
