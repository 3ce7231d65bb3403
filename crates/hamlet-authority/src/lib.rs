//! In-memory authoritative backend for the Hamlet client.
//!
//! The real game server is an external collaborator. This crate models just
//! enough of its rules to honour the gateway contract, so the sync engine
//! can be exercised end to end in tests and against the development server.
//!
//! # Modules
//!
//! - [`village`] -- One village: production settling, training, buildings
//! - [`authority`] -- All villages plus credential issuance and refresh
//! - [`local`] -- [`LocalGateway`], an in-process gateway with fault injection
//! - [`config`] -- Rule knobs (token lifetime, offline cap, grid size)
//! - [`error`] -- [`AuthorityError`] and its mapping onto the gateway taxonomy

pub mod authority;
pub mod config;
pub mod error;
pub mod local;
pub mod village;

pub use authority::Authority;
pub use config::AuthorityConfig;
pub use error::AuthorityError;
pub use local::{LocalGateway, Operation};
pub use village::Village;
