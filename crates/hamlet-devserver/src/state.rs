//! Shared application state for the development server.
//!
//! [`AppState`] wraps one in-memory [`Authority`] behind an async mutex and
//! the clock every request reads "now" from. Handlers go through
//! [`AppState::authorized`], which resolves the bearer token before the
//! operation runs so every route authenticates the same way.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hamlet_authority::{Authority, AuthorityConfig, AuthorityError};
use hamlet_types::{Clock, SessionCredential, SystemClock, UserId, VillageSeed};
use tokio::sync::Mutex;

use crate::error::ApiError;

/// State shared across all handlers.
#[derive(Debug)]
pub struct AppState {
    authority: Mutex<Authority>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Serve a fresh authority on the system clock.
    pub fn new(config: AuthorityConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Serve a fresh authority on `clock`.
    pub fn with_clock(config: AuthorityConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            authority: Mutex::new(Authority::new(config)),
            clock,
        }
    }

    /// The current instant by this server's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Authenticate `token` and run `op` for its owner.
    pub async fn authorized<T, F>(&self, token: &str, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Authority, UserId, DateTime<Utc>) -> Result<T, AuthorityError>,
    {
        let now = self.now();
        let mut authority = self.authority.lock().await;
        let user = authority.authenticate(token, now)?;
        Ok(op(&mut authority, user, now)?)
    }

    /// Exchange `token` for a new credential.
    pub async fn refresh(&self, token: &str) -> Result<SessionCredential, ApiError> {
        let now = self.now();
        Ok(self.authority.lock().await.refresh(token, now)?)
    }

    /// Create a village with the starting layout.
    pub async fn seed_village(&self) -> Result<VillageSeed, ApiError> {
        let now = self.now();
        Ok(self.authority.lock().await.seed_village(now)?)
    }
}
