//! Authorized gateway calls.
//!
//! [`Session::call`] runs one gateway call with the current token. When the
//! authority answers [`FailureClass::Authorization`], the watchdog renews
//! (joining any renewal already in flight) and the call is retried exactly
//! once. A second failure is returned as-is; nothing here logs the player
//! out.

use std::future::Future;
use std::sync::Arc;

use hamlet_gateway::{FailureClass, Gateway, GatewayResult};
use hamlet_types::UserId;
use tracing::debug;

use crate::watchdog::Watchdog;

/// A player's gateway plus the watchdog that keeps its token fresh.
pub struct Session<G> {
    user: UserId,
    gateway: Arc<G>,
    watchdog: Watchdog<G>,
}

impl<G> Clone for Session<G> {
    fn clone(&self) -> Self {
        Self {
            user: self.user,
            gateway: Arc::clone(&self.gateway),
            watchdog: self.watchdog.clone(),
        }
    }
}

impl<G> core::fmt::Debug for Session<G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("user", &self.user)
            .field("watchdog", &self.watchdog)
            .finish_non_exhaustive()
    }
}

impl<G: Gateway> Session<G> {
    /// Bind `gateway` and `watchdog` for `user`.
    pub const fn new(user: UserId, gateway: Arc<G>, watchdog: Watchdog<G>) -> Self {
        Self {
            user,
            gateway,
            watchdog,
        }
    }

    /// The player this session belongs to.
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// The underlying gateway.
    pub const fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// The credential watchdog.
    pub const fn watchdog(&self) -> &Watchdog<G> {
        &self.watchdog
    }

    /// Run `call` with the current token, renewing and retrying once on an
    /// authorization failure.
    ///
    /// `call` receives the gateway and a token and may be invoked twice.
    pub async fn call<T, F, Fut>(&self, op: &'static str, call: F) -> GatewayResult<T>
    where
        F: Fn(Arc<G>, String) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let token = self.watchdog.token();
        match call(Arc::clone(&self.gateway), token.clone()).await {
            Err(err) if err.class() == FailureClass::Authorization => {
                debug!(user_id = %self.user, op, error = %err, "unauthorized, renewing and retrying once");
                let fresh = self.watchdog.renew_unless_replaced(&token).await?;
                call(Arc::clone(&self.gateway), fresh).await
            }
            other => other,
        }
    }
}
