//! Session freshness watchdog.
//!
//! Owns the current [`SessionCredential`] and renews it before it expires.
//! Renewal is triggered two ways: a coarse periodic [`Watchdog::ensure_fresh`]
//! check, and lazily when a call comes back unauthorized.
//!
//! # Single flight
//!
//! At most one renewal is in flight. The first caller creates it as a
//! [`Shared`] future and parks it in a slot; every concurrent caller clones
//! the same future and awaits the same result. The renewal clears the slot
//! when it finishes.
//!
//! # Failure
//!
//! A failed renewal is retried with exponential backoff and jitter, up to
//! `max_renewal_attempts`. Each failure and the final give-up are broadcast
//! as [`SessionEvent`]s. Giving up never clears the credential: the player
//! stays in the game and the next check tries again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use hamlet_gateway::{Gateway, GatewayError};
use hamlet_types::{Clock, SessionCredential, UserId};
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::storage::LocalStore;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

type RenewalResult = Result<SessionCredential, GatewayError>;
type InFlight = Shared<BoxFuture<'static, RenewalResult>>;

/// Renewal progress, for a status panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new credential was installed.
    Renewed {
        /// Expiry of the new credential.
        expires_at: DateTime<Utc>,
    },
    /// One renewal attempt failed; another may follow.
    RenewalFailed {
        /// 1-based attempt number.
        attempt: u32,
        /// Why it failed.
        error: String,
    },
    /// Renewal stopped retrying until the next check. The session is kept.
    GaveUp {
        /// The last failure.
        error: String,
    },
}

/// Whether `credential` expires within `margin` of `now`.
pub fn is_near_expiry(credential: &SessionCredential, margin: TimeDelta, now: DateTime<Utc>) -> bool {
    now.checked_add_signed(margin)
        .is_none_or(|limit| credential.expires_at <= limit)
}

/// Delay before retry number `attempt + 1`.
///
/// `base * 2^(attempt-1)`, capped at `backoff_max_ms`, plus up to a quarter
/// of that again as jitter.
pub fn backoff_delay(config: &SessionConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let capped = config
        .backoff_base_ms
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(config.backoff_max_ms);
    let spread = capped.checked_div(4).unwrap_or(0);
    let jitter = if spread == 0 {
        0
    } else {
        rand::rng().random_range(0..=spread)
    };
    Duration::from_millis(capped.saturating_add(jitter))
}

struct Inner<G> {
    user: UserId,
    gateway: Arc<G>,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    credential: Mutex<SessionCredential>,
    in_flight: Mutex<Option<InFlight>>,
    events: broadcast::Sender<SessionEvent>,
    renewals: AtomicU64,
}

/// Credential owner and renewer. Cheap to clone.
pub struct Watchdog<G> {
    inner: Arc<Inner<G>>,
}

impl<G> Clone for Watchdog<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G> core::fmt::Debug for Watchdog<G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Watchdog")
            .field("user", &self.inner.user)
            .field("credential", &self.credential())
            .finish_non_exhaustive()
    }
}

impl<G: Gateway> Watchdog<G> {
    /// Take ownership of `credential` for `user`.
    pub fn new(
        user: UserId,
        credential: SessionCredential,
        gateway: Arc<G>,
        store: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                user,
                gateway,
                store,
                clock,
                config,
                credential: Mutex::new(credential),
                in_flight: Mutex::new(None),
                events,
                renewals: AtomicU64::new(0),
            }),
        }
    }

    /// Listen for renewal progress.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Number of renewals started (not attempts; joined callers do not count).
    pub fn renewals_started(&self) -> u64 {
        self.inner.renewals.load(Ordering::Acquire)
    }

    /// Whether the current credential is within the configured margin of
    /// expiry.
    pub fn is_near_expiry(&self) -> bool {
        is_near_expiry(&self.credential(), self.margin(), self.inner.clock.now())
    }

    /// Renew if the credential is near expiry. Returns whether it renewed.
    ///
    /// # Errors
    ///
    /// Returns the last [`GatewayError`] if every renewal attempt failed.
    pub async fn ensure_fresh(&self) -> Result<bool, GatewayError> {
        if !self.is_near_expiry() {
            return Ok(false);
        }
        debug!(user_id = %self.inner.user, "credential near expiry");
        self.renew().await.map(|_| true)
    }

    /// Renew now, joining any renewal already in flight.
    ///
    /// # Errors
    ///
    /// Returns the last [`GatewayError`] if every renewal attempt failed.
    pub async fn force_renew(&self) -> Result<SessionCredential, GatewayError> {
        self.renew().await
    }

    /// Get a token to retry with after `used_token` was refused.
    ///
    /// If the credential was already replaced since `used_token` was handed
    /// out, returns the current token without renewing again.
    ///
    /// # Errors
    ///
    /// Returns the last [`GatewayError`] if renewal failed.
    pub async fn renew_unless_replaced(&self, used_token: &str) -> Result<String, GatewayError> {
        let current = self.token();
        if current != used_token {
            return Ok(current);
        }
        self.renew().await.map(|c| c.token)
    }

    async fn renew(&self) -> RenewalResult {
        let renewal = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = slot.as_ref() {
                existing.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let renewal = async move { inner.run_renewal().await }.boxed().shared();
                *slot = Some(renewal.clone());
                renewal
            }
        };
        renewal.await
    }

    fn margin(&self) -> TimeDelta {
        i64::try_from(self.inner.config.expiry_margin_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

impl<G> Watchdog<G> {
    /// The current credential.
    pub fn credential(&self) -> SessionCredential {
        self.inner.current()
    }

    /// The current bearer token.
    pub fn token(&self) -> String {
        self.inner.current().token
    }
}

impl<G> Inner<G> {
    fn current(&self) -> SessionCredential {
        self.credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, fresh: &SessionCredential) {
        {
            let mut current = self.credential.lock().unwrap_or_else(PoisonError::into_inner);
            current.clone_from(fresh);
        }
        if let Err(err) = self.store.save_credential(self.user, fresh) {
            warn!(user_id = %self.user, error = %err, "failed to persist renewed credential");
        }
    }
}

impl<G: Gateway> Inner<G> {
    async fn run_renewal(self: Arc<Self>) -> RenewalResult {
        let result = self.attempt_renewals().await;
        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        drop(slot);
        result
    }

    async fn attempt_renewals(&self) -> RenewalResult {
        self.renewals.fetch_add(1, Ordering::AcqRel);
        let max_attempts = self.config.max_renewal_attempts.max(1);
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let token = self.current().token;
            match self.gateway.refresh_credential(&token).await {
                Ok(fresh) => {
                    self.install(&fresh);
                    info!(
                        user_id = %self.user,
                        expires_at = %fresh.expires_at,
                        attempt,
                        "credential renewed"
                    );
                    let _ = self.events.send(SessionEvent::Renewed {
                        expires_at: fresh.expires_at,
                    });
                    return Ok(fresh);
                }
                Err(err) => {
                    warn!(user_id = %self.user, attempt, error = %err, "credential renewal failed");
                    let _ = self.events.send(SessionEvent::RenewalFailed {
                        attempt,
                        error: err.to_string(),
                    });
                    if attempt >= max_attempts || !err.is_retryable() {
                        warn!(
                            user_id = %self.user,
                            attempt,
                            "giving up on renewal until the next check"
                        );
                        let _ = self.events.send(SessionEvent::GaveUp {
                            error: err.to_string(),
                        });
                        return Err(err);
                    }
                    tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use hamlet_authority::{Authority, AuthorityConfig, LocalGateway, Operation};
    use hamlet_types::ManualClock;

    use super::*;
    use crate::storage::MemoryStore;

    struct Fixture {
        gateway: Arc<LocalGateway>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        watchdog: Watchdog<LocalGateway>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gateway = Arc::new(LocalGateway::new(
            Authority::new(AuthorityConfig::default()),
            clock.clone(),
        ));
        let seed = gateway.seed_village();
        assert!(seed.is_ok());
        let (user, credential) = seed
            .map(|s| (s.user_id, s.credential))
            .unwrap_or_else(|_| {
                (
                    UserId::new(),
                    SessionCredential {
                        token: String::new(),
                        expires_at: Utc::now(),
                    },
                )
            });
        let store = Arc::new(MemoryStore::new());
        let watchdog = Watchdog::new(
            user,
            credential,
            Arc::clone(&gateway),
            store.clone(),
            clock.clone(),
            SessionConfig::default(),
        );
        Fixture {
            gateway,
            clock,
            store,
            watchdog,
        }
    }

    #[test]
    fn near_expiry_uses_the_margin() {
        let now = Utc::now();
        let credential = SessionCredential {
            token: String::from("t"),
            expires_at: now + TimeDelta::minutes(15),
        };
        assert!(!is_near_expiry(&credential, TimeDelta::minutes(10), now));
        assert!(is_near_expiry(&credential, TimeDelta::minutes(15), now));
        assert!(is_near_expiry(&credential, TimeDelta::zero(), now + TimeDelta::minutes(20)));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = SessionConfig::default();
        let first = backoff_delay(&config, 1);
        assert!(first >= Duration::from_millis(2000) && first <= Duration::from_millis(2500));
        let third = backoff_delay(&config, 3);
        assert!(third >= Duration::from_millis(8000) && third <= Duration::from_millis(10_000));
        let late = backoff_delay(&config, 30);
        assert!(late >= Duration::from_millis(60_000) && late <= Duration::from_millis(75_000));
    }

    #[tokio::test]
    async fn fresh_credential_is_left_alone() {
        let f = fixture();
        let renewed = f.watchdog.ensure_fresh().await;
        assert!(matches!(renewed, Ok(false)));
        assert_eq!(f.gateway.calls(Operation::RefreshCredential), 0);
    }

    #[tokio::test]
    async fn near_expiry_renews_and_persists() {
        let f = fixture();
        let before = f.watchdog.token();
        f.clock.advance(TimeDelta::minutes(55));
        let mut events = f.watchdog.subscribe();

        assert!(matches!(f.watchdog.ensure_fresh().await, Ok(true)));
        let after = f.watchdog.token();
        assert_ne!(before, after);
        assert_eq!(
            f.store.credential(f.watchdog.inner.user).ok().flatten().map(|c| c.token),
            Some(after)
        );
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Renewed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_renewal() {
        let f = fixture();
        f.clock.advance(TimeDelta::minutes(55));
        f.gateway.set_latency(Duration::from_millis(200));

        let (a, b, c) = tokio::join!(
            f.watchdog.ensure_fresh(),
            f.watchdog.ensure_fresh(),
            f.watchdog.force_renew(),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(f.gateway.calls(Operation::RefreshCredential), 1);
        assert_eq!(f.watchdog.renewals_started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let f = fixture();
        let mut events = f.watchdog.subscribe();
        f.gateway.fail_next(
            Operation::RefreshCredential,
            GatewayError::Transport(String::from("reset")),
        );
        f.gateway.fail_next(
            Operation::RefreshCredential,
            GatewayError::Transport(String::from("reset")),
        );

        let renewed = f.watchdog.force_renew().await;
        assert!(renewed.is_ok());
        assert_eq!(f.gateway.calls(Operation::RefreshCredential), 3);
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::RenewalFailed { attempt: 1, .. })
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(SessionEvent::RenewalFailed { attempt: 2, .. })
        ));
        assert!(matches!(events.try_recv(), Ok(SessionEvent::Renewed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn giving_up_keeps_the_credential() {
        let f = fixture();
        let before = f.watchdog.credential();
        let mut events = f.watchdog.subscribe();
        for _ in 0..5 {
            f.gateway.fail_next(
                Operation::RefreshCredential,
                GatewayError::Transport(String::from("down")),
            );
        }

        let renewed = f.watchdog.force_renew().await;
        assert!(matches!(renewed, Err(GatewayError::Transport(_))));
        assert_eq!(f.gateway.calls(Operation::RefreshCredential), 5);
        assert_eq!(f.watchdog.credential(), before);

        let mut gave_up = false;
        while let Ok(event) = events.try_recv() {
            gave_up |= matches!(event, SessionEvent::GaveUp { .. });
        }
        assert!(gave_up);

        // The slot was cleared: the next attempt starts a new renewal.
        assert!(f.watchdog.force_renew().await.is_ok());
        assert_eq!(f.watchdog.renewals_started(), 2);
    }

    #[tokio::test]
    async fn authorization_failure_is_not_retried() {
        let f = fixture();
        f.gateway.fail_next(
            Operation::RefreshCredential,
            GatewayError::Unauthorized(String::from("revoked")),
        );
        let renewed = f.watchdog.force_renew().await;
        assert!(matches!(renewed, Err(GatewayError::Unauthorized(_))));
        assert_eq!(f.gateway.calls(Operation::RefreshCredential), 1);
    }

    #[tokio::test]
    async fn replaced_token_is_returned_without_renewing() {
        let f = fixture();
        let stale = f.watchdog.token();
        assert!(f.watchdog.force_renew().await.is_ok());
        let retry = f.watchdog.renew_unless_replaced(&stale).await;
        assert_eq!(retry.ok(), Some(f.watchdog.token()));
        assert_eq!(f.gateway.calls(Operation::RefreshCredential), 1);
    }
}
