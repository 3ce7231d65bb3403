//! Online and offline resource accrual.
//!
//! The arithmetic itself ([`compute_accrual`]) lives in `hamlet-types` so
//! the authority and the client agree on rounding. This module owns the
//! offline catch-up flow:
//!
//! 1. [`OfflineAccrual::on_hidden`] stamps the last-session time.
//! 2. [`OfflineAccrual::on_visible`] reads the stamp and decides:
//!    no stamp means first run (stamp now, nothing to claim); fewer than
//!    `min_elapsed_minutes` whole minutes is noise; otherwise the
//!    authority's preview becomes a [`Claimable`].
//! 3. [`OfflineAccrual::claim`] commits. On success the returned ledger
//!    replaces the projection and the stamp moves to now. On failure the
//!    claimable stays put for a retry.
//!
//! The online flow is just a periodic authoritative re-pull; it replaces
//! the projection and never adds to it.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use hamlet_gateway::Gateway;
use hamlet_types::{ResourceAmounts, ResourceLedger, UserId};
use tracing::{debug, info, warn};

pub use hamlet_types::{ProductionRates, compute_accrual, whole_minutes_between};

use crate::error::SyncError;
use crate::session::Session;
use crate::storage::LocalStore;

/// Offline production waiting for the player to collect it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claimable {
    /// Whole minutes away.
    pub elapsed_minutes: u64,
    /// What the authority says it will credit.
    pub preview: ResourceAmounts,
    /// What the client's own calculator expects, when buildings were
    /// available. Display only.
    pub local_estimate: Option<ResourceAmounts>,
}

/// Outcome of the visibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineCheck {
    /// No previous session was recorded; the clock starts now.
    FirstRun,
    /// The absence was too short to count.
    TooShort {
        /// Whole minutes away.
        elapsed_minutes: u64,
    },
    /// There is production to claim.
    Claimable(Claimable),
}

impl OfflineCheck {
    /// The amount the UI should offer, zero when there is nothing to claim.
    pub const fn claimable_amount(&self) -> ResourceAmounts {
        match self {
            Self::Claimable(claim) => claim.preview,
            Self::FirstRun | Self::TooShort { .. } => ResourceAmounts::ZERO,
        }
    }
}

/// The offline catch-up flow for one player.
#[derive(Debug)]
pub struct OfflineAccrual {
    user: UserId,
    min_elapsed_minutes: u64,
    store: Arc<dyn LocalStore>,
    pending: Mutex<Option<Claimable>>,
}

impl OfflineAccrual {
    /// Track `user`'s offline window in `store`.
    pub fn new(user: UserId, min_elapsed_minutes: u64, store: Arc<dyn LocalStore>) -> Self {
        Self {
            user,
            min_elapsed_minutes,
            store,
            pending: Mutex::new(None),
        }
    }

    /// The unclaimed amount, if any.
    pub fn pending(&self) -> Option<Claimable> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record that the player left at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the stamp cannot be written.
    pub fn on_hidden(&self, now: DateTime<Utc>) -> Result<(), SyncError> {
        self.store.stamp_last_session(self.user, now)?;
        debug!(user_id = %self.user, at = %now, "last session stamped");
        Ok(())
    }

    /// Work out what the player earned while away.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the stamp cannot be read or written,
    /// or [`SyncError::Gateway`] if the authority preview fails.
    pub async fn on_visible<G: Gateway>(
        &self,
        session: &Session<G>,
        now: DateTime<Utc>,
    ) -> Result<OfflineCheck, SyncError> {
        let Some(last_seen) = self.store.last_session(self.user)? else {
            self.store.stamp_last_session(self.user, now)?;
            info!(user_id = %self.user, "first session, offline clock started");
            return Ok(OfflineCheck::FirstRun);
        };

        let elapsed_minutes = whole_minutes_between(last_seen, now);
        if elapsed_minutes < self.min_elapsed_minutes {
            debug!(user_id = %self.user, elapsed_minutes, "absence below threshold");
            return Ok(OfflineCheck::TooShort { elapsed_minutes });
        }

        let preview = session
            .call("preview_offline_accrual", |g, token| async move {
                g.preview_offline_accrual(&token, elapsed_minutes).await
            })
            .await?;

        let local_estimate = match session
            .call("get_buildings", |g, token| async move {
                g.get_buildings(&token).await
            })
            .await
        {
            Ok(buildings) => Some(compute_accrual(
                &ProductionRates::from_buildings(&buildings),
                elapsed_minutes,
            )),
            Err(err) => {
                debug!(user_id = %self.user, error = %err, "no local estimate");
                None
            }
        };

        let claim = Claimable {
            elapsed_minutes,
            preview,
            local_estimate,
        };
        info!(
            user_id = %self.user,
            elapsed_minutes,
            preview_total = preview.total(),
            "offline accrual available"
        );
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(claim.clone());
        Ok(OfflineCheck::Claimable(claim))
    }

    /// Commit the pending claim and return the authority's new ledger.
    ///
    /// The caller installs the ledger in its projection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NothingToClaim`] if nothing is pending, or the
    /// gateway failure (the claim stays pending for a retry).
    pub async fn claim<G: Gateway>(
        &self,
        session: &Session<G>,
        now: DateTime<Utc>,
    ) -> Result<ResourceLedger, SyncError> {
        let Some(pending) = self.pending() else {
            return Err(SyncError::NothingToClaim);
        };
        let elapsed_minutes = pending.elapsed_minutes;
        let ledger = match session
            .call("commit_offline_accrual", |g, token| async move {
                g.commit_offline_accrual(&token, elapsed_minutes).await
            })
            .await
        {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(user_id = %self.user, error = %err, "offline claim failed, kept for retry");
                return Err(err.into());
            }
        };

        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.store.stamp_last_session(self.user, now)?;
        info!(user_id = %self.user, elapsed_minutes, "offline accrual claimed");
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use hamlet_authority::{Authority, AuthorityConfig, LocalGateway, Operation};
    use hamlet_gateway::GatewayError;
    use hamlet_types::{Clock, ManualClock, ResourceKind, SessionCredential};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::config::SessionConfig;
    use crate::storage::MemoryStore;
    use crate::watchdog::Watchdog;

    struct Fixture {
        gateway: Arc<LocalGateway>,
        clock: Arc<ManualClock>,
        session: Session<LocalGateway>,
        offline: OfflineAccrual,
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
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let watchdog = Watchdog::new(
            user,
            credential,
            Arc::clone(&gateway),
            Arc::clone(&store),
            clock.clone(),
            SessionConfig::default(),
        );
        Fixture {
            session: Session::new(user, Arc::clone(&gateway), watchdog),
            offline: OfflineAccrual::new(user, 2, store),
            gateway,
            clock,
        }
    }

    #[test]
    fn rates_example_for_forty_two_minutes() {
        let rates = ProductionRates::new()
            .with(ResourceKind::Wood, dec!(5))
            .with(ResourceKind::Stone, dec!(3))
            .with(ResourceKind::Food, dec!(4))
            .with(ResourceKind::Iron, dec!(2));
        assert_eq!(
            compute_accrual(&rates, 42),
            ResourceAmounts::new(210, 126, 168, 84)
        );
    }

    #[test]
    fn accrual_never_decreases_with_time() {
        let rates = ProductionRates::new()
            .with(ResourceKind::Wood, dec!(0.7))
            .with(ResourceKind::Iron, dec!(2.5));
        let mut previous = ResourceAmounts::ZERO;
        for minutes in 0..200 {
            let next = compute_accrual(&rates, minutes);
            assert!(next.covers(&previous));
            previous = next;
        }
    }

    #[tokio::test]
    async fn first_run_stamps_and_offers_nothing() {
        let f = fixture();
        let check = f.offline.on_visible(&f.session, f.clock.now()).await;
        assert!(matches!(check, Ok(OfflineCheck::FirstRun)));
        assert!(f.offline.pending().is_none());
        assert_eq!(f.gateway.calls(Operation::PreviewOfflineAccrual), 0);
    }

    #[tokio::test]
    async fn short_absence_is_noise() {
        let f = fixture();
        assert!(f.offline.on_hidden(f.clock.now()).is_ok());
        f.clock.advance(TimeDelta::seconds(119));
        let check = f.offline.on_visible(&f.session, f.clock.now()).await;
        assert!(matches!(
            check,
            Ok(OfflineCheck::TooShort { elapsed_minutes: 1 })
        ));
        assert_eq!(
            check.map(|c| c.claimable_amount()).unwrap_or(ResourceAmounts::new(1, 1, 1, 1)),
            ResourceAmounts::ZERO
        );
    }

    #[tokio::test]
    async fn long_absence_is_claimable_then_spent() {
        let f = fixture();
        assert!(f.offline.on_hidden(f.clock.now()).is_ok());
        f.clock.advance(TimeDelta::minutes(42));

        let check = f.offline.on_visible(&f.session, f.clock.now()).await;
        assert!(matches!(check, Ok(OfflineCheck::Claimable(_))));
        let expected = ResourceAmounts::new(210, 126, 168, 84);
        assert_eq!(check.map(|c| c.claimable_amount()).ok(), Some(expected));
        let pending = f.offline.pending();
        assert_eq!(pending.as_ref().map(|c| c.elapsed_minutes), Some(42));
        assert_eq!(pending.and_then(|c| c.local_estimate), Some(expected));

        let ledger = f.offline.claim(&f.session, f.clock.now()).await;
        assert_eq!(
            ledger.map(|l| l.resources).ok(),
            Some(ResourceAmounts::new(710, 426, 568, 184))
        );

        // Re-stamped: an immediate second visit offers nothing.
        let again = f.offline.on_visible(&f.session, f.clock.now()).await;
        assert!(matches!(
            again,
            Ok(OfflineCheck::TooShort { elapsed_minutes: 0 })
        ));
        assert!(matches!(
            f.offline.claim(&f.session, f.clock.now()).await,
            Err(SyncError::NothingToClaim)
        ));
    }

    #[tokio::test]
    async fn failed_claim_stays_pending() {
        let f = fixture();
        assert!(f.offline.on_hidden(f.clock.now()).is_ok());
        f.clock.advance(TimeDelta::minutes(10));
        assert!(f.offline.on_visible(&f.session, f.clock.now()).await.is_ok());

        f.gateway.fail_next(
            Operation::CommitOfflineAccrual,
            GatewayError::Transport(String::from("timeout")),
        );
        let failed = f.offline.claim(&f.session, f.clock.now()).await;
        assert!(matches!(failed, Err(SyncError::Gateway(GatewayError::Transport(_)))));
        assert!(f.offline.pending().is_some());

        assert!(f.offline.claim(&f.session, f.clock.now()).await.is_ok());
        assert!(f.offline.pending().is_none());
    }
}
