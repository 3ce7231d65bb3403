//! The [`SyncEngine`]: one player's sync context.
//!
//! The engine owns everything that used to be ambient: the cached
//! projection, the training tracker, the event bus, the watchdog, and every
//! timer. It is built at session start and torn down with
//! [`SyncEngine::shutdown`] (or by dropping it).
//!
//! [`SyncEngine::start`] spawns into the engine's [`TimerSet`]:
//!
//! | Timer | Default period | Action |
//! |-------|----------------|--------|
//! | `invalidation` | on signal | re-pull the ledger after a `None` publish |
//! | `resource_poll` | 30s | re-pull the ledger |
//! | `population_poll` | 10s | re-pull population figures |
//! | `training_tick` | 1s | request completion of due jobs |
//! | `training_refetch` | 5s | replace the training queue and unit totals |
//! | `watchdog` | 5min | renew the credential if near expiry |
//!
//! Every `None` publish for this player wakes the invalidation listener.
//! Signals coalesce: invalidations that arrive while one is already pending
//! fold into a single re-pull.
//!
//! The first tick of every periodic timer runs at once, so `start` also
//! loads the queue and unit totals a player already has.
//!
//! Timer tasks hold only a weak reference to the engine, so dropping the
//! last [`SyncEngine`] handle drops the [`TimerSet`], which aborts them.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use hamlet_gateway::{Gateway, GatewayError};
use hamlet_types::{
    BuildingId, Clock, JobId, MoveBuildingRequest, MutationId, ResourceAmounts, ResourceLedger,
    SessionCredential, StartTrainingRequest, TrainingJob, TroopKind, UnitTotals, UserId,
};
use tokio::sync::{Notify, broadcast};
use tracing::{debug, info, warn};

use crate::accrual::{Claimable, OfflineAccrual, OfflineCheck};
use crate::bus::{EventBus, Subscription};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::reconcile::{MutationKind, MutationRecord, Projection, Reconciler};
use crate::session::Session;
use crate::storage::LocalStore;
use crate::timers::TimerSet;
use crate::training::{CompletionGuard, JobView, TrainingTracker};
use crate::watchdog::{SessionEvent, Watchdog};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One player's synchronization context.
pub struct SyncEngine<G: Gateway> {
    inner: Arc<EngineInner<G>>,
}

struct EngineInner<G: Gateway> {
    config: SyncConfig,
    user: UserId,
    clock: Arc<dyn Clock>,
    session: Session<G>,
    bus: EventBus,
    projection: Arc<Mutex<Projection>>,
    reconciler: Reconciler,
    training: Mutex<TrainingTracker>,
    offline: OfflineAccrual,
    invalidated: Arc<Notify>,
    listener: Mutex<Option<Subscription>>,
    timers: TimerSet,
    started: AtomicBool,
}

impl<G: Gateway> core::fmt::Debug for SyncEngine<G> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("user", &self.inner.user)
            .field("started", &self.inner.started.load(Ordering::Acquire))
            .field("timers", &self.inner.timers.names())
            .finish_non_exhaustive()
    }
}

impl<G: Gateway> SyncEngine<G> {
    /// Build an engine for `user` holding `credential`. Nothing runs until
    /// [`start`](Self::start).
    pub fn new(
        config: SyncConfig,
        user: UserId,
        credential: SessionCredential,
        gateway: G,
        store: Arc<dyn LocalStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gateway = Arc::new(gateway);
        let watchdog = Watchdog::new(
            user,
            credential,
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&clock),
            config.session.clone(),
        );
        let session = Session::new(user, gateway, watchdog);
        let bus = EventBus::new();
        let projection = Arc::new(Mutex::new(Projection::new()));
        let reconciler = Reconciler::new(user, Arc::clone(&projection), bus.clone());
        let offline = OfflineAccrual::new(user, config.offline.min_elapsed_minutes, store);

        Self {
            inner: Arc::new(EngineInner {
                config,
                user,
                clock,
                session,
                bus,
                projection,
                reconciler,
                training: Mutex::new(TrainingTracker::new()),
                offline,
                invalidated: Arc::new(Notify::new()),
                listener: Mutex::new(None),
                timers: TimerSet::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the timers and the invalidation listener. Calling it again is
    /// a no-op until [`shutdown`](Self::shutdown).
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = &self.inner;

        let signal = Arc::clone(&inner.invalidated);
        let subscription = inner.bus.subscribe(inner.user, move |payload| {
            if payload.is_none() {
                signal.notify_one();
            }
        });
        *inner.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        let weak = Arc::downgrade(inner);
        let signal = Arc::clone(&inner.invalidated);
        inner.timers.spawn("invalidation", async move {
            loop {
                signal.notified().await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = engine.refresh_ledger().await {
                    warn!(user_id = %engine.user, error = %err, "re-pull after invalidation failed");
                }
            }
        });

        let timers = &inner.config.timers;
        self.every("resource_poll", timers.resource_poll(), |engine| async move {
            if let Err(err) = engine.refresh_ledger().await {
                warn!(user_id = %engine.user, error = %err, "resource poll failed");
            }
        });
        self.every("population_poll", timers.population_poll(), |engine| async move {
            if let Err(err) = engine.refresh_population().await {
                warn!(user_id = %engine.user, error = %err, "population poll failed");
            }
        });
        self.every("training_tick", timers.training_tick(), |engine| async move {
            engine.tick_training().await;
        });
        self.every("training_refetch", timers.training_refetch(), |engine| async move {
            if let Err(err) = engine.refresh_queue().await {
                warn!(user_id = %engine.user, error = %err, "training queue re-fetch failed");
            }
        });
        self.every("watchdog", timers.watchdog_check(), |engine| async move {
            if let Err(err) = engine.session.watchdog().ensure_fresh().await {
                warn!(user_id = %engine.user, error = %err, "credential renewal failed");
            }
        });

        info!(user_id = %inner.user, timers = ?inner.timers.names(), "sync engine started");
    }

    /// Spawn a recurring timer that runs `tick` against the engine while it
    /// is alive.
    fn every<F, Fut>(&self, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(Arc<EngineInner<G>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak: Weak<EngineInner<G>> = Arc::downgrade(&self.inner);
        self.inner.timers.spawn_every(name, period, move || {
            let run = weak.upgrade().map(&tick);
            async move {
                if let Some(run) = run {
                    run.await;
                }
            }
        });
    }

    /// Stamp the last-session time, cancel every timer and echo, and drop
    /// the bus listener. The engine may be started again afterwards.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if let Err(err) = inner.offline.on_hidden(inner.clock.now()) {
            warn!(user_id = %inner.user, error = %err, "could not stamp last session");
        }
        inner.timers.cancel_all();
        inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        inner.started.store(false, Ordering::Release);
        info!(user_id = %inner.user, "sync engine stopped");
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    /// The player this engine syncs.
    pub fn user(&self) -> UserId {
        self.inner.user
    }

    /// The engine's event bus. UI panels subscribe here.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Watchdog progress for a status panel.
    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.session.watchdog().subscribe()
    }

    /// The current credential.
    pub fn credential(&self) -> SessionCredential {
        self.inner.session.watchdog().credential()
    }

    /// Names of the running timers.
    pub fn active_timers(&self) -> Vec<&'static str> {
        self.inner.timers.names()
    }

    /// The cached ledger, if one has been loaded.
    pub fn ledger(&self) -> Option<ResourceLedger> {
        self.inner.projection().ledger().cloned()
    }

    /// The cached unit totals.
    pub fn units(&self) -> UnitTotals {
        self.inner.projection().units().clone()
    }

    /// One mutation's record.
    pub fn mutation(&self, id: MutationId) -> Option<MutationRecord> {
        self.inner.projection().mutation(id).cloned()
    }

    /// Training queue rows with countdowns at the current time.
    pub fn training_view(&self) -> Vec<JobView> {
        let now = self.inner.clock.now();
        self.inner.tracker().views(now)
    }

    /// Offline production waiting to be claimed.
    pub fn pending_offline(&self) -> Option<Claimable> {
        self.inner.offline.pending()
    }

    // -----------------------------------------------------------------------
    // Authoritative re-pulls
    // -----------------------------------------------------------------------

    /// Replace the projection with the authority's ledger.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure; the projection is left as it was.
    pub async fn refresh_ledger(&self) -> Result<ResourceLedger, SyncError> {
        self.inner.refresh_ledger().await
    }

    /// Replace the population fields of the projection.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure.
    pub async fn refresh_population(&self) -> Result<(), SyncError> {
        self.inner.refresh_population().await
    }

    /// Replace the training queue and unit totals with the authority's
    /// listing.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure; what was not fetched is left as it was.
    pub async fn refresh_queue(&self) -> Result<(), SyncError> {
        self.inner.refresh_queue().await
    }

    /// Replace the unit totals with the authority's.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure; the totals are left as they were.
    pub async fn refresh_units(&self) -> Result<UnitTotals, SyncError> {
        self.inner.refresh_units().await
    }

    /// Request completion of every job whose countdown has finished.
    /// Returns the number of requests sent.
    pub async fn tick_training(&self) -> usize {
        self.inner.tick_training().await
    }

    // -----------------------------------------------------------------------
    // Offline accrual
    // -----------------------------------------------------------------------

    /// The player left: stamp the last-session time.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the stamp cannot be written.
    pub fn on_hidden(&self) -> Result<(), SyncError> {
        self.inner.offline.on_hidden(self.inner.clock.now())
    }

    /// The player came back: work out what they earned while away.
    ///
    /// # Errors
    ///
    /// Returns the store or gateway failure.
    pub async fn on_visible(&self) -> Result<OfflineCheck, SyncError> {
        let now = self.inner.clock.now();
        self.inner.offline.on_visible(&self.inner.session, now).await
    }

    /// Commit the pending offline claim and install the new ledger.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NothingToClaim`], or the gateway failure (the
    /// claim stays pending).
    pub async fn claim_offline(&self) -> Result<ResourceLedger, SyncError> {
        let inner = &self.inner;
        let ledger = inner.offline.claim(&inner.session, inner.clock.now()).await?;
        inner.install(&ledger);
        Ok(ledger)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Queue a training batch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Advisory`] if the local guard refused, or the
    /// gateway failure.
    pub async fn start_training(
        &self,
        troop_kind: TroopKind,
        building_id: BuildingId,
        quantity: u32,
    ) -> Result<(MutationId, TrainingJob), SyncError> {
        let inner = &self.inner;
        let request = StartTrainingRequest {
            troop_kind,
            building_id,
            quantity,
        };
        let kind = MutationKind::StartTraining {
            troop_kind,
            building_id,
            quantity,
        };
        let (id, receipt) = inner
            .reconciler
            .submit(kind, || {
                inner.session.call("start_training", |g, token| {
                    let request = request.clone();
                    async move { g.start_training(&token, &request).await }
                })
            })
            .await?;
        inner.tracker().insert(receipt.job.clone());
        info!(
            user_id = %inner.user,
            job_id = %receipt.job.id,
            troop_kind = ?troop_kind,
            quantity,
            ends_at = %receipt.job.ends_at,
            "training queued"
        );
        Ok((id, receipt.job))
    }

    /// Request completion of one job, whether or not its countdown was
    /// noticed by the tick.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure; the job is then offered for collect.
    pub async fn complete_training(&self, job_id: JobId) -> Result<(), SyncError> {
        self.inner.complete(job_id).await
    }

    /// Manual "collect" for a finished job still listed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownJob`] or [`SyncError::NotDue`] before
    /// sending, or the gateway failure.
    pub async fn collect(&self, job_id: JobId) -> Result<(), SyncError> {
        let now = self.inner.clock.now();
        self.inner.tracker().begin_collect(job_id, now)?;
        self.inner.complete(job_id).await
    }

    /// Give resources to another player.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Advisory`] if the local guard refused, or the
    /// gateway failure.
    pub async fn donate(
        &self,
        recipient: UserId,
        amounts: ResourceAmounts,
    ) -> Result<MutationId, SyncError> {
        let inner = &self.inner;
        let request = hamlet_types::DonationRequest { recipient, amounts };
        let kind = MutationKind::Donate { recipient, amounts };
        let (id, _) = inner
            .reconciler
            .submit(kind, || {
                inner.session.call("donate", |g, token| {
                    let request = request.clone();
                    async move { g.donate(&token, &request).await }
                })
            })
            .await?;
        info!(user_id = %inner.user, recipient = %recipient, total = amounts.total(), "donation sent");
        Ok(id)
    }

    /// Move a building.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure.
    pub async fn move_building(
        &self,
        building_id: BuildingId,
        x: u32,
        y: u32,
    ) -> Result<MutationId, SyncError> {
        let inner = &self.inner;
        let kind = MutationKind::MoveBuilding { building_id, x, y };
        let (id, _) = inner
            .reconciler
            .submit(kind, || {
                inner.session.call("move_building", move |g, token| async move {
                    g.move_building(&token, building_id, MoveBuildingRequest { x, y })
                        .await
                })
            })
            .await?;
        debug!(user_id = %inner.user, building_id = %building_id, x, y, "building moved");
        Ok(id)
    }

    /// Remove a building.
    ///
    /// # Errors
    ///
    /// Returns the gateway failure.
    pub async fn delete_building(&self, building_id: BuildingId) -> Result<MutationId, SyncError> {
        let inner = &self.inner;
        let kind = MutationKind::DeleteBuilding { building_id };
        let (id, _) = inner
            .reconciler
            .submit(kind, || {
                inner.session.call("delete_building", move |g, token| async move {
                    g.delete_building(&token, building_id).await
                })
            })
            .await?;
        info!(user_id = %inner.user, building_id = %building_id, "building removed");
        Ok(id)
    }

    /// Another player donated to us: announce a re-pull now and again at
    /// each configured echo delay.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn on_donation_received(&self) {
        let inner = &self.inner;
        inner.bus.publish(inner.user, None);
        for delay_ms in &inner.config.bus.donation_echo_delays_ms {
            let delay = Duration::from_millis(*delay_ms);
            let bus = inner.bus.clone();
            let user = inner.user;
            inner.timers.spawn("donation_echo", async move {
                tokio::time::sleep(delay).await;
                bus.publish(user, None);
            });
        }
        debug!(
            user_id = %inner.user,
            echoes = inner.config.bus.donation_echo_delays_ms.len(),
            "donation received"
        );
    }
}

impl<G: Gateway> Clone for SyncEngine<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state used by the timers
// ---------------------------------------------------------------------------

impl<G: Gateway> EngineInner<G> {
    fn projection(&self) -> std::sync::MutexGuard<'_, Projection> {
        self.projection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, TrainingTracker> {
        self.training.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the projection and announce the new value.
    fn install(&self, ledger: &ResourceLedger) {
        let installed = self.projection().replace(ledger.clone());
        if installed {
            self.bus.publish(self.user, Some(ledger));
        }
    }

    async fn refresh_ledger(&self) -> Result<ResourceLedger, SyncError> {
        let ledger = self
            .session
            .call("get_ledger", |g, token| async move { g.get_ledger(&token).await })
            .await?;
        self.install(&ledger);
        debug!(user_id = %self.user, total = ledger.resources.total(), "ledger re-pulled");
        Ok(ledger)
    }

    async fn refresh_population(&self) -> Result<(), SyncError> {
        let population = self
            .session
            .call("get_population", |g, token| async move {
                g.get_population(&token).await
            })
            .await?;
        let changed = {
            let mut projection = self.projection();
            projection
                .replace_population(population)
                .then(|| projection.ledger().cloned())
                .flatten()
        };
        if let Some(ledger) = changed {
            self.bus.publish(self.user, Some(&ledger));
        }
        Ok(())
    }

    async fn refresh_queue(&self) -> Result<(), SyncError> {
        let jobs = self
            .session
            .call("get_training_queue", |g, token| async move {
                g.get_training_queue(&token).await
            })
            .await?;
        let count = jobs.len();
        self.tracker().replace_queue(jobs);
        debug!(user_id = %self.user, jobs = count, "training queue replaced");
        self.refresh_units().await?;
        Ok(())
    }

    async fn refresh_units(&self) -> Result<UnitTotals, SyncError> {
        let units = self
            .session
            .call("get_units", |g, token| async move { g.get_units(&token).await })
            .await?;
        self.projection().replace_units(units.clone());
        Ok(units)
    }

    async fn tick_training(&self) -> usize {
        let due = self.tracker().tick(self.clock.now());
        let mut in_flight = CompletionGuard::new(&self.training, due.clone());
        for job_id in &due {
            if let Err(err) = self.complete(*job_id).await {
                debug!(user_id = %self.user, job_id = %job_id, error = %err, "left for manual collect");
            }
            in_flight.settle(*job_id);
        }
        due.len()
    }

    async fn complete(&self, job_id: JobId) -> Result<(), SyncError> {
        let mut in_flight = CompletionGuard::new(&self.training, vec![job_id]);
        let result = self
            .session
            .call("complete_training", move |g, token| async move {
                g.complete_training(&token, job_id).await
            })
            .await;
        in_flight.settle(job_id);
        match result {
            Ok(receipt) => {
                self.tracker().confirm_completed(job_id);
                let installed = {
                    let mut projection = self.projection();
                    projection.replace_units(receipt.units.clone());
                    projection.replace(receipt.ledger.clone())
                };
                if installed {
                    self.bus.publish(self.user, Some(&receipt.ledger));
                }
                info!(user_id = %self.user, job_id = %job_id, "training completed");
                Ok(())
            }
            Err(GatewayError::Conflict(detail)) => {
                // Already completed elsewhere; re-pull both totals.
                self.tracker().confirm_completed(job_id);
                debug!(user_id = %self.user, job_id = %job_id, detail, "training already completed");
                self.bus.publish(self.user, None);
                if let Err(err) = self.refresh_units().await {
                    warn!(user_id = %self.user, error = %err, "unit totals re-pull failed");
                }
                Ok(())
            }
            Err(err) => {
                self.tracker().completion_failed(job_id);
                warn!(
                    user_id = %self.user,
                    job_id = %job_id,
                    class = ?err.class(),
                    error = %err,
                    "completion request failed, offering collect"
                );
                Err(err.into())
            }
        }
    }
}
