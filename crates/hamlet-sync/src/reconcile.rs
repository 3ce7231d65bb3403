//! Optimistic mutations reconciled against authoritative snapshots.
//!
//! Every mutating action goes through [`Reconciler::submit`]:
//!
//! 1. Advisory validation against the cached ledger. A refusal here is a
//!    validation outcome; nothing is sent.
//! 2. Optimistic apply to the [`Projection`] and an immediate bus publish
//!    of the guessed ledger.
//! 3. The gateway call.
//! 4. On success the returned snapshot *replaces* the projection (deltas
//!    are never merged) and the mutation is [`MutationPhase::Confirmed`].
//!    On failure the bus is told to re-pull; the next authoritative
//!    replacement marks the mutation [`MutationPhase::Corrected`].
//!
//! Concurrent mutations may race. Snapshots older than the one already
//! installed are ignored, so a slow response cannot roll the projection
//! back past a newer one. Correctness is only guaranteed after the next
//! authoritative pull.
//!
//! Cancelling a submit after step 2 leaves the optimistic state in place
//! until the next pull replaces it.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use hamlet_gateway::GatewayError;
use hamlet_types::{
    BuildingId, MutationId, Population, RejectionReason, ResourceAmounts, ResourceLedger,
    TrainingReceipt, TroopKind, UnitTotals, UserId,
};
use tracing::debug;

use crate::bus::EventBus;
use crate::error::SyncError;

/// Settled mutations kept for inspection.
const SETTLED_HISTORY: usize = 64;

/// Lifecycle of one optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    /// Applied locally, not yet confirmed.
    Pending,
    /// The authority accepted it and its snapshot was installed.
    Confirmed,
    /// It failed and a later authoritative snapshot replaced the guess.
    Corrected,
}

/// What a mutation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    /// Spend resources and housing on a training batch.
    StartTraining {
        /// Unit kind.
        troop_kind: TroopKind,
        /// Barracks to train at.
        building_id: BuildingId,
        /// Batch size.
        quantity: u32,
    },
    /// Give resources to another player.
    Donate {
        /// Receiving player.
        recipient: UserId,
        /// Amounts to give.
        amounts: ResourceAmounts,
    },
    /// Move a building.
    MoveBuilding {
        /// Building to move.
        building_id: BuildingId,
        /// Target column.
        x: u32,
        /// Target row.
        y: u32,
    },
    /// Remove a building.
    DeleteBuilding {
        /// Building to remove.
        building_id: BuildingId,
    },
}

impl MutationKind {
    /// Short name for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartTraining { .. } => "start_training",
            Self::Donate { .. } => "donate",
            Self::MoveBuilding { .. } => "move_building",
            Self::DeleteBuilding { .. } => "delete_building",
        }
    }

    /// Resources the mutation is expected to spend.
    pub fn expected_cost(&self) -> Option<ResourceAmounts> {
        match self {
            Self::StartTraining {
                troop_kind,
                quantity,
                ..
            } => troop_kind.batch_cost(*quantity),
            Self::Donate { amounts, .. } => Some(*amounts),
            Self::MoveBuilding { .. } | Self::DeleteBuilding { .. } => Some(ResourceAmounts::ZERO),
        }
    }

    /// Housing the mutation is expected to occupy.
    pub fn expected_housing(&self) -> Option<u32> {
        match self {
            Self::StartTraining {
                troop_kind,
                quantity,
                ..
            } => troop_kind.batch_housing(*quantity),
            Self::Donate { .. } | Self::MoveBuilding { .. } | Self::DeleteBuilding { .. } => Some(0),
        }
    }
}

/// One mutation and where it stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    /// Mutation ID.
    pub id: MutationId,
    /// What it does.
    pub kind: MutationKind,
    /// Where it stands.
    pub phase: MutationPhase,
    /// The failure, if the authority call failed.
    pub failure: Option<GatewayError>,
}

/// A response that carries an authoritative ledger.
pub trait Authoritative {
    /// The snapshot to install.
    fn ledger(&self) -> &ResourceLedger;
}

impl Authoritative for ResourceLedger {
    fn ledger(&self) -> &ResourceLedger {
        self
    }
}

impl Authoritative for TrainingReceipt {
    fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }
}

/// The client's cached copy of the authoritative state.
#[derive(Debug, Default)]
pub struct Projection {
    ledger: Option<ResourceLedger>,
    units: UnitTotals,
    revision: u64,
    mutations: BTreeMap<MutationId, MutationRecord>,
}

impl Projection {
    /// Empty projection; nothing loaded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached ledger, if one has been loaded.
    pub const fn ledger(&self) -> Option<&ResourceLedger> {
        self.ledger.as_ref()
    }

    /// Cached unit totals.
    pub const fn units(&self) -> &UnitTotals {
        &self.units
    }

    /// Bumped on every change.
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// One mutation's record.
    pub fn mutation(&self, id: MutationId) -> Option<&MutationRecord> {
        self.mutations.get(&id)
    }

    /// Install an authoritative snapshot.
    ///
    /// Returns `false` (and changes nothing) if `snapshot` is older than
    /// the installed one. Failed mutations still pending become
    /// [`MutationPhase::Corrected`].
    pub fn replace(&mut self, snapshot: ResourceLedger) -> bool {
        if let Some(current) = &self.ledger {
            if snapshot.last_synced_at < current.last_synced_at {
                debug!(
                    stale = %snapshot.last_synced_at,
                    installed = %current.last_synced_at,
                    "ignoring stale snapshot"
                );
                return false;
            }
        }
        self.ledger = Some(snapshot);
        self.bump();
        for record in self.mutations.values_mut() {
            if record.phase == MutationPhase::Pending && record.failure.is_some() {
                record.phase = MutationPhase::Corrected;
            }
        }
        true
    }

    /// Install authoritative population figures into the cached ledger.
    pub fn replace_population(&mut self, population: Population) -> bool {
        let Some(ledger) = self.ledger.as_mut() else {
            return false;
        };
        if ledger.population == population.population
            && ledger.max_population == population.max_population
        {
            return false;
        }
        ledger.population = population.population;
        ledger.max_population = population.max_population;
        self.bump();
        true
    }

    /// Install authoritative unit totals.
    pub fn replace_units(&mut self, units: UnitTotals) {
        self.units = units;
        self.bump();
    }

    /// Apply a guessed effect to the cached ledger.
    ///
    /// Resources saturate at zero: the guess is never more wrong than
    /// "empty".
    pub fn apply_optimistic(&mut self, cost: &ResourceAmounts, housing: u32) {
        if let Some(ledger) = self.ledger.as_mut() {
            ledger.resources = ledger.resources.saturating_sub(cost);
            ledger.population = ledger.population.saturating_add(housing);
            self.bump();
        }
    }

    fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    fn record(&mut self, id: MutationId, kind: MutationKind) {
        self.mutations.insert(
            id,
            MutationRecord {
                id,
                kind,
                phase: MutationPhase::Pending,
                failure: None,
            },
        );
        self.prune();
    }

    fn settle(&mut self, id: MutationId, outcome: Result<(), GatewayError>) {
        if let Some(record) = self.mutations.get_mut(&id) {
            match outcome {
                Ok(()) => record.phase = MutationPhase::Confirmed,
                Err(err) => record.failure = Some(err),
            }
        }
    }

    fn prune(&mut self) {
        let settled: Vec<MutationId> = self
            .mutations
            .values()
            .filter(|r| r.phase != MutationPhase::Pending)
            .map(|r| r.id)
            .collect();
        let excess = settled.len().saturating_sub(SETTLED_HISTORY);
        for id in settled.into_iter().take(excess) {
            self.mutations.remove(&id);
        }
    }
}

/// Runs mutations through the optimistic protocol for one player.
#[derive(Debug, Clone)]
pub struct Reconciler {
    user: UserId,
    projection: Arc<Mutex<Projection>>,
    bus: EventBus,
}

impl Reconciler {
    /// Reconcile `user`'s mutations into `projection`, announcing on `bus`.
    pub const fn new(user: UserId, projection: Arc<Mutex<Projection>>, bus: EventBus) -> Self {
        Self {
            user,
            projection,
            bus,
        }
    }

    /// Check `kind` against the cached ledger. Passes when nothing is
    /// cached yet; the authority decides.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Advisory`] if the local guard refuses.
    pub fn validate(&self, kind: &MutationKind) -> Result<(), SyncError> {
        match kind {
            MutationKind::StartTraining { quantity: 0, .. } => {
                return Err(SyncError::advisory(
                    RejectionReason::InvalidQuantity,
                    "quantity must be at least 1",
                ));
            }
            MutationKind::Donate { amounts, .. } if amounts.is_zero() => {
                return Err(SyncError::advisory(
                    RejectionReason::InvalidQuantity,
                    "donation must include at least one resource",
                ));
            }
            _ => {}
        }

        let projection = self.projection.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(ledger) = projection.ledger() else {
            return Ok(());
        };
        let cost = kind.expected_cost().ok_or_else(|| {
            SyncError::advisory(RejectionReason::InvalidQuantity, "batch is too large")
        })?;
        if !ledger.can_afford(&cost) {
            return Err(SyncError::advisory(
                RejectionReason::InsufficientResources,
                format!("{} needs more resources than are on hand", kind.name()),
            ));
        }
        let housing = kind.expected_housing().ok_or_else(|| {
            SyncError::advisory(RejectionReason::InvalidQuantity, "batch is too large")
        })?;
        if housing > ledger.free_housing() {
            return Err(SyncError::advisory(
                RejectionReason::PopulationCap,
                "not enough free housing",
            ));
        }
        Ok(())
    }

    /// Run one mutation through validate, optimistic apply, send and
    /// reconcile.
    ///
    /// Returns the mutation ID alongside the authority's response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Advisory`] if the local guard refused (nothing
    /// was sent), or [`SyncError::Gateway`] if the call failed.
    pub async fn submit<T, F, Fut>(
        &self,
        kind: MutationKind,
        send: F,
    ) -> Result<(MutationId, T), SyncError>
    where
        T: Authoritative,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        if let Err(err) = self.validate(&kind) {
            debug!(user_id = %self.user, mutation = kind.name(), error = %err, "mutation refused locally");
            return Err(err);
        }

        let id = MutationId::new();
        let name = kind.name();
        let guessed = {
            let mut projection = self.projection.lock().unwrap_or_else(PoisonError::into_inner);
            let cost = kind.expected_cost().unwrap_or(ResourceAmounts::ZERO);
            let housing = kind.expected_housing().unwrap_or(0);
            projection.record(id, kind);
            projection.apply_optimistic(&cost, housing);
            projection.ledger().cloned()
        };
        if let Some(guess) = &guessed {
            self.bus.publish(self.user, Some(guess));
        }
        debug!(user_id = %self.user, mutation = name, mutation_id = %id, "optimistic apply");

        match send().await {
            Ok(response) => {
                let installed = {
                    let mut projection =
                        self.projection.lock().unwrap_or_else(PoisonError::into_inner);
                    projection.settle(id, Ok(()));
                    projection.replace(response.ledger().clone())
                };
                if installed {
                    self.bus.publish(self.user, Some(response.ledger()));
                }
                debug!(user_id = %self.user, mutation = name, mutation_id = %id, "confirmed");
                Ok((id, response))
            }
            Err(err) => {
                {
                    let mut projection =
                        self.projection.lock().unwrap_or_else(PoisonError::into_inner);
                    projection.settle(id, Err(err.clone()));
                }
                debug!(
                    user_id = %self.user,
                    mutation = name,
                    mutation_id = %id,
                    class = ?err.class(),
                    error = %err,
                    "mutation failed, re-pull requested"
                );
                self.bus.publish(self.user, None);
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{TimeDelta, Utc};

    use super::*;

    fn ledger(wood: u64, population: u32) -> ResourceLedger {
        ResourceLedger {
            resources: ResourceAmounts::new(wood, 500, 500, 500),
            population,
            max_population: 30,
            last_synced_at: Utc::now(),
        }
    }

    fn reconciler(initial: Option<ResourceLedger>) -> (Reconciler, Arc<Mutex<Projection>>, EventBus) {
        let projection = Arc::new(Mutex::new(Projection::new()));
        if let Some(initial) = initial {
            projection
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .replace(initial);
        }
        let bus = EventBus::new();
        let user = UserId::new();
        (
            Reconciler::new(user, Arc::clone(&projection), bus.clone()),
            projection,
            bus,
        )
    }

    fn cached(projection: &Arc<Mutex<Projection>>) -> Option<ResourceLedger> {
        projection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ledger()
            .cloned()
    }

    fn train(quantity: u32) -> MutationKind {
        MutationKind::StartTraining {
            troop_kind: TroopKind::Spearman,
            building_id: BuildingId::new(),
            quantity,
        }
    }

    #[test]
    fn advisory_guard_checks_cost_and_housing() {
        let (rec, _, _) = reconciler(Some(ledger(100, 29)));
        assert!(rec.validate(&train(1)).is_ok());
        assert!(matches!(
            rec.validate(&train(3)),
            Err(SyncError::Advisory { reason: RejectionReason::InsufficientResources, .. })
        ));
        assert!(matches!(
            rec.validate(&train(0)),
            Err(SyncError::Advisory { reason: RejectionReason::InvalidQuantity, .. })
        ));

        let (crowded, _, _) = reconciler(Some(ledger(10_000, 30)));
        assert!(matches!(
            crowded.validate(&train(1)),
            Err(SyncError::Advisory { reason: RejectionReason::PopulationCap, .. })
        ));
    }

    #[test]
    fn nothing_cached_defers_to_the_authority() {
        let (rec, _, _) = reconciler(None);
        assert!(rec.validate(&train(500)).is_ok());
    }

    #[tokio::test]
    async fn success_replaces_rather_than_merges() {
        let start = ledger(500, 0);
        let (rec, projection, _) = reconciler(Some(start.clone()));

        // The authority charged something different from the local guess.
        let mut authoritative = start.clone();
        authoritative.resources.wood = 123;
        authoritative.population = 7;
        authoritative.last_synced_at = start.last_synced_at + TimeDelta::seconds(1);
        let reply = authoritative.clone();

        let result = rec.submit(train(2), || async move { Ok(reply) }).await;
        assert!(result.is_ok());
        let id = result.map(|(id, _)| id).ok();

        assert_eq!(cached(&projection), Some(authoritative));
        let phase = id.and_then(|id| {
            projection
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .mutation(id)
                .map(|r| r.phase)
        });
        assert_eq!(phase, Some(MutationPhase::Confirmed));
    }

    #[tokio::test]
    async fn optimistic_guess_is_published_before_the_call() {
        let (rec, projection, bus) = reconciler(Some(ledger(500, 0)));
        let user = rec.user;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = bus.subscribe(user, move |payload| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(payload.map(|l| l.resources.wood));
        });

        let during = Arc::clone(&projection);
        let result = rec
            .submit(train(2), || async move {
                // Inside the call the guess is already installed.
                let wood = cached(&during).map(|l| l.resources.wood);
                assert_eq!(wood, Some(400));
                Err::<ResourceLedger, _>(GatewayError::Transport(String::from("timeout")))
            })
            .await;
        assert!(matches!(result, Err(SyncError::Gateway(GatewayError::Transport(_)))));

        let seen = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(seen, vec![Some(400), None]);
        // The guess stays until the next authoritative pull.
        assert_eq!(cached(&projection).map(|l| l.resources.wood), Some(400));
    }

    #[tokio::test]
    async fn failed_mutation_is_corrected_by_the_next_pull() {
        let start = ledger(500, 0);
        let (rec, projection, _) = reconciler(Some(start.clone()));
        let result = rec
            .submit(train(1), || async {
                Err::<ResourceLedger, _>(GatewayError::Transport(String::from("reset")))
            })
            .await;
        assert!(result.is_err());

        let pending = {
            let projection = projection.lock().unwrap_or_else(PoisonError::into_inner);
            projection
                .mutations
                .values()
                .map(|r| r.phase)
                .collect::<Vec<_>>()
        };
        assert_eq!(pending, vec![MutationPhase::Pending]);

        let mut pulled = start;
        pulled.last_synced_at += TimeDelta::seconds(30);
        let mut guard = projection.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(guard.replace(pulled.clone()));
        assert_eq!(guard.ledger(), Some(&pulled));
        let phases: Vec<_> = guard.mutations.values().map(|r| r.phase).collect();
        assert_eq!(phases, vec![MutationPhase::Corrected]);
    }

    #[tokio::test]
    async fn refused_mutation_sends_nothing() {
        let (rec, projection, _) = reconciler(Some(ledger(10, 0)));
        let sent = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&sent);
        let result = rec
            .submit(train(5), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ledger(0, 0))
            })
            .await;
        assert!(matches!(result, Err(SyncError::Advisory { .. })));
        assert_eq!(sent.load(Ordering::SeqCst), 0);
        assert_eq!(cached(&projection).map(|l| l.resources.wood), Some(10));
    }

    #[test]
    fn stale_snapshots_are_ignored() {
        let mut projection = Projection::new();
        let newer = ledger(300, 0);
        let mut older = ledger(999, 0);
        older.last_synced_at = newer.last_synced_at - TimeDelta::seconds(5);
        assert!(projection.replace(newer.clone()));
        assert!(!projection.replace(older));
        assert_eq!(projection.ledger(), Some(&newer));
    }

    #[test]
    fn population_poll_updates_only_population_fields() {
        let mut projection = Projection::new();
        assert!(!projection.replace_population(Population {
            population: 1,
            max_population: 2,
        }));
        projection.replace(ledger(300, 0));
        assert!(projection.replace_population(Population {
            population: 4,
            max_population: 40,
        }));
        let cached = projection.ledger().cloned();
        assert_eq!(cached.as_ref().map(|l| l.population), Some(4));
        assert_eq!(cached.as_ref().map(|l| l.max_population), Some(40));
        assert_eq!(cached.map(|l| l.resources.wood), Some(300));
    }
}
