//! In-process [`Gateway`] over an [`Authority`], with fault injection.
//!
//! Tests and offline demos use [`LocalGateway`] in place of the HTTP
//! gateway. It can queue a failure per [`Operation`], add latency to every
//! call, and count how many times each operation was invoked.
//!
//! The authority lock is never held across an await point, so the futures
//! stay `Send` and concurrent callers interleave at the latency sleep the
//! way they would at a network round trip.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hamlet_gateway::{Gateway, GatewayError, GatewayResult};
use hamlet_types::{
    Building, BuildingId, Clock, CompletionReceipt, DonationRequest, JobId, MoveBuildingRequest,
    Population, ResourceAmounts, ResourceLedger, SessionCredential, StartTrainingRequest,
    TrainingJob, TrainingReceipt, UnitTotals, UserId, VillageSeed,
};
use tracing::debug;

use crate::authority::Authority;
use crate::error::AuthorityError;

/// One gateway call, for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    /// [`Gateway::get_ledger`].
    GetLedger,
    /// [`Gateway::get_population`].
    GetPopulation,
    /// [`Gateway::get_units`].
    GetUnits,
    /// [`Gateway::get_buildings`].
    GetBuildings,
    /// [`Gateway::preview_offline_accrual`].
    PreviewOfflineAccrual,
    /// [`Gateway::commit_offline_accrual`].
    CommitOfflineAccrual,
    /// [`Gateway::get_training_queue`].
    GetTrainingQueue,
    /// [`Gateway::start_training`].
    StartTraining,
    /// [`Gateway::complete_training`].
    CompleteTraining,
    /// [`Gateway::donate`].
    Donate,
    /// [`Gateway::move_building`].
    MoveBuilding,
    /// [`Gateway::delete_building`].
    DeleteBuilding,
    /// [`Gateway::refresh_credential`].
    RefreshCredential,
}

/// Injected behaviour and call bookkeeping.
#[derive(Debug, Default)]
struct Faults {
    queued: HashMap<Operation, VecDeque<GatewayError>>,
    calls: HashMap<Operation, u64>,
    latency: Duration,
}

/// A [`Gateway`] that calls straight into a shared [`Authority`].
#[derive(Debug, Clone)]
pub struct LocalGateway {
    authority: Arc<Mutex<Authority>>,
    clock: Arc<dyn Clock>,
    faults: Arc<Mutex<Faults>>,
}

impl LocalGateway {
    /// Wrap `authority`, reading time from `clock`.
    pub fn new(authority: Authority, clock: Arc<dyn Clock>) -> Self {
        Self {
            authority: Arc::new(Mutex::new(authority)),
            clock,
            faults: Arc::new(Mutex::new(Faults::default())),
        }
    }

    /// Run `f` against the authority outside any gateway call.
    pub fn with_authority<T>(&self, f: impl FnOnce(&mut Authority) -> T) -> T {
        let mut guard = self.authority.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Seed a new village at the current clock time.
    pub fn seed_village(&self) -> Result<VillageSeed, AuthorityError> {
        let now = self.clock.now();
        self.with_authority(|authority| authority.seed_village(now))
    }

    /// Make the next call to `op` fail with `error`. Failures queue up.
    pub fn fail_next(&self, op: Operation, error: GatewayError) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.queued.entry(op).or_default().push_back(error);
    }

    /// Delay every call by `latency` before it reaches the authority.
    pub fn set_latency(&self, latency: Duration) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.latency = latency;
    }

    /// How many times `op` has been invoked (including injected failures).
    pub fn calls(&self, op: Operation) -> u64 {
        let faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        faults.calls.get(&op).copied().unwrap_or(0)
    }

    /// Count the call, wait out the latency, and pop an injected failure.
    async fn admit(&self, op: Operation) -> GatewayResult<()> {
        let latency = {
            let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
            let count = faults.calls.entry(op).or_insert(0);
            *count = count.saturating_add(1);
            faults.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let injected = {
            let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
            faults.queued.get_mut(&op).and_then(VecDeque::pop_front)
        };
        if let Some(err) = injected {
            debug!(?op, error = %err, "injected gateway failure");
            return Err(err);
        }
        Ok(())
    }

    /// Admit the call, authenticate `token`, then apply `f`.
    async fn run<T, F>(&self, op: Operation, token: &str, f: F) -> GatewayResult<T>
    where
        F: FnOnce(&mut Authority, UserId, DateTime<Utc>) -> Result<T, AuthorityError> + Send,
    {
        self.admit(op).await?;
        let now = self.clock.now();
        self.with_authority(|authority| {
            let user_id = authority.authenticate(token, now)?;
            f(authority, user_id, now)
        })
        .map_err(GatewayError::from)
    }
}

impl Gateway for LocalGateway {
    async fn get_ledger(&self, token: &str) -> GatewayResult<ResourceLedger> {
        self.run(Operation::GetLedger, token, |a, user, now| a.ledger(user, now))
            .await
    }

    async fn get_population(&self, token: &str) -> GatewayResult<Population> {
        self.run(Operation::GetPopulation, token, |a, user, now| {
            a.population(user, now)
        })
        .await
    }

    async fn get_units(&self, token: &str) -> GatewayResult<UnitTotals> {
        self.run(Operation::GetUnits, token, |a, user, _| a.units(user))
            .await
    }

    async fn get_buildings(&self, token: &str) -> GatewayResult<Vec<Building>> {
        self.run(Operation::GetBuildings, token, |a, user, _| a.buildings(user))
            .await
    }

    async fn preview_offline_accrual(
        &self,
        token: &str,
        elapsed_minutes: u64,
    ) -> GatewayResult<ResourceAmounts> {
        self.run(Operation::PreviewOfflineAccrual, token, |a, user, now| {
            a.preview_offline(user, elapsed_minutes, now)
        })
        .await
    }

    async fn commit_offline_accrual(
        &self,
        token: &str,
        elapsed_minutes: u64,
    ) -> GatewayResult<ResourceLedger> {
        self.run(Operation::CommitOfflineAccrual, token, |a, user, now| {
            a.claim_offline(user, elapsed_minutes, now)
        })
        .await
    }

    async fn get_training_queue(&self, token: &str) -> GatewayResult<Vec<TrainingJob>> {
        self.run(Operation::GetTrainingQueue, token, |a, user, now| {
            a.training_queue(user, now)
        })
        .await
    }

    async fn start_training(
        &self,
        token: &str,
        request: &StartTrainingRequest,
    ) -> GatewayResult<TrainingReceipt> {
        self.run(Operation::StartTraining, token, |a, user, now| {
            a.start_training(user, request, now)
        })
        .await
    }

    async fn complete_training(
        &self,
        token: &str,
        job_id: JobId,
    ) -> GatewayResult<CompletionReceipt> {
        self.run(Operation::CompleteTraining, token, |a, user, now| {
            a.complete_training(user, job_id, now)
        })
        .await
    }

    async fn donate(
        &self,
        token: &str,
        request: &DonationRequest,
    ) -> GatewayResult<ResourceLedger> {
        self.run(Operation::Donate, token, |a, user, now| {
            a.donate(user, request, now)
        })
        .await
    }

    async fn move_building(
        &self,
        token: &str,
        building_id: BuildingId,
        request: MoveBuildingRequest,
    ) -> GatewayResult<ResourceLedger> {
        self.run(Operation::MoveBuilding, token, |a, user, now| {
            a.move_building(user, building_id, request, now)
        })
        .await
    }

    async fn delete_building(
        &self,
        token: &str,
        building_id: BuildingId,
    ) -> GatewayResult<ResourceLedger> {
        self.run(Operation::DeleteBuilding, token, |a, user, now| {
            a.delete_building(user, building_id, now)
        })
        .await
    }

    async fn refresh_credential(&self, token: &str) -> GatewayResult<SessionCredential> {
        self.admit(Operation::RefreshCredential).await?;
        let now = self.clock.now();
        self.with_authority(|authority| authority.refresh(token, now))
            .map_err(GatewayError::from)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use hamlet_gateway::FailureClass;
    use hamlet_types::ManualClock;

    use super::*;
    use crate::config::AuthorityConfig;

    fn gateway() -> (LocalGateway, Arc<ManualClock>, VillageSeed) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let gateway = LocalGateway::new(Authority::new(AuthorityConfig::default()), clock.clone());
        let seed = gateway.seed_village();
        assert!(seed.is_ok());
        let seed = seed.unwrap_or_else(|_| VillageSeed {
            user_id: UserId::new(),
            credential: SessionCredential {
                token: String::new(),
                expires_at: Utc::now(),
            },
            buildings: Vec::new(),
        });
        (gateway, clock, seed)
    }

    #[tokio::test]
    async fn ledger_requires_a_valid_token() {
        let (gateway, _clock, seed) = gateway();
        assert!(gateway.get_ledger(&seed.credential.token).await.is_ok());
        let denied = gateway.get_ledger("bogus").await;
        assert_eq!(
            denied.map_err(|e| e.class()).err(),
            Some(FailureClass::Authorization)
        );
        assert_eq!(gateway.calls(Operation::GetLedger), 2);
    }

    #[tokio::test]
    async fn injected_failures_fire_once_in_order() {
        let (gateway, _clock, seed) = gateway();
        let token = seed.credential.token.as_str();
        gateway.fail_next(Operation::GetLedger, GatewayError::Transport(String::from("down")));
        gateway.fail_next(Operation::GetLedger, GatewayError::Conflict(String::from("dup")));
        assert!(matches!(
            gateway.get_ledger(token).await,
            Err(GatewayError::Transport(_))
        ));
        assert!(matches!(
            gateway.get_ledger(token).await,
            Err(GatewayError::Conflict(_))
        ));
        assert!(gateway.get_ledger(token).await.is_ok());
        // Other operations are unaffected.
        assert!(gateway.get_population(token).await.is_ok());
    }

    #[tokio::test]
    async fn expired_token_is_unauthorized_until_refreshed() {
        let (gateway, clock, seed) = gateway();
        clock.advance(TimeDelta::minutes(61));
        let token = seed.credential.token.as_str();
        assert!(matches!(
            gateway.get_ledger(token).await,
            Err(GatewayError::Unauthorized(_))
        ));
        let fresh = gateway.refresh_credential(token).await;
        assert!(fresh.is_ok());
        let fresh = fresh.map(|c| c.token).unwrap_or_default();
        assert!(gateway.get_ledger(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn unit_totals_follow_the_authority() {
        let (gateway, _clock, seed) = gateway();
        let token = seed.credential.token.as_str();
        let empty = gateway.get_units(token).await;
        assert_eq!(empty.ok(), Some(UnitTotals::default()));
        assert_eq!(gateway.calls(Operation::GetUnits), 1);
        assert!(matches!(
            gateway.get_units("bogus").await,
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_calls() {
        let (gateway, _clock, seed) = gateway();
        gateway.set_latency(Duration::from_millis(250));
        let started = tokio::time::Instant::now();
        assert!(gateway.get_ledger(&seed.credential.token).await.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(250));
    }
}
