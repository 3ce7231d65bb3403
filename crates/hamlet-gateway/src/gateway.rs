//! The [`Gateway`] trait: one method per authority call.
//!
//! Every call carries the bearer token explicitly. The gateway never decides
//! whether a token is fresh; the session watchdog does that before handing a
//! token over, and renews on [`FailureClass::Authorization`].
//!
//! Methods return `impl Future + Send` so implementations can be used from
//! spawned tasks. The engine is generic over the gateway rather than using
//! trait objects.
//!
//! [`FailureClass::Authorization`]: crate::FailureClass::Authorization

use std::future::Future;

use hamlet_types::{
    Building, BuildingId, CompletionReceipt, DonationRequest, JobId, MoveBuildingRequest,
    Population, ResourceAmounts, ResourceLedger, SessionCredential, StartTrainingRequest,
    TrainingJob, TrainingReceipt, UnitTotals,
};

use crate::error::GatewayError;

/// Shorthand for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Request/response access to the authoritative village state.
pub trait Gateway: Send + Sync + 'static {
    /// Fetch the caller's current ledger.
    fn get_ledger(&self, token: &str) -> impl Future<Output = GatewayResult<ResourceLedger>> + Send;

    /// Fetch the caller's population figures.
    fn get_population(&self, token: &str)
    -> impl Future<Output = GatewayResult<Population>> + Send;

    /// Fetch the caller's trained units per kind.
    fn get_units(&self, token: &str) -> impl Future<Output = GatewayResult<UnitTotals>> + Send;

    /// Fetch the caller's buildings (used for the local production preview).
    fn get_buildings(
        &self,
        token: &str,
    ) -> impl Future<Output = GatewayResult<Vec<Building>>> + Send;

    /// Ask how much the authority would credit for `elapsed_minutes` away.
    fn preview_offline_accrual(
        &self,
        token: &str,
        elapsed_minutes: u64,
    ) -> impl Future<Output = GatewayResult<ResourceAmounts>> + Send;

    /// Credit offline production for `elapsed_minutes` and return the new ledger.
    fn commit_offline_accrual(
        &self,
        token: &str,
        elapsed_minutes: u64,
    ) -> impl Future<Output = GatewayResult<ResourceLedger>> + Send;

    /// Fetch the caller's training queue.
    fn get_training_queue(
        &self,
        token: &str,
    ) -> impl Future<Output = GatewayResult<Vec<TrainingJob>>> + Send;

    /// Queue a training batch, paying its cost.
    fn start_training(
        &self,
        token: &str,
        request: &StartTrainingRequest,
    ) -> impl Future<Output = GatewayResult<TrainingReceipt>> + Send;

    /// Collect a finished training job.
    ///
    /// A job that is already gone answers [`GatewayError::Conflict`].
    fn complete_training(
        &self,
        token: &str,
        job_id: JobId,
    ) -> impl Future<Output = GatewayResult<CompletionReceipt>> + Send;

    /// Hand resources to another player.
    fn donate(
        &self,
        token: &str,
        request: &DonationRequest,
    ) -> impl Future<Output = GatewayResult<ResourceLedger>> + Send;

    /// Move a building to another grid cell.
    fn move_building(
        &self,
        token: &str,
        building_id: BuildingId,
        request: MoveBuildingRequest,
    ) -> impl Future<Output = GatewayResult<ResourceLedger>> + Send;

    /// Remove a building.
    fn delete_building(
        &self,
        token: &str,
        building_id: BuildingId,
    ) -> impl Future<Output = GatewayResult<ResourceLedger>> + Send;

    /// Exchange `token` for a fresh credential. The old token stops working.
    fn refresh_credential(
        &self,
        token: &str,
    ) -> impl Future<Output = GatewayResult<SessionCredential>> + Send;
}
