//! REST endpoint handlers for the development server.
//!
//! Every authenticated handler resolves the bearer token, applies one
//! authority operation at the server's current time, and returns the
//! authoritative result as JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/ledger` | Current ledger |
//! | `GET` | `/api/population` | Population figures |
//! | `GET` | `/api/units` | Unit totals |
//! | `GET` | `/api/buildings` | Buildings |
//! | `GET` | `/api/offline-accrual` | Offline accrual preview |
//! | `POST` | `/api/offline-accrual/claim` | Commit offline accrual |
//! | `GET` | `/api/training` | Training queue |
//! | `POST` | `/api/training` | Start training |
//! | `POST` | `/api/training/{id}/complete` | Complete a job |
//! | `POST` | `/api/donations` | Donate resources |
//! | `POST` | `/api/buildings/{id}/move` | Move a building |
//! | `DELETE` | `/api/buildings/{id}` | Delete a building |
//! | `POST` | `/api/session/refresh` | Refresh a credential |
//! | `POST` | `/api/dev/villages` | Seed a village |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use hamlet_gateway::wire::AccrualQuery;
use hamlet_types::{
    AccrualClaimRequest, Building, BuildingId, CompletionReceipt, DonationRequest, JobId,
    MoveBuildingRequest, Population, ResourceAmounts, ResourceLedger, SessionCredential,
    StartTrainingRequest, TrainingJob, TrainingReceipt, UnitTotals, VillageSeed,
};
use tracing::info;

use crate::error::{ApiError, Bearer};
use crate::state::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// `GET /api/ledger`
pub async fn get_ledger(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
) -> ApiResult<ResourceLedger> {
    state
        .authorized(&token, |a, user, now| a.ledger(user, now))
        .await
        .map(Json)
}

/// `GET /api/population`
pub async fn get_population(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
) -> ApiResult<Population> {
    state
        .authorized(&token, |a, user, now| a.population(user, now))
        .await
        .map(Json)
}

/// `GET /api/units`
pub async fn get_units(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
) -> ApiResult<UnitTotals> {
    state
        .authorized(&token, |a, user, _| a.units(user))
        .await
        .map(Json)
}

/// `GET /api/buildings`
pub async fn get_buildings(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
) -> ApiResult<Vec<Building>> {
    state
        .authorized(&token, |a, user, _| a.buildings(user))
        .await
        .map(Json)
}

/// `GET /api/training`
pub async fn get_training_queue(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
) -> ApiResult<Vec<TrainingJob>> {
    state
        .authorized(&token, |a, user, now| a.training_queue(user, now))
        .await
        .map(Json)
}

// ---------------------------------------------------------------------------
// Offline accrual
// ---------------------------------------------------------------------------

/// `GET /api/offline-accrual?elapsed_minutes=N`
pub async fn preview_offline_accrual(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Query(query): Query<AccrualQuery>,
) -> ApiResult<ResourceAmounts> {
    state
        .authorized(&token, |a, user, now| {
            a.preview_offline(user, query.elapsed_minutes, now)
        })
        .await
        .map(Json)
}

/// `POST /api/offline-accrual/claim`
pub async fn commit_offline_accrual(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Json(request): Json<AccrualClaimRequest>,
) -> ApiResult<ResourceLedger> {
    state
        .authorized(&token, |a, user, now| {
            a.claim_offline(user, request.elapsed_minutes, now)
        })
        .await
        .map(Json)
}

// ---------------------------------------------------------------------------
// Training
// ---------------------------------------------------------------------------

/// `POST /api/training`
pub async fn start_training(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Json(request): Json<StartTrainingRequest>,
) -> ApiResult<TrainingReceipt> {
    state
        .authorized(&token, |a, user, now| a.start_training(user, &request, now))
        .await
        .map(Json)
}

/// `POST /api/training/{id}/complete`
pub async fn complete_training(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Path(job_id): Path<JobId>,
) -> ApiResult<CompletionReceipt> {
    state
        .authorized(&token, |a, user, now| a.complete_training(user, job_id, now))
        .await
        .map(Json)
}

// ---------------------------------------------------------------------------
// Donations and buildings
// ---------------------------------------------------------------------------

/// `POST /api/donations`
pub async fn donate(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Json(request): Json<DonationRequest>,
) -> ApiResult<ResourceLedger> {
    state
        .authorized(&token, |a, user, now| a.donate(user, &request, now))
        .await
        .map(Json)
}

/// `POST /api/buildings/{id}/move`
pub async fn move_building(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Path(building_id): Path<BuildingId>,
    Json(request): Json<MoveBuildingRequest>,
) -> ApiResult<ResourceLedger> {
    state
        .authorized(&token, |a, user, now| {
            a.move_building(user, building_id, request, now)
        })
        .await
        .map(Json)
}

/// `DELETE /api/buildings/{id}`
pub async fn delete_building(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
    Path(building_id): Path<BuildingId>,
) -> ApiResult<ResourceLedger> {
    state
        .authorized(&token, |a, user, now| a.delete_building(user, building_id, now))
        .await
        .map(Json)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// `POST /api/session/refresh`
///
/// Accepts expired tokens within the refresh grace period.
pub async fn refresh_session(
    State(state): State<Arc<AppState>>,
    Bearer(token): Bearer,
) -> ApiResult<SessionCredential> {
    state.refresh(&token).await.map(Json)
}

/// `POST /api/dev/villages`
pub async fn seed_village(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<VillageSeed>), ApiError> {
    let seed = state.seed_village().await?;
    info!(user_id = %seed.user_id, "development village seeded");
    Ok((StatusCode::CREATED, Json(seed)))
}
