//! Axum router construction for the development server.
//!
//! Paths come from [`hamlet_gateway::wire`] so the server and the HTTP
//! gateway cannot drift apart.

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use hamlet_gateway::wire;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the complete router for the development server.
///
/// CORS allows any origin so a browser UI on another port can talk to it.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Reads
        .route(wire::LEDGER, get(handlers::get_ledger))
        .route(wire::POPULATION, get(handlers::get_population))
        .route(wire::UNITS, get(handlers::get_units))
        .route(wire::BUILDINGS, get(handlers::get_buildings))
        // Offline accrual
        .route(wire::OFFLINE_ACCRUAL, get(handlers::preview_offline_accrual))
        .route(
            wire::OFFLINE_ACCRUAL_CLAIM,
            post(handlers::commit_offline_accrual),
        )
        // Training
        .route(
            wire::TRAINING,
            get(handlers::get_training_queue).post(handlers::start_training),
        )
        .route(
            "/api/training/{id}/complete",
            post(handlers::complete_training),
        )
        // Donations and buildings
        .route(wire::DONATIONS, post(handlers::donate))
        .route("/api/buildings/{id}/move", post(handlers::move_building))
        .route("/api/buildings/{id}", delete(handlers::delete_building))
        // Session
        .route(wire::SESSION_REFRESH, post(handlers::refresh_session))
        .route(wire::DEV_VILLAGES, post(handlers::seed_village))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
