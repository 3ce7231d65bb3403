//! Shared type definitions for the Hamlet village client.
//!
//! This crate is the single source of truth for the data model exchanged
//! between the client sync engine and the authoritative backend. Types flow
//! to `TypeScript` via `ts-rs` for the UI panels.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for users, buildings, jobs, mutations
//! - [`enums`] -- Resource, troop, building, job-status and rejection enums
//! - [`structs`] -- Ledgers, training jobs, credentials, request payloads
//! - [`catalog`] -- Troop costs and building production tables
//! - [`production`] -- Production rates and the accrual calculation
//! - [`clock`] -- Wall-clock abstraction with a manual clock for tests

pub mod catalog;
pub mod clock;
pub mod enums;
pub mod ids;
pub mod production;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use catalog::TroopProfile;
pub use clock::{Clock, ManualClock, SystemClock};
pub use enums::{BuildingKind, JobStatus, RejectionReason, ResourceKind, TroopKind};
pub use ids::{BuildingId, JobId, MutationId, UserId};
pub use production::{ProductionRates, compute_accrual, whole_minutes_between};
pub use structs::{
    AccrualClaimRequest, Building, CompletionReceipt, DonationRequest, MoveBuildingRequest,
    Population, ResourceAmounts, ResourceLedger, SessionCredential, StartTrainingRequest,
    TrainingJob, TrainingReceipt, UnitTotals, VillageSeed,
};
