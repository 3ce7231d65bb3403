//! HTTP wire contract shared by [`HttpGateway`](crate::HttpGateway) and the
//! development server.
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | `GET` | `/api/ledger` | [`ResourceLedger`](hamlet_types::ResourceLedger) |
//! | `GET` | `/api/population` | [`Population`](hamlet_types::Population) |
//! | `GET` | `/api/units` | [`UnitTotals`](hamlet_types::UnitTotals) |
//! | `GET` | `/api/buildings` | `Vec<Building>` |
//! | `GET` | `/api/offline-accrual?elapsed_minutes=N` | [`ResourceAmounts`](hamlet_types::ResourceAmounts) |
//! | `POST` | `/api/offline-accrual/claim` | ledger |
//! | `GET` | `/api/training` | `Vec<TrainingJob>` |
//! | `POST` | `/api/training` | [`TrainingReceipt`](hamlet_types::TrainingReceipt) |
//! | `POST` | `/api/training/{id}/complete` | [`CompletionReceipt`](hamlet_types::CompletionReceipt) |
//! | `POST` | `/api/donations` | ledger |
//! | `POST` | `/api/buildings/{id}/move` | ledger |
//! | `DELETE` | `/api/buildings/{id}` | ledger |
//! | `POST` | `/api/session/refresh` | credential |
//!
//! Failures carry an [`ErrorBody`]. Status codes map as: 401 unauthorized,
//! 409 conflict, 400/404/422 rejection, everything else transient.

use hamlet_types::{BuildingId, JobId, RejectionReason};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// `GET` ledger.
pub const LEDGER: &str = "/api/ledger";
/// `GET` population.
pub const POPULATION: &str = "/api/population";
/// `GET` unit totals.
pub const UNITS: &str = "/api/units";
/// `GET` buildings.
pub const BUILDINGS: &str = "/api/buildings";
/// `GET` offline accrual preview.
pub const OFFLINE_ACCRUAL: &str = "/api/offline-accrual";
/// `POST` offline accrual claim.
pub const OFFLINE_ACCRUAL_CLAIM: &str = "/api/offline-accrual/claim";
/// `GET` queue / `POST` start training.
pub const TRAINING: &str = "/api/training";
/// `POST` donation.
pub const DONATIONS: &str = "/api/donations";
/// `POST` credential refresh.
pub const SESSION_REFRESH: &str = "/api/session/refresh";
/// `POST` seed a development village.
pub const DEV_VILLAGES: &str = "/api/dev/villages";

/// Path for completing one training job.
pub fn training_complete(job_id: JobId) -> String {
    format!("{TRAINING}/{job_id}/complete")
}

/// Path for one building.
pub fn building(building_id: BuildingId) -> String {
    format!("{BUILDINGS}/{building_id}")
}

/// Path for moving one building.
pub fn building_move(building_id: BuildingId) -> String {
    format!("{BUILDINGS}/{building_id}/move")
}

/// JSON body of every failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// HTTP status code, repeated for clients that lose it.
    pub status: u16,
    /// Rejection reason for business-rule failures.
    #[serde(default)]
    pub reason: Option<RejectionReason>,
}

/// Query string of the offline accrual preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccrualQuery {
    /// Whole minutes away.
    pub elapsed_minutes: u64,
}

/// Map a non-success status and its (optional) body to a [`GatewayError`].
pub fn error_from_status(status: u16, body: Option<ErrorBody>) -> GatewayError {
    let message = body
        .as_ref()
        .map_or_else(|| format!("HTTP {status}"), |b| b.error.clone());
    match status {
        401 | 403 => GatewayError::Unauthorized(message),
        409 => GatewayError::Conflict(message),
        400 | 404 | 422 => match body.and_then(|b| b.reason) {
            Some(reason) => GatewayError::Rejected { reason, message },
            None if status == 404 => GatewayError::rejected(RejectionReason::NotFound, message),
            None => GatewayError::Protocol(format!("HTTP {status} without reason: {message}")),
        },
        _ => GatewayError::Transport(format!("HTTP {status}: {message}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;

    fn body(reason: Option<RejectionReason>) -> Option<ErrorBody> {
        Some(ErrorBody {
            error: String::from("nope"),
            status: 422,
            reason,
        })
    }

    #[test]
    fn status_codes_map_to_classes() {
        assert_eq!(
            error_from_status(401, None).class(),
            FailureClass::Authorization
        );
        assert_eq!(
            error_from_status(409, body(None)).class(),
            FailureClass::IdempotentConflict
        );
        assert_eq!(error_from_status(503, None).class(), FailureClass::Transient);
        assert_eq!(
            error_from_status(422, body(Some(RejectionReason::PopulationCap))),
            GatewayError::rejected(RejectionReason::PopulationCap, "nope")
        );
    }

    #[test]
    fn not_found_without_reason_is_still_a_rejection() {
        assert_eq!(
            error_from_status(404, None).class(),
            FailureClass::Validation
        );
    }

    #[test]
    fn bad_request_without_reason_is_a_protocol_error() {
        assert!(matches!(
            error_from_status(400, body(None)),
            GatewayError::Protocol(_)
        ));
    }

    #[test]
    fn job_paths_embed_the_id() {
        let id = JobId::new();
        assert_eq!(training_complete(id), format!("/api/training/{id}/complete"));
    }
}
