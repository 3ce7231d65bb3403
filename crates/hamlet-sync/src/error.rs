//! Error types for the `hamlet-sync` crate.

use hamlet_gateway::{FailureClass, GatewayError};
use hamlet_types::{JobId, RejectionReason};

use crate::storage::StoreError;

/// Errors surfaced by the sync engine to the UI layer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The authority call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Client-local persistence failed.
    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    /// The local guard refused the action before anything was sent.
    ///
    /// Advisory only: the authority may still disagree either way.
    #[error("not sent ({reason}): {message}")]
    Advisory {
        /// Rejection reason the authority would most likely give.
        reason: RejectionReason,
        /// Human-readable detail.
        message: String,
    },

    /// There is no offline accrual waiting to be claimed.
    #[error("no offline accrual to claim")]
    NothingToClaim,

    /// The job is not in the local training queue.
    #[error("training job {0} is not tracked")]
    UnknownJob(JobId),

    /// The job's countdown has not finished.
    #[error("training job {0} has not finished")]
    NotDue(JobId),
}

impl SyncError {
    /// Shorthand for a [`SyncError::Advisory`].
    pub fn advisory(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self::Advisory {
            reason,
            message: message.into(),
        }
    }

    /// How the UI should treat this error, when it maps onto a class.
    pub const fn class(&self) -> Option<FailureClass> {
        match self {
            Self::Gateway(err) => Some(err.class()),
            Self::Advisory { .. } | Self::NotDue(_) => Some(FailureClass::Validation),
            Self::Store(_) | Self::NothingToClaim | Self::UnknownJob(_) => None,
        }
    }
}
