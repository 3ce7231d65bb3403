//! Error taxonomy for gateway calls.
//!
//! Every failure the authority or the transport can produce maps onto one
//! [`GatewayError`] variant, and every variant maps onto exactly one
//! [`FailureClass`]. Callers decide retry, renewal and user messaging from
//! the class alone.

use hamlet_types::RejectionReason;
use serde::{Deserialize, Serialize};

/// How a failed call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    /// Business-rule rejection. Shown to the player, never retried, not a fault.
    Validation,
    /// Credential missing, expired or invalid. Renew once and retry once.
    Authorization,
    /// Network or server trouble. Retry later; the next pull corrects state.
    Transient,
    /// The request was already applied (e.g. completing a completed job).
    /// Treated as success.
    IdempotentConflict,
}

/// Errors returned by a [`Gateway`](crate::Gateway) call.
///
/// `Clone` so a single in-flight result can be shared by every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The authority rejected the request on business rules.
    #[error("rejected ({reason}): {message}")]
    Rejected {
        /// Machine-readable reason.
        reason: RejectionReason,
        /// Human-readable detail from the authority.
        message: String,
    },

    /// The credential was not accepted.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request conflicts with state that already reflects it.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request did not complete (connect, timeout, 5xx).
    #[error("transport error: {0}")]
    Transport(String),

    /// The authority answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl GatewayError {
    /// Shorthand for a [`GatewayError::Rejected`].
    pub fn rejected(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            message: message.into(),
        }
    }

    /// Classify this error for retry and messaging decisions.
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::Rejected { .. } => FailureClass::Validation,
            Self::Unauthorized(_) => FailureClass::Authorization,
            Self::Conflict(_) => FailureClass::IdempotentConflict,
            Self::Transport(_) | Self::Protocol(_) => FailureClass::Transient,
        }
    }

    /// Whether a later retry of the same call may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), FailureClass::Transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_class() {
        assert_eq!(
            GatewayError::rejected(RejectionReason::InsufficientResources, "poor").class(),
            FailureClass::Validation
        );
        assert_eq!(
            GatewayError::Unauthorized(String::from("expired")).class(),
            FailureClass::Authorization
        );
        assert_eq!(
            GatewayError::Conflict(String::from("done")).class(),
            FailureClass::IdempotentConflict
        );
        assert_eq!(
            GatewayError::Transport(String::from("timeout")).class(),
            FailureClass::Transient
        );
        assert_eq!(
            GatewayError::Protocol(String::from("bad json")).class(),
            FailureClass::Transient
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(GatewayError::Transport(String::from("reset")).is_retryable());
        assert!(!GatewayError::rejected(RejectionReason::NotFound, "gone").is_retryable());
        assert!(!GatewayError::Conflict(String::from("done")).is_retryable());
    }
}
