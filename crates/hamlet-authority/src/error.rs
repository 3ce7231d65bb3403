//! Error types for the `hamlet-authority` crate.
//!
//! All fallible authority operations return [`AuthorityError`]. The
//! [`From`] impl maps each variant onto the gateway taxonomy so an
//! in-process gateway and the HTTP server report identical failures.

use hamlet_gateway::GatewayError;
use hamlet_types::{RejectionReason, UserId};

/// Errors that can occur while applying a request to the authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorityError {
    /// The request breaks a game rule.
    #[error("rejected ({reason}): {message}")]
    Rejected {
        /// Machine-readable reason.
        reason: RejectionReason,
        /// Human-readable detail.
        message: String,
    },

    /// The token is unknown or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request was already applied.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The token belongs to a user whose village no longer exists.
    #[error("no village for user {0}")]
    UnknownUser(UserId),

    /// Arithmetic overflow during a checked operation.
    #[error("arithmetic overflow in authority calculation")]
    ArithmeticOverflow,
}

impl AuthorityError {
    /// Shorthand for a [`AuthorityError::Rejected`].
    pub fn rejected(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self::Rejected {
            reason,
            message: message.into(),
        }
    }
}

impl From<AuthorityError> for GatewayError {
    fn from(err: AuthorityError) -> Self {
        match err {
            AuthorityError::Rejected { reason, message } => Self::Rejected { reason, message },
            AuthorityError::Unauthorized(message) => Self::Unauthorized(message),
            AuthorityError::Conflict(message) => Self::Conflict(message),
            AuthorityError::UnknownUser(user) => {
                Self::rejected(RejectionReason::NotFound, format!("no village for user {user}"))
            }
            AuthorityError::ArithmeticOverflow => {
                Self::Transport(String::from("authority arithmetic overflow"))
            }
        }
    }
}
