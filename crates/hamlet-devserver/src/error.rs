//! Error types for the development server.
//!
//! [`ApiError`] converts into an HTTP response carrying the shared
//! [`ErrorBody`], using the status mapping the HTTP gateway expects: 422
//! for rule rejections, 401 for bad tokens, 409 for already-applied
//! requests, 5xx for everything the client should treat as transient.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use hamlet_authority::AuthorityError;
use hamlet_gateway::wire::ErrorBody;
use hamlet_types::RejectionReason;

/// Errors that can occur in the development API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The authority refused or failed the operation.
    #[error(transparent)]
    Authority(#[from] AuthorityError),

    /// The request carried no usable bearer token.
    #[error("missing bearer token")]
    MissingToken,
}

impl ApiError {
    /// Status code and rejection reason for this error.
    pub const fn status(&self) -> (StatusCode, Option<RejectionReason>) {
        match self {
            Self::Authority(AuthorityError::Rejected { reason, .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Some(*reason))
            }
            Self::Authority(AuthorityError::UnknownUser(_)) => {
                (StatusCode::NOT_FOUND, Some(RejectionReason::NotFound))
            }
            Self::Authority(AuthorityError::Unauthorized(_)) | Self::MissingToken => {
                (StatusCode::UNAUTHORIZED, None)
            }
            Self::Authority(AuthorityError::Conflict(_)) => (StatusCode::CONFLICT, None),
            Self::Authority(AuthorityError::ArithmeticOverflow) => {
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            status: status.as_u16(),
            reason,
        };
        (status, axum::Json(body)).into_response()
    }
}

/// The bearer token of an authenticated request.
#[derive(Debug, Clone)]
pub struct Bearer(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Bearer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Self(token.to_owned()))
            .ok_or(ApiError::MissingToken)
    }
}
