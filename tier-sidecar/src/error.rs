//! Mapping engine errors onto the stable HTTP error envelope.
//!
//! Every failure leaving the sidecar is `{status, code, message}` with a
//! wire-stable code. The mapping is total: anything the engines can return
//! lands on exactly one triple, and provider/transport failures collapse
//! to a 500 without leaking internals.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tier_control::Error;
use tier_control::api;
use tracing::error;

/// An error ready to serialize as the wire envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status to respond with.
    pub status: StatusCode,
    /// Stable wire code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl ApiError {
    /// Builds an error triple.
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    /// The `400 invalid_request` for a missing or malformed `org=`
    /// parameter.
    pub fn invalid_org() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            r#"org must be prefixed with "org:""#,
        )
    }

    /// A plain `404 not_found`.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", "Not Found")
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        const BAD_REQUEST: StatusCode = StatusCode::BAD_REQUEST;
        match err {
            Error::OrgNotFound => Self::new(BAD_REQUEST, "org_not_found", "org not found"),
            Error::FeatureNotFound => {
                Self::new(BAD_REQUEST, "feature_not_found", "feature not found")
            }
            // Not-metered reports surface as a plain invalid request; the
            // message is part of the wire contract.
            Error::FeatureNotMetered => {
                Self::new(BAD_REQUEST, "invalid_request", "feature not reportable")
            }
            Error::InvalidReference(input) => Self::new(
                BAD_REQUEST,
                "invalid_request",
                format!("invalid reference: {input:?}"),
            ),
            Error::InvalidEmail => Self::new(BAD_REQUEST, "invalid_email", "invalid email"),
            Error::InvalidMetadata => Self::new(
                BAD_REQUEST,
                "invalid_metadata",
                r#"metadata keys must not be prefixed with "tier.""#,
            ),
            Error::InvalidPhase => Self::new(BAD_REQUEST, "invalid_phase", "invalid phase"),
            Error::TooManyItems => Self::new(BAD_REQUEST, "too_many_items", "too many items"),
            Error::InvalidFeature(msg) => Self::new(BAD_REQUEST, "invalid_request", msg),
            Error::Conflict(msg) => Self::new(BAD_REQUEST, "invalid_request", msg),
            Error::InvalidAPIKey => Self::new(
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                "invalid api key",
            ),
            err @ (Error::Stripe(_) | Error::Http(_) | Error::Decode(_) | Error::Config(_)) => {
                error!(error = %err, "provider failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = api::ApiError {
            status: self.status.as_u16(),
            code: self.code.to_owned(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}
