//! Error types for the tier control plane.
//!
//! All fallible operations in this crate return [`Result`]. The variants of
//! [`Error`] split into four groups:
//!
//! - **Authentication** ([`Error::InvalidAPIKey`]): the configured Stripe key
//!   was rejected, regardless of which call surfaced it.
//! - **Validation** ([`Error::InvalidReference`], [`Error::InvalidPhase`],
//!   [`Error::TooManyItems`], [`Error::InvalidEmail`],
//!   [`Error::InvalidMetadata`], [`Error::InvalidFeature`]): bad input,
//!   detected before any side effect on the provider.
//! - **Not found** ([`Error::OrgNotFound`], [`Error::FeatureNotFound`],
//!   [`Error::FeatureNotMetered`]): the referenced entity is absent or not
//!   usable for the requested operation.
//! - **Provider** ([`Error::Stripe`], [`Error::Http`], [`Error::Decode`]):
//!   the billing backend answered with an error envelope, the transport
//!   failed, or the response body did not decode.

use thiserror::Error;

/// Result type alias for control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A decoded Stripe error envelope.
///
/// Stripe reports failures as `{"error": {"type", "code", "message",
/// "param"}}`; all four fields are carried here together with the HTTP
/// status of the response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StripeError {
    /// The `error.type` field (e.g. `invalid_request_error`).
    pub kind: String,
    /// The `error.code` field (e.g. `resource_missing`).
    pub code: String,
    /// The human-readable `error.message` field.
    pub message: String,
    /// The `error.param` field naming the offending parameter, if any.
    pub param: String,
    /// HTTP status of the response that carried the envelope.
    pub status: u16,
}

impl StripeError {
    /// Reports whether this envelope describes a missing resource.
    #[must_use]
    pub fn is_resource_missing(&self) -> bool {
        self.status == 404 || self.code == "resource_missing"
    }
}

impl std::fmt::Display for StripeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stripe: {}: type={:?} code={:?} param={:?}: {}",
            self.status, self.kind, self.code, self.param, self.message
        )
    }
}

impl std::error::Error for StripeError {}

/// Errors produced by the tier control plane.
#[must_use = "errors should be handled, propagated, or explicitly panicked"]
#[derive(Debug, Error)]
pub enum Error {
    /// The configured Stripe API key was rejected.
    ///
    /// Any 401 response, or any error envelope whose message begins with
    /// `Invalid API Key`, collapses to this value no matter which operation
    /// produced it.
    #[error("invalid stripe api key")]
    InvalidAPIKey,

    /// A name reference failed to parse.
    ///
    /// Carries the offending input verbatim. References never normalize;
    /// anything that is not byte-exact against the grammar is invalid.
    #[error("invalid reference: {0:?}")]
    InvalidReference(String),

    /// No customer carries the requested `org:` identifier.
    #[error("org not found")]
    OrgNotFound,

    /// A referenced feature is not part of the pushed catalog, or is not
    /// present in the organization's current phase.
    #[error("feature not found")]
    FeatureNotFound,

    /// Usage was reported against a feature with no tier table.
    #[error("feature not metered")]
    FeatureNotMetered,

    /// An org info update carried a syntactically invalid email address.
    #[error("invalid email")]
    InvalidEmail,

    /// An org info update tried to write a reserved (`tier.`-prefixed)
    /// metadata key.
    #[error("invalid metadata")]
    InvalidMetadata,

    /// A phase is empty or internally inconsistent (e.g. mixed currencies).
    #[error("invalid phase")]
    InvalidPhase,

    /// A phase references more features than the provider accepts (20).
    #[error("too many items")]
    TooManyItems,

    /// A feature definition is invalid (e.g. a tier table that is not
    /// strictly ascending).
    #[error("invalid feature: {0}")]
    InvalidFeature(String),

    /// A push found an existing product whose recorded definition differs
    /// from the feature being pushed.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The client was misconfigured (missing credential, bad base URL,
    /// unsupported method).
    #[error("configuration error: {0}")]
    Config(String),

    /// The provider answered with an error envelope.
    #[error(transparent)]
    Stripe(StripeError),

    /// The HTTP transport failed (timeout, connection refused, TLS, ...).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A provider response body did not decode as the expected JSON shape.
    #[error("response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}
