//! The Stripe HTTP client.
//!
//! A thin, explicit wrapper over a pooled [`reqwest::Client`]: form-encoded
//! requests in, JSON out, with basic auth, idempotency-key propagation, and
//! a deterministic error taxonomy. No retries happen at this level; higher
//! layers wrap calls in [`crate::backoff`] when they hold an idempotency
//! key that makes retrying safe.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::form::Form;
use crate::error::{Error, Result, StripeError};

/// The production Stripe endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

/// A Stripe API client scoped to one credential.
///
/// Cloning is cheap and clones share the underlying connection pool. The
/// client is safe for concurrent use; the only mutable state is the pool
/// itself and the optional [test clock](Client::with_clock) id.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    account: Option<String>,
    /// Test clock id driving all time-based decisions when set.
    pub clock: Option<String>,
}

impl Client {
    /// Creates a client for the production endpoint with the given secret
    /// key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the underlying HTTP client cannot be
    /// constructed.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: api_key.into(),
            account: None,
            clock: None,
        })
    }

    /// Creates a client from the environment.
    ///
    /// Reads `STRIPE_API_KEY` (required) and `STRIPE_BASE_URL` (optional,
    /// used by tests to point at a local server).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `STRIPE_API_KEY` is unset or the base
    /// URL override does not parse as an http(s) URL.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("STRIPE_API_KEY")
            .map_err(|_| Error::Config("STRIPE_API_KEY not set".to_owned()))?;
        let mut c = Self::new(key)?;
        if let Ok(base_url) = std::env::var("STRIPE_BASE_URL") {
            let parsed = url::Url::parse(&base_url)
                .map_err(|e| Error::Config(format!("invalid STRIPE_BASE_URL: {e}")))?;
            if parsed.scheme() != "https" && parsed.scheme() != "http" {
                return Err(Error::Config(format!(
                    "STRIPE_BASE_URL must be http(s), got {}",
                    parsed.scheme()
                )));
            }
            c.base_url = base_url;
        }
        Ok(c)
    }

    /// Overrides the API endpoint.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    /// Scopes every request to a connected account via the
    /// `Stripe-Account` header.
    #[must_use]
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    /// Attaches a test clock; all time-based decisions route through it.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Into<String>) -> Self {
        self.clock = Some(clock.into());
        self
    }

    /// Reports whether the configured key is a live-mode key.
    #[must_use]
    pub fn live(&self) -> bool {
        self.api_key.contains("_live_")
    }

    /// The non-secret prefix of the configured key (e.g. `sk_test`).
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        self.api_key
            .rsplit_once('_')
            .map_or(self.api_key.as_str(), |(prefix, _)| prefix)
    }

    /// Executes a request and decodes the JSON response into `T`.
    ///
    /// The body is form-encoded for POST/PUT/PATCH and becomes the query
    /// string for GET/DELETE. If the form carries an idempotency key it is
    /// sent as the `Idempotency-Key` header.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAPIKey`] for any 401, or any envelope whose
    ///   message begins with `Invalid API Key`.
    /// - [`Error::Stripe`] for other 4xx/5xx responses, carrying the
    ///   decoded envelope and HTTP status.
    /// - [`Error::Http`] / [`Error::Decode`] for transport and decode
    ///   failures.
    pub async fn do_request<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        form: &Form,
    ) -> Result<T> {
        let body = self.execute(method, path, form).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Executes a request, discarding the response body.
    ///
    /// # Errors
    ///
    /// Same as [`Client::do_request`].
    pub async fn send(&self, method: &str, path: &str, form: &Form) -> Result<()> {
        self.execute(method, path, form).await.map(|_| ())
    }

    #[instrument(skip(self, form), fields(method = method, path = path))]
    async fn execute(&self, method: &str, path: &str, form: &Form) -> Result<Vec<u8>> {
        let url = format!("{}{path}", self.base_url);

        let mut req = match method {
            "GET" => self.http.get(&url),
            "DELETE" => self.http.delete(&url),
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "PATCH" => self.http.patch(&url),
            other => return Err(Error::Config(format!("unsupported method {other:?}"))),
        };

        req = match method {
            "GET" | "DELETE" => {
                if form.is_empty() {
                    req
                } else {
                    req.query(form.pairs())
                }
            }
            // reqwest sets application/x-www-form-urlencoded for us.
            _ => req.form(form.pairs()),
        };

        req = req.basic_auth(&self.api_key, None::<&str>);
        if let Some(account) = &self.account {
            req = req.header("Stripe-Account", account);
        }
        if let Some(key) = form.idempotency_key() {
            req = req.header("Idempotency-Key", key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap_or_default();
        debug!(status = status.as_u16(), code = %envelope.error.code, "stripe error response");

        if status.as_u16() == 401 || envelope.error.message.starts_with("Invalid API Key") {
            return Err(Error::InvalidAPIKey);
        }

        Err(Error::Stripe(StripeError {
            kind: envelope.error.kind,
            code: envelope.error.code,
            message: envelope.error.message,
            param: envelope.error.param,
            status: status.as_u16(),
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    param: String,
}
