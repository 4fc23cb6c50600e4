//! The control plane: the bridge between the declarative feature catalog
//! and Stripe's products, prices, subscription schedules, and usage
//! records.
//!
//! The [`Client`] here is the policy layer over [`crate::stripe::Client`]:
//!
//! - [`catalog`]: push/pull translation between features and product/price
//!   records (lossless round-trip).
//! - [`schedule`]: subscription schedules, customer dedup, phase lookup,
//!   org info updates.
//! - [`usage`]: metered usage reporting and limits derived from the
//!   upcoming-invoice projection.
//! - [`entitlement`]: the fail-open `can` facade.
//!
//! No state is held between calls; Stripe is the system of record and
//! every operation reads or writes it directly. Consistency under
//! concurrency comes from provider-side idempotency keys, not in-process
//! locks.

pub mod catalog;
pub mod entitlement;
pub mod schedule;
pub mod usage;
mod wire;

use chrono::{DateTime, Utc};
use tracing::instrument;

pub use entitlement::Answer;
pub use schedule::{Org, OrgInfo, Phase};
pub use usage::{Report, Usage};

use crate::error::{Error, Result};
use crate::stripe::{self, Form, slurp};

/// Metadata key tying a Stripe customer to its `org:` identifier.
pub(crate) const ORG_METADATA_KEY: &str = "tier.org";

/// The control-plane client.
///
/// Safe for concurrent use across independent organizations; clones share
/// the underlying HTTP pool.
#[derive(Debug, Clone)]
pub struct Client {
    /// The provider client every operation goes through.
    pub stripe: stripe::Client,
}

/// Identity of the configured provider account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoAmI {
    /// The Stripe account id (`acct_*`).
    pub provider_id: String,
    /// The account's email, when the provider reports one.
    pub email: String,
    /// Non-secret prefix of the configured API key.
    pub key_prefix: String,
    /// Whether the key is a live-mode key.
    pub live: bool,
}

impl Client {
    /// Wraps a provider client.
    #[must_use]
    pub fn new(stripe: stripe::Client) -> Self {
        Self { stripe }
    }

    /// Builds the client from the environment (`STRIPE_API_KEY`,
    /// optionally `STRIPE_BASE_URL`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the key is unset.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(stripe::Client::from_env()?))
    }

    /// Reports the identity behind the configured API key.
    ///
    /// # Errors
    ///
    /// Returns provider errors, including [`Error::InvalidAPIKey`].
    pub async fn whoami(&self) -> Result<WhoAmI> {
        let account: wire::Account = self
            .stripe
            .do_request("GET", "/v1/account", &Form::new())
            .await?;
        Ok(WhoAmI {
            provider_id: account.id,
            email: account.email.unwrap_or_default(),
            key_prefix: self.stripe.key_prefix().to_owned(),
            live: self.stripe.live(),
        })
    }

    /// The provider's notion of "now": the attached test clock's frozen
    /// time when one is configured, wall-clock time otherwise.
    pub(crate) async fn now(&self) -> Result<DateTime<Utc>> {
        match &self.stripe.clock {
            Some(id) => {
                let clock: wire::TestClock = self
                    .stripe
                    .do_request("GET", &format!("/v1/test_helpers/test_clocks/{id}"), &Form::new())
                    .await?;
                Ok(unix_time(clock.frozen_time))
            }
            None => Ok(Utc::now()),
        }
    }

    /// Finds the canonical customer id for `org`, if one exists.
    ///
    /// When duplicates exist (a lost race that predates idempotency keys),
    /// the lexicographically smallest id wins deterministically.
    pub(crate) async fn find_customer(&self, org: &str) -> Result<Option<String>> {
        let customers: Vec<wire::Customer> =
            slurp(&self.stripe, "GET", "/v1/customers", Form::new()).await?;
        let mut ids: Vec<String> = customers
            .into_iter()
            .filter(|c| c.metadata.get(ORG_METADATA_KEY).is_some_and(|v| v == org))
            .map(|c| c.id)
            .collect();
        ids.sort();
        Ok(ids.into_iter().next())
    }

    /// Looks up `org`'s customer id, failing when it does not exist.
    pub(crate) async fn customer_id(&self, org: &str) -> Result<String> {
        self.find_customer(org).await?.ok_or(Error::OrgNotFound)
    }

    /// Returns `org`'s customer id, creating the customer if necessary.
    ///
    /// Creation is concurrency-safe: the idempotency key is the org id
    /// itself, so N parallel creators collapse provider-side, and the
    /// post-create re-list picks one canonical row in case duplicates
    /// slipped through anyway.
    #[instrument(skip(self, info))]
    pub(crate) async fn get_or_create_customer(
        &self,
        org: &str,
        info: Option<&OrgInfo>,
    ) -> Result<String> {
        if let Some(id) = self.find_customer(org).await? {
            return Ok(id);
        }

        let mut form = Form::new();
        form.set_idempotency_key(org);
        form.set(format!("metadata[{ORG_METADATA_KEY}]"), org);
        if let Some(clock) = &self.stripe.clock {
            form.set("test_clock", clock.as_str());
        }
        if let Some(info) = info {
            schedule::apply_org_info(&mut form, info);
        }
        let created: wire::Customer = self
            .stripe
            .do_request("POST", "/v1/customers", &form)
            .await?;

        // Re-list so concurrent creators all converge on the same row.
        match self.find_customer(org).await? {
            Some(id) => Ok(id),
            None => Ok(created.id),
        }
    }
}

/// Converts provider Unix seconds to a UTC timestamp.
pub(crate) fn unix_time(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}
