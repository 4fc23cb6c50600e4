//! Metered usage reporting and limit lookup.
//!
//! Reporting resolves the org's current subscription item for a feature
//! and posts a usage record, retried under a hard deadline behind an
//! idempotency key. Limits are never stored here: they are derived on
//! demand from the provider's upcoming-invoice projection, which already
//! accounts for the current phase, proration, and the billing period.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, instrument};

use super::{Client, catalog, unix_time, wire};
use crate::backoff::{RetryPolicy, is_retryable};
use crate::error::{Error, Result};
use crate::refs::{FeaturePlan, Name};
use crate::stripe::{Form, slurp};

/// Hard deadline for one usage report, retries included.
const REPORT_DEADLINE: Duration = Duration::from_secs(3);

/// One usage report.
#[derive(Debug, Clone)]
pub struct Report {
    /// Units to report.
    pub n: i64,
    /// When the usage occurred.
    pub at: DateTime<Utc>,
    /// `true` replaces the period's value (`action=set`); `false`
    /// increments it.
    pub clobber: bool,
    /// Caller-supplied idempotency key; a fresh random key is generated
    /// when absent.
    pub idempotency_key: Option<String>,
}

impl Report {
    /// A plain increment of `n` units at time `at`.
    #[must_use]
    pub fn increment(n: i64, at: DateTime<Utc>) -> Self {
        Self { n, at, clobber: false, idempotency_key: None }
    }
}

/// Usage and limit of one feature for the current billing period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    /// The feature-plan the usage belongs to.
    pub feature: FeaturePlan,
    /// Start of the billing period.
    pub start: DateTime<Utc>,
    /// End of the billing period.
    pub end: DateTime<Utc>,
    /// Units consumed so far.
    pub used: i64,
    /// The feature's limit; [`crate::feature::INF`] when unbounded.
    pub limit: i64,
}

/// A fresh random 64-bit hex idempotency key.
fn random_key() -> String {
    let bytes: [u8; 8] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl Client {
    /// Finds the subscription item carrying `feature` for the customer.
    ///
    /// Returns the item id and whether the underlying price is metered.
    async fn subscription_item(&self, customer: &str, feature: &Name) -> Result<(String, bool)> {
        let mut form = Form::new();
        form.set("customer", customer);
        let subs: Vec<wire::Subscription> =
            slurp(&self.stripe, "GET", "/v1/subscriptions", form).await?;

        let wanted = feature.to_string();
        for sub in &subs {
            for item in &sub.items.data {
                if item.price.metadata.get("tier.feature") == Some(&wanted) {
                    let metered = item.price.metadata.contains_key("tier.tiers");
                    return Ok((item.id.clone(), metered));
                }
            }
        }
        Err(Error::FeatureNotFound)
    }

    /// Reports usage of `feature` for `org`.
    ///
    /// Retries transport failures and 5xx under a 3-second deadline; the
    /// idempotency key makes the retries at-most-once provider-side. A 4xx
    /// answer aborts immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::OrgNotFound`] when the org has no customer.
    /// - [`Error::FeatureNotFound`] when the feature is not in the org's
    ///   current phase.
    /// - [`Error::FeatureNotMetered`] when the feature has no tier table.
    /// - The last provider error when the deadline expires.
    #[instrument(skip(self, report), fields(n = report.n, clobber = report.clobber))]
    pub async fn report_usage(&self, org: &str, feature: &Name, report: Report) -> Result<()> {
        let customer = self.customer_id(org).await?;
        let (item, metered) = self.subscription_item(&customer, feature).await?;
        if !metered {
            return Err(Error::FeatureNotMetered);
        }

        let mut form = Form::new();
        form.set("quantity", report.n);
        form.set("timestamp", report.at);
        form.set("action", if report.clobber { "set" } else { "increment" });
        form.set_idempotency_key(report.idempotency_key.unwrap_or_else(random_key));

        let path = format!("/v1/subscription_items/{item}/usage_records");
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();
        let mut attempt = 0;
        loop {
            match self.stripe.send("POST", &path, &form).await {
                Ok(()) => return Ok(()),
                Err(err) if !is_retryable(&err) => return Err(err),
                Err(err) => {
                    let delay = policy.delay_for_attempt(attempt);
                    if started.elapsed() + delay >= REPORT_DEADLINE {
                        return Err(err);
                    }
                    debug!(attempt, error = %err, "usage report retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Derives per-feature usage and limits from the org's upcoming
    /// invoice.
    ///
    /// Lines that do not carry `tier.*` price metadata are skipped. When
    /// proration produces multiple lines for one feature, the larger
    /// `used` wins.
    ///
    /// # Errors
    ///
    /// [`Error::OrgNotFound`] and provider errors.
    #[instrument(skip(self))]
    pub async fn lookup_limits(&self, org: &str) -> Result<Vec<Usage>> {
        let customer = self.customer_id(org).await?;

        let mut form = Form::new();
        form.set("customer", customer.as_str());
        form.add("expand[]", "data.price.tiers");
        let lines: Vec<wire::LineItem> =
            slurp(&self.stripe, "GET", "/v1/invoices/upcoming/lines", form).await?;

        let mut seen: std::collections::BTreeMap<FeaturePlan, Usage> = std::collections::BTreeMap::new();
        for line in &lines {
            let Some(feature) = catalog::decode_feature(&line.price) else {
                continue;
            };
            let usage = Usage {
                feature: feature.feature_plan.clone(),
                start: unix_time(line.period.start),
                end: unix_time(line.period.end),
                used: line.quantity,
                limit: feature.limit(),
            };
            seen.entry(feature.feature_plan)
                .and_modify(|existing| {
                    if existing.used <= usage.used {
                        *existing = usage.clone();
                    }
                })
                .or_insert(usage);
        }
        Ok(seen.into_values().collect())
    }

    /// Reports the `(limit, used)` pair for one feature.
    ///
    /// A feature absent from the org's current projection yields
    /// `(0, 0)` with no error.
    ///
    /// # Errors
    ///
    /// Same as [`Client::lookup_limits`].
    pub async fn lookup_limit(&self, org: &str, feature: &Name) -> Result<(i64, i64)> {
        let limits = self.lookup_limits(org).await?;
        Ok(limits
            .iter()
            .find(|u| u.feature.name() == *feature)
            .map_or((0, 0), |u| (u.limit, u.used)))
    }
}
