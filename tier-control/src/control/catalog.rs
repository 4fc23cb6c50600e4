//! Push/pull translation between the feature catalog and Stripe's
//! product/price catalog.
//!
//! The encoding is injective so round-trips are lossless: the product id is
//! derived deterministically from the feature-plan reference, and the full
//! feature definition rides in `tier.*` metadata on both product and price.
//! Pull reconstructs features purely from that metadata; prices without the
//! markers belong to someone else and are ignored.

use tracing::instrument;

use super::{Client, wire};
use crate::error::{Error, Result};
use crate::feature::{Feature, INF, Rounding, Tier};
use crate::refs::{FeaturePlan, Name, Plan};
use crate::stripe::{Form, slurp};

const META_PLAN: &str = "tier.plan";
const META_FEATURE: &str = "tier.feature";
const META_VERSION: &str = "tier.version";
const META_TITLE: &str = "tier.title";
const META_PLAN_TITLE: &str = "tier.plan_title";
const META_INTERVAL: &str = "tier.interval";
const META_AGGREGATE: &str = "tier.aggregate";
const META_MODE: &str = "tier.mode";
const META_CURRENCY: &str = "tier.currency";
const META_BASE: &str = "tier.base";
const META_TIERS: &str = "tier.tiers";

/// The deterministic Stripe product id for a feature-plan:
/// `tier__` + the reference with `:` and `@` replaced by `-`.
#[must_use]
pub fn product_id(fp: &FeaturePlan) -> String {
    let sanitized: String = fp
        .to_string()
        .chars()
        .map(|c| if c == ':' || c == '@' { '-' } else { c })
        .collect();
    format!("tier__{sanitized}")
}

/// Encodes a feature as `tier.*` metadata pairs.
fn feature_metadata(f: &Feature) -> Result<Vec<(String, String)>> {
    let mut meta = vec![
        (META_PLAN.to_owned(), f.feature_plan.plan().to_string()),
        (META_FEATURE.to_owned(), f.feature_plan.name().to_string()),
        (META_VERSION.to_owned(), f.feature_plan.plan().version().to_owned()),
        (META_INTERVAL.to_owned(), f.interval.as_str().to_owned()),
        (META_AGGREGATE.to_owned(), f.aggregate.as_str().to_owned()),
        (META_MODE.to_owned(), f.mode.as_str().to_owned()),
        (META_CURRENCY.to_owned(), f.currency.clone()),
        (META_BASE.to_owned(), f.base.to_string()),
    ];
    if !f.title.is_empty() {
        meta.push((META_TITLE.to_owned(), f.title.clone()));
    }
    if !f.plan_title.is_empty() {
        meta.push((META_PLAN_TITLE.to_owned(), f.plan_title.clone()));
    }
    if !f.tiers.is_empty() {
        meta.push((META_TIERS.to_owned(), serde_json::to_string(&f.tiers)?));
    }
    Ok(meta)
}

/// Decodes a price back into a feature.
///
/// Returns `None` for prices that do not carry the `tier.*` markers or
/// whose markers are malformed; those are not ours to interpret.
pub(crate) fn decode_feature(price: &wire::Price) -> Option<Feature> {
    let meta = &price.metadata;
    let plan: Plan = meta.get(META_PLAN)?.parse().ok()?;
    let name: Name = meta.get(META_FEATURE)?.parse().ok()?;
    let tiers: Vec<Tier> = match meta.get(META_TIERS) {
        Some(raw) => serde_json::from_str(raw).ok()?,
        None => Vec::new(),
    };
    let (divide_by, round) = match &price.transform_quantity {
        Some(t) => (t.divide_by, t.round.parse().unwrap_or(Rounding::Up)),
        None => (0, Rounding::Up),
    };

    Some(Feature {
        feature_plan: FeaturePlan::from_parts(&name, plan),
        title: meta.get(META_TITLE).cloned().unwrap_or_default(),
        plan_title: meta.get(META_PLAN_TITLE).cloned().unwrap_or_default(),
        currency: meta.get(META_CURRENCY).cloned().unwrap_or_default(),
        interval: meta.get(META_INTERVAL).and_then(|s| s.parse().ok())?,
        base: meta.get(META_BASE).and_then(|s| s.parse().ok()).unwrap_or(0),
        tiers,
        mode: meta.get(META_MODE).and_then(|s| s.parse().ok())?,
        aggregate: meta.get(META_AGGREGATE).and_then(|s| s.parse().ok())?,
        transform_divide_by: divide_by,
        transform_round: round,
        provider_id: price.id.clone(),
    })
}

/// Reports whether `have` carries every pair of `want`.
fn metadata_matches(have: &std::collections::BTreeMap<String, String>, want: &[(String, String)]) -> bool {
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

impl Client {
    /// Pushes features to the provider, one product/price per feature.
    ///
    /// Results are reported per feature through `report`: on success the
    /// reported feature carries its new provider id; on failure the error
    /// is passed alongside the unchanged feature. One feature failing does
    /// not abort the others.
    pub async fn push<F>(&self, features: &[Feature], mut report: F)
    where
        F: FnMut(&Feature, Option<&Error>),
    {
        for f in features {
            match self.push_feature(f).await {
                Ok(provider_id) => {
                    let mut pushed = f.clone();
                    pushed.provider_id = provider_id;
                    report(&pushed, None);
                }
                Err(err) => report(f, Some(&err)),
            }
        }
    }

    /// Pushes a single feature and returns its provider id.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFeature`] when the definition fails validation.
    /// - [`Error::Conflict`] when the derived product exists with a
    ///   different recorded definition.
    /// - Provider errors otherwise.
    #[instrument(skip(self, f), fields(feature = %f.feature_plan))]
    pub async fn push_feature(&self, f: &Feature) -> Result<String> {
        f.validate()?;

        let pid = product_id(&f.feature_plan);
        let meta = feature_metadata(f)?;

        match self
            .stripe
            .do_request::<wire::Product>("GET", &format!("/v1/products/{pid}"), &Form::new())
            .await
        {
            Ok(existing) => {
                if !metadata_matches(&existing.metadata, &meta) {
                    return Err(Error::Conflict(format!(
                        "product {pid} exists with a different definition"
                    )));
                }
            }
            Err(Error::Stripe(se)) if se.is_resource_missing() => {
                let mut form = Form::new();
                form.set("id", pid.as_str());
                form.set("name", f.product_name());
                for (k, v) in &meta {
                    form.set(format!("metadata[{k}]"), v.as_str());
                }
                form.set_idempotency_key(format!("product:{pid}"));
                self.stripe.send("POST", "/v1/products", &form).await?;
            }
            Err(err) => return Err(err),
        }

        // Prices are immutable: reuse a matching one, otherwise mint a new
        // one under the product.
        let mut list = Form::new();
        list.set("product", pid.as_str());
        let prices: Vec<wire::Price> = slurp(&self.stripe, "GET", "/v1/prices", list).await?;
        let wanted_transform = if f.transform_divide_by > 0 {
            Some((f.transform_divide_by, f.transform_round))
        } else {
            None
        };
        if let Some(existing) = prices.iter().find(|p| {
            let transform = p
                .transform_quantity
                .as_ref()
                .map(|t| (t.divide_by, t.round.parse().unwrap_or(Rounding::Up)));
            metadata_matches(&p.metadata, &meta) && transform == wanted_transform
        }) {
            return Ok(existing.id.clone());
        }

        let mut form = Form::new();
        form.set("product", pid.as_str());
        form.set("currency", f.currency.as_str());
        for (k, v) in &meta {
            form.set(format!("metadata[{k}]"), v.as_str());
        }
        form.set("recurring[interval]", f.interval.stripe_interval());
        if f.is_metered() {
            form.set("recurring[usage_type]", "metered");
            form.set("recurring[aggregate_usage]", f.aggregate.stripe_aggregate());
            form.set("billing_scheme", "tiered");
            form.set("tiers_mode", f.mode.stripe_mode());
            for (i, t) in f.tiers.iter().enumerate() {
                form.set(format!("tiers[{i}][unit_amount]"), t.price);
                form.set(format!("tiers[{i}][flat_amount]"), t.base);
                if t.effective_upto() == INF {
                    form.set(format!("tiers[{i}][up_to]"), "inf");
                } else {
                    form.set(format!("tiers[{i}][up_to]"), t.upto);
                }
            }
        } else {
            form.set("billing_scheme", "per_unit");
            form.set("unit_amount", f.base);
        }
        if let Some((divide_by, round)) = wanted_transform {
            form.set("transform_quantity[divide_by]", divide_by);
            form.set("transform_quantity[round]", round.stripe_round());
        }
        form.set_idempotency_key(format!("price:{pid}"));

        let created: wire::Price = self.stripe.do_request("POST", "/v1/prices", &form).await?;
        Ok(created.id)
    }

    /// Pulls the complete feature catalog back from the provider.
    ///
    /// Lists every price, keeps those carrying `tier.*` markers, and
    /// reconstructs one feature per distinct feature-plan.
    ///
    /// # Errors
    ///
    /// Returns provider errors; malformed individual prices are skipped,
    /// not failed.
    pub async fn pull(&self) -> Result<Vec<Feature>> {
        let prices: Vec<wire::Price> = slurp(&self.stripe, "GET", "/v1/prices", Form::new()).await?;
        let mut seen = std::collections::BTreeSet::new();
        let mut features = Vec::new();
        for price in &prices {
            if let Some(f) = decode_feature(price)
                && seen.insert(f.feature_plan.clone())
            {
                features.push(f);
            }
        }
        Ok(features)
    }

    /// Pulls the catalog and resolves each requested reference:
    /// plan references expand to every feature defined under them,
    /// feature-plan references pass through after existence checks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeatureNotFound`] for unknown references and
    /// [`Error::InvalidReference`] for strings that parse as neither shape.
    pub async fn expand_refs(&self, refs: &[String]) -> Result<Vec<FeaturePlan>> {
        let catalog = self.pull().await?;
        let mut out = Vec::new();
        for r in refs {
            if let Ok(plan) = r.parse::<Plan>() {
                out.extend(crate::feature::expand(&catalog, &plan)?);
            } else {
                let fp: FeaturePlan = r.parse()?;
                if !catalog.iter().any(|f| f.feature_plan == fp) {
                    return Err(Error::FeatureNotFound);
                }
                out.push(fp);
            }
        }
        Ok(out)
    }
}
