//! Subscription schedules: building, amending, and reading back the
//! ordered phases of an organization's subscription.
//!
//! One schedule per organization. Writes validate locally, resolve feature
//! references against the pushed catalog, and then hand Stripe the full
//! phase list; reads flatten every schedule ever created for the org into
//! chronological phases and mark exactly one as current against the
//! provider clock.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{Client, ORG_METADATA_KEY, unix_time, wire};
use crate::error::{Error, Result};
use crate::feature::Feature;
use crate::refs::{FeaturePlan, Plan, sort_grouped_by_version};
use crate::stripe::{Form, slurp};

/// The most subscription items the provider accepts in one phase.
pub const MAX_PHASE_ITEMS: usize = 20;

/// Organization contact details and user metadata.
///
/// All fields are optional on update: empty strings are "leave as is" for
/// the contact fields, while an empty string *value* in `metadata` deletes
/// that key. Keys beginning with `tier.` are reserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgInfo {
    /// Billing email; validated syntactically when non-empty.
    #[serde(default)]
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Contact phone number.
    #[serde(default)]
    pub phone: String,
    /// User metadata; `tier.*` keys are reserved for the control plane.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A known organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Org {
    /// The `org:` identifier.
    pub id: String,
    /// The provider's customer id.
    pub provider_id: String,
    /// Billing email, when set.
    pub email: String,
}

/// One slice of an organization's subscription timeline, as read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    /// The organization the phase belongs to.
    pub org: String,
    /// When the phase takes (or took) effect.
    pub effective: DateTime<Utc>,
    /// Whether this is the phase in effect at the provider's "now".
    pub current: bool,
    /// Every feature-plan covered by the phase.
    pub features: Vec<FeaturePlan>,
    /// Plans for which *every* catalog feature is present in `features`.
    pub plans: Vec<Plan>,
    /// Features whose plan is only partially subscribed.
    pub fragments: Vec<FeaturePlan>,
}

/// A phase to be written: the features it covers and an optional effective
/// time (defaulting to the provider's "now").
#[derive(Debug, Clone, Default)]
pub struct PhaseSpec {
    /// When the phase should take effect; `None` means now.
    pub effective: Option<DateTime<Utc>>,
    /// The feature-plans the phase covers.
    pub features: Vec<FeaturePlan>,
}

/// Reports whether `s` is plausible email syntax: one `@`, non-empty
/// halves, a dotted domain, no whitespace.
fn valid_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains('@')
        && !s.chars().any(char::is_whitespace)
}

/// Validates org info before any provider call.
fn validate_org_info(info: &OrgInfo) -> Result<()> {
    if !info.email.is_empty() && !valid_email(&info.email) {
        return Err(Error::InvalidEmail);
    }
    if info.metadata.keys().any(|k| k.starts_with("tier.")) {
        return Err(Error::InvalidMetadata);
    }
    Ok(())
}

/// Writes org info fields onto a customer form.
///
/// Contact fields are written only when non-empty (partial update);
/// metadata entries are always written, because an empty value is the
/// provider's deletion idiom.
pub(crate) fn apply_org_info(form: &mut Form, info: &OrgInfo) {
    if !info.email.is_empty() {
        form.set("email", info.email.as_str());
    }
    if !info.name.is_empty() {
        form.set("name", info.name.as_str());
    }
    if !info.description.is_empty() {
        form.set("description", info.description.as_str());
    }
    if !info.phone.is_empty() {
        form.set("phone", info.phone.as_str());
    }
    for (k, v) in &info.metadata {
        form.set(format!("metadata[{k}]"), v.as_str());
    }
}

/// Resolves phase features to provider price ids, enforcing phase
/// invariants.
///
/// # Errors
///
/// - [`Error::InvalidPhase`] for an empty phase or mixed currencies.
/// - [`Error::TooManyItems`] past [`MAX_PHASE_ITEMS`].
/// - [`Error::FeatureNotFound`] for references missing from the catalog.
fn resolve_phase(catalog: &[Feature], fps: &[FeaturePlan]) -> Result<Vec<String>> {
    if fps.is_empty() {
        return Err(Error::InvalidPhase);
    }
    if fps.len() > MAX_PHASE_ITEMS {
        return Err(Error::TooManyItems);
    }

    let mut prices = Vec::with_capacity(fps.len());
    let mut currencies = BTreeSet::new();
    for fp in fps {
        let feature = catalog
            .iter()
            .find(|f| f.feature_plan == *fp)
            .ok_or(Error::FeatureNotFound)?;
        currencies.insert(feature.currency.clone());
        prices.push(feature.provider_id.clone());
    }
    if currencies.len() > 1 {
        return Err(Error::InvalidPhase);
    }
    Ok(prices)
}

/// Splits a phase's features into whole plans and fragments.
///
/// A plan is whole iff every feature the catalog defines under it is
/// present in the phase; features of partially-present plans are
/// fragments.
fn classify(
    plan_features: &BTreeMap<Plan, BTreeSet<FeaturePlan>>,
    features: &[FeaturePlan],
) -> (Vec<Plan>, Vec<FeaturePlan>) {
    let present: BTreeSet<&FeaturePlan> = features.iter().collect();
    let mut plans = Vec::new();
    for (plan, wanted) in plan_features {
        if !wanted.is_empty() && wanted.iter().all(|fp| present.contains(fp)) {
            plans.push(plan.clone());
        }
    }
    let whole: BTreeSet<&Plan> = plans.iter().collect();
    let fragments = features
        .iter()
        .filter(|fp| !whole.contains(fp.plan()))
        .cloned()
        .collect();
    (plans, fragments)
}

/// A phase in provider terms, ready to encode.
struct WirePhase {
    start: i64,
    end: Option<i64>,
    prices: Vec<String>,
}

fn encode_phases(form: &mut Form, phases: &[WirePhase]) {
    for (i, phase) in phases.iter().enumerate() {
        form.set(format!("phases[{i}][start_date]"), phase.start);
        if let Some(end) = phase.end {
            form.set(format!("phases[{i}][end_date]"), end);
        }
        for (j, price) in phase.prices.iter().enumerate() {
            form.set(format!("phases[{i}][items][{j}][price]"), price.as_str());
        }
    }
}

impl Client {
    /// Finds the org's schedule that is still running or yet to start.
    async fn active_schedule(&self, customer: &str) -> Result<Option<wire::Schedule>> {
        let mut form = Form::new();
        form.set("customer", customer);
        let schedules: Vec<wire::Schedule> =
            slurp(&self.stripe, "GET", "/v1/subscription_schedules", form).await?;
        Ok(schedules
            .into_iter()
            .find(|s| s.status == "active" || s.status == "not_started"))
    }

    async fn create_schedule(&self, customer: &str, phases: &[WirePhase]) -> Result<()> {
        let mut form = Form::new();
        form.set("customer", customer);
        encode_phases(&mut form, phases);
        form.set_idempotency_key(format!("schedule:{customer}:{}", phases[0].start));
        self.stripe.send("POST", "/v1/subscription_schedules", &form).await
    }

    async fn update_schedule(
        &self,
        id: &str,
        phases: &[WirePhase],
        proration: Option<&str>,
    ) -> Result<()> {
        let mut form = Form::new();
        encode_phases(&mut form, phases);
        if let Some(p) = proration {
            form.set("proration_behavior", p);
        }
        self.stripe
            .send("POST", &format!("/v1/subscription_schedules/{id}"), &form)
            .await
    }

    /// Replaces the org's schedule with a single phase containing exactly
    /// `features`, effective now, prorating immediately.
    ///
    /// # Errors
    ///
    /// Phase validation errors ([`Error::InvalidPhase`],
    /// [`Error::TooManyItems`], [`Error::FeatureNotFound`]) and provider
    /// errors.
    #[instrument(skip(self, features))]
    pub async fn subscribe(&self, org: &str, features: &[FeaturePlan]) -> Result<()> {
        let catalog = self.pull().await?;
        let prices = resolve_phase(&catalog, features)?;
        let customer = self.get_or_create_customer(org, None).await?;
        let now = self.now().await?.timestamp();
        let phase = WirePhase { start: now, end: None, prices };

        match self.active_schedule(&customer).await? {
            None => self.create_schedule(&customer, &[phase]).await,
            Some(existing) => {
                self.update_schedule(&existing.id, &[phase], Some("always_invoice"))
                    .await
            }
        }
    }

    /// Appends a new phase with `features`, effective now, preserving all
    /// prior phases as history.
    ///
    /// Subscribing twice at the same instant replaces the phase created by
    /// the first call instead of stacking zero-length phases.
    ///
    /// # Errors
    ///
    /// Same as [`Client::subscribe`].
    #[instrument(skip(self, features))]
    pub async fn subscribe_to(&self, org: &str, features: &[FeaturePlan]) -> Result<()> {
        let catalog = self.pull().await?;
        let prices = resolve_phase(&catalog, features)?;
        let customer = self.get_or_create_customer(org, None).await?;
        let now = self.now().await?.timestamp();

        let Some(existing) = self.active_schedule(&customer).await? else {
            let phase = WirePhase { start: now, end: None, prices };
            return self.create_schedule(&customer, &[phase]).await;
        };

        let mut phases: Vec<WirePhase> = existing
            .phases
            .iter()
            .map(|p| WirePhase {
                start: p.start_date,
                end: p.end_date,
                prices: p.items.iter().map(|i| i.price.clone()).collect(),
            })
            .collect();

        match phases.last_mut() {
            Some(last) if last.start == now => {
                last.prices = prices;
                last.end = None;
            }
            Some(last) => {
                last.end = Some(now);
                phases.push(WirePhase { start: now, end: None, prices });
            }
            None => phases.push(WirePhase { start: now, end: None, prices }),
        }

        self.update_schedule(&existing.id, &phases, None).await
    }

    /// Replaces the org's schedule wholesale, optionally updating org info
    /// first.
    ///
    /// With no phases this degenerates to an info-only update (see
    /// [`Client::schedule_now`]).
    ///
    /// # Errors
    ///
    /// Info validation errors ([`Error::InvalidEmail`],
    /// [`Error::InvalidMetadata`]), phase validation errors, and provider
    /// errors.
    #[instrument(skip(self, info, phases))]
    pub async fn schedule(
        &self,
        org: &str,
        info: Option<&OrgInfo>,
        phases: &[PhaseSpec],
    ) -> Result<()> {
        // All validation runs before any side effect: a bad phase must not
        // leave a half-applied info update behind.
        if phases.is_empty() {
            if let Some(info) = info {
                self.put_customer(org, info).await?;
            }
            return Ok(());
        }

        let catalog = self.pull().await?;
        let now = self.now().await?.timestamp();
        let mut wire_phases = Vec::with_capacity(phases.len());
        for spec in phases {
            let prices = resolve_phase(&catalog, &spec.features)?;
            let start = spec.effective.map_or(now, |t| t.timestamp());
            wire_phases.push(WirePhase { start, end: None, prices });
        }
        // Interior phases end where their successor starts.
        for i in 0..wire_phases.len().saturating_sub(1) {
            wire_phases[i].end = Some(wire_phases[i + 1].start);
        }

        if let Some(info) = info {
            self.put_customer(org, info).await?;
        }
        let customer = self.get_or_create_customer(org, info).await?;
        match self.active_schedule(&customer).await? {
            None => self.create_schedule(&customer, &wire_phases).await,
            Some(existing) => self.update_schedule(&existing.id, &wire_phases, None).await,
        }
    }

    /// Updates only the org's contact info and metadata.
    ///
    /// # Errors
    ///
    /// Same as [`Client::put_customer`].
    pub async fn schedule_now(&self, org: &str, info: Option<&OrgInfo>) -> Result<()> {
        self.schedule(org, info, &[]).await
    }

    /// Returns every phase ever scheduled for the org, chronological, with
    /// exactly one marked current against the provider clock.
    ///
    /// # Errors
    ///
    /// [`Error::OrgNotFound`] for unknown orgs, and provider errors.
    #[instrument(skip(self))]
    pub async fn lookup_phases(&self, org: &str) -> Result<Vec<Phase>> {
        let customer = self.customer_id(org).await?;
        let catalog = self.pull().await?;

        let by_price: BTreeMap<&str, &Feature> = catalog
            .iter()
            .map(|f| (f.provider_id.as_str(), f))
            .collect();
        let mut plan_features: BTreeMap<Plan, BTreeSet<FeaturePlan>> = BTreeMap::new();
        for f in &catalog {
            plan_features
                .entry(f.feature_plan.plan().clone())
                .or_default()
                .insert(f.feature_plan.clone());
        }

        let mut form = Form::new();
        form.set("customer", customer.as_str());
        let schedules: Vec<wire::Schedule> =
            slurp(&self.stripe, "GET", "/v1/subscription_schedules", form).await?;

        let mut raw: Vec<(i64, Vec<FeaturePlan>)> = Vec::new();
        for schedule in &schedules {
            for phase in &schedule.phases {
                let features: Vec<FeaturePlan> = phase
                    .items
                    .iter()
                    .filter_map(|item| by_price.get(item.price.as_str()))
                    .map(|f| f.feature_plan.clone())
                    .collect();
                raw.push((phase.start_date, features));
            }
        }
        raw.sort_by_key(|(start, _)| *start);

        let now = self.now().await?.timestamp();
        let current_idx = raw
            .iter()
            .enumerate()
            .filter(|(_, (start, _))| *start <= now)
            .map(|(i, _)| i)
            .next_back();

        let mut phases = Vec::with_capacity(raw.len());
        for (i, (start, mut features)) in raw.into_iter().enumerate() {
            sort_grouped_by_version(&mut features);
            let (plans, fragments) = classify(&plan_features, &features);
            phases.push(Phase {
                org: org.to_owned(),
                effective: unix_time(start),
                current: Some(i) == current_idx,
                features,
                plans,
                fragments,
            });
        }
        Ok(phases)
    }

    /// Reports the provider customer id for `org`.
    ///
    /// # Errors
    ///
    /// [`Error::OrgNotFound`] when no customer carries the org marker.
    pub async fn whois(&self, org: &str) -> Result<String> {
        self.customer_id(org).await
    }

    /// Reports everything known about `org`: customer id plus contact
    /// info, with reserved metadata filtered out.
    ///
    /// # Errors
    ///
    /// [`Error::OrgNotFound`] and provider errors.
    pub async fn lookup_org(&self, org: &str) -> Result<(String, OrgInfo)> {
        let id = self.customer_id(org).await?;
        let customer: wire::Customer = self
            .stripe
            .do_request("GET", &format!("/v1/customers/{id}"), &Form::new())
            .await?;
        let metadata = customer
            .metadata
            .into_iter()
            .filter(|(k, _)| !k.starts_with("tier."))
            .collect();
        Ok((
            id,
            OrgInfo {
                email: customer.email.unwrap_or_default(),
                name: customer.name.unwrap_or_default(),
                description: customer.description.unwrap_or_default(),
                phone: customer.phone.unwrap_or_default(),
                metadata,
            },
        ))
    }

    /// Lists every organization known to the provider.
    ///
    /// # Errors
    ///
    /// Provider errors.
    pub async fn list_orgs(&self) -> Result<Vec<Org>> {
        let customers: Vec<wire::Customer> =
            slurp(&self.stripe, "GET", "/v1/customers", Form::new()).await?;
        let mut by_org: BTreeMap<String, Org> = BTreeMap::new();
        for c in customers {
            let Some(org) = c.metadata.get(ORG_METADATA_KEY) else {
                continue;
            };
            let entry = Org {
                id: org.clone(),
                provider_id: c.id,
                email: c.email.unwrap_or_default(),
            };
            // Duplicates collapse onto the smallest customer id.
            by_org
                .entry(org.clone())
                .and_modify(|existing| {
                    if entry.provider_id < existing.provider_id {
                        *existing = entry.clone();
                    }
                })
                .or_insert(entry);
        }
        Ok(by_org.into_values().collect())
    }

    /// Creates or updates `org`'s contact info and metadata.
    ///
    /// Validation happens before any provider call: an invalid email or a
    /// reserved metadata key aborts the whole update with no partial
    /// effect. An entirely empty update is a successful no-op.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidEmail`], [`Error::InvalidMetadata`], and provider
    /// errors.
    #[instrument(skip(self, info))]
    pub async fn put_customer(&self, org: &str, info: &OrgInfo) -> Result<()> {
        validate_org_info(info)?;

        match self.find_customer(org).await? {
            Some(id) => {
                let mut form = Form::new();
                apply_org_info(&mut form, info);
                if form.is_empty() {
                    return Ok(());
                }
                self.stripe
                    .send("POST", &format!("/v1/customers/{id}"), &form)
                    .await
            }
            None => {
                self.get_or_create_customer(org, Some(info)).await?;
                Ok(())
            }
        }
    }
}
