//! Wire types for the sidecar's public endpoints.
//!
//! These are the JSON shapes application servers speak: the declarative
//! pricing model for push/pull, the subscribe/report request bodies, and
//! the response envelopes. Conversion between the model document and the
//! flat [`Feature`] list used internally lives here too.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::control::OrgInfo;
use crate::feature::{Aggregate, Feature, Interval, Rounding, Tier, TierMode};
use crate::refs::{FeaturePlan, Name, Plan};

fn default_currency() -> String {
    "usd".to_owned()
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

fn is_default_round(r: &Rounding) -> bool {
    *r == Rounding::Up
}

/// The declarative pricing model: plans keyed by reference, each carrying
/// its features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Plans keyed by `plan:<name>@<version>`.
    #[serde(default)]
    pub plans: BTreeMap<Plan, PlanDef>,
}

/// One plan in the model document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDef {
    /// Display title of the plan.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Features keyed by `feature:<name>`.
    #[serde(default)]
    pub features: BTreeMap<Name, FeatureDef>,
}

/// One feature in the model document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    /// Display title of the feature.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Billing interval; defaults to `@monthly`.
    #[serde(default)]
    pub interval: Interval,
    /// Currency code; defaults to `usd`.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Base price in minor units.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub base: i64,
    /// Tier pricing mode; defaults to `graduated`.
    #[serde(default)]
    pub mode: TierMode,
    /// Aggregation mode; defaults to `sum`.
    #[serde(default)]
    pub aggregate: Aggregate,
    /// Tier table; non-empty makes the feature metered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<Tier>,
    /// Usage divisor; `0` means no transform.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub divide_by: i64,
    /// Rounding applied with the divisor.
    #[serde(default, skip_serializing_if = "is_default_round")]
    pub round: Rounding,
}

impl Default for FeatureDef {
    fn default() -> Self {
        Self {
            title: String::new(),
            interval: Interval::default(),
            currency: default_currency(),
            base: 0,
            mode: TierMode::default(),
            aggregate: Aggregate::default(),
            tiers: Vec::new(),
            divide_by: 0,
            round: Rounding::default(),
        }
    }
}

/// Flattens a model document into the feature list the control plane
/// works with.
#[must_use]
pub fn model_to_features(model: &Model) -> Vec<Feature> {
    let mut features = Vec::new();
    for (plan, plan_def) in &model.plans {
        for (name, def) in &plan_def.features {
            features.push(Feature {
                feature_plan: FeaturePlan::from_parts(name, plan.clone()),
                title: def.title.clone(),
                plan_title: plan_def.title.clone(),
                currency: def.currency.clone(),
                interval: def.interval,
                base: def.base,
                tiers: def.tiers.clone(),
                mode: def.mode,
                aggregate: def.aggregate,
                transform_divide_by: def.divide_by,
                transform_round: def.round,
                provider_id: String::new(),
            });
        }
    }
    features
}

/// Groups a feature list back into the model document shape.
#[must_use]
pub fn features_to_model(features: &[Feature]) -> Model {
    let mut model = Model::default();
    for f in features {
        let plan = model
            .plans
            .entry(f.feature_plan.plan().clone())
            .or_default();
        if plan.title.is_empty() {
            plan.title = f.plan_title.clone();
        }
        plan.features.insert(
            f.feature_plan.name(),
            FeatureDef {
                title: f.title.clone(),
                interval: f.interval,
                currency: f.currency.clone(),
                base: f.base,
                mode: f.mode,
                aggregate: f.aggregate,
                tiers: f.tiers.clone(),
                divide_by: f.transform_divide_by,
                round: f.transform_round,
            },
        );
    }
    model
}

/// The outcome of pushing one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResult {
    /// The feature the result is about.
    pub feature: FeaturePlan,
    /// `"ok"` or `"failed"`.
    pub status: String,
    /// Failure reason, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Response body of `POST /v1/push`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// One result per feature in the pushed model.
    pub results: Vec<PushResult>,
}

/// Response body of `GET /v1/phase`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResponse {
    /// When the current phase took effect.
    pub effective: DateTime<Utc>,
    /// Every feature-plan in the phase.
    pub features: Vec<FeaturePlan>,
    /// Plans wholly covered by the phase.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<Plan>,
    /// Features of partially covered plans.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments: Vec<FeaturePlan>,
}

/// One entry of a limits response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageItem {
    /// The feature name.
    pub feature: Name,
    /// Units consumed in the current period.
    pub used: i64,
    /// The limit; `2^63 - 1` means unbounded.
    pub limit: i64,
}

/// Response body of `GET /v1/limits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageResponse {
    /// The org the usage belongs to.
    pub org: String,
    /// Per-feature usage, ordered by feature name.
    #[serde(default)]
    pub usage: Vec<UsageItem>,
}

/// Response body of `GET /v1/whois`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhoIsResponse {
    /// The org asked about.
    pub org: String,
    /// The provider customer id.
    pub stripe_id: String,
    /// Contact info, present when `include=info` was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<OrgInfo>,
}

/// Response body of `GET /v1/whoami`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    /// The provider account id.
    pub provider_id: String,
    /// The account email, when known.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    /// Non-secret prefix of the configured key.
    pub key_prefix: String,
    /// Whether the key is live-mode.
    pub is_live: bool,
}

fn default_n() -> i64 {
    1
}

/// Request body of `POST /v1/report`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// The org reporting usage.
    pub org: String,
    /// The feature used.
    pub feature: Name,
    /// Units used; defaults to 1.
    #[serde(default = "default_n")]
    pub n: i64,
    /// When the usage occurred; defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
    /// Replace the period value instead of incrementing.
    #[serde(default)]
    pub clobber: bool,
}

/// One phase of a subscribe request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulePhase {
    /// When the phase takes effect; defaults to now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective: Option<DateTime<Utc>>,
    /// Plan or feature-plan references, expanded server-side.
    #[serde(default)]
    pub features: Vec<String>,
}

/// Request body of `POST /v1/subscribe`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    /// The org to subscribe.
    pub org: String,
    /// Optional org info to apply with the schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<OrgInfo>,
    /// The phases to schedule; empty means info-only.
    #[serde(default)]
    pub phases: Vec<SchedulePhase>,
}

/// The error envelope every endpoint uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// HTTP status.
    pub status: u16,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_defaults_fill_in() {
        let json = r#"{
            "plans": {
                "plan:free@0": {
                    "features": {
                        "feature:convert": {}
                    }
                }
            }
        }"#;
        let model: Model = serde_json::from_str(json).unwrap();
        let features = model_to_features(&model);
        assert_eq!(features.len(), 1);
        let f = &features[0];
        assert_eq!(f.feature_plan.to_string(), "feature:convert@plan:free@0");
        assert_eq!(f.currency, "usd");
        assert_eq!(f.interval, Interval::Monthly);
        assert_eq!(f.aggregate, Aggregate::Sum);
        assert!(!f.is_metered());
    }

    #[test]
    fn model_round_trips_through_features() {
        let json = r#"{
            "plans": {
                "plan:pro@1": {
                    "title": "Pro",
                    "features": {
                        "feature:seats": {
                            "title": "Seats",
                            "interval": "@yearly",
                            "currency": "eur",
                            "mode": "volume",
                            "aggregate": "perpetual",
                            "tiers": [{"upto": 5, "price": 100, "base": 0}]
                        },
                        "feature:support": {"base": 1000}
                    }
                }
            }
        }"#;
        let model: Model = serde_json::from_str(json).unwrap();
        let features = model_to_features(&model);
        assert_eq!(features.len(), 2);
        let back = features_to_model(&features);
        assert_eq!(back, model);
    }

    #[test]
    fn report_request_defaults() {
        let r: ReportRequest =
            serde_json::from_str(r#"{"org": "org:acme", "feature": "feature:x"}"#).unwrap();
        assert_eq!(r.n, 1);
        assert!(r.at.is_none());
        assert!(!r.clobber);
    }

    #[test]
    fn push_result_omits_empty_reason() {
        let ok = PushResult {
            feature: "feature:x@plan:p@0".parse().unwrap(),
            status: "ok".to_owned(),
            reason: None,
        };
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("reason"));
    }

    #[test]
    fn schedule_request_accepts_minimal_body() {
        let r: ScheduleRequest = serde_json::from_str(
            r#"{"org": "org:acme", "phases": [{"features": ["plan:free@0"]}]}"#,
        )
        .unwrap();
        assert_eq!(r.phases.len(), 1);
        assert!(r.info.is_none());
        assert!(r.phases[0].effective.is_none());
    }
}
