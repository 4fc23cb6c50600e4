//! The feature model: what a priced unit of product functionality looks
//! like before it is realized as a Stripe product and price.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::refs::FeaturePlan;

/// The "unbounded" sentinel for tier caps and limits (`2^63 - 1`).
pub const INF: i64 = i64::MAX;

/// Billing interval of a feature's price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    /// Billed daily.
    #[serde(rename = "@daily")]
    Daily,
    /// Billed monthly.
    #[default]
    #[serde(rename = "@monthly")]
    Monthly,
    /// Billed yearly.
    #[serde(rename = "@yearly")]
    Yearly,
}

impl Interval {
    /// The Stripe `recurring[interval]` value.
    #[must_use]
    pub fn stripe_interval(self) -> &'static str {
        match self {
            Self::Daily => "day",
            Self::Monthly => "month",
            Self::Yearly => "year",
        }
    }

    /// The tier wire name (`@daily`, `@monthly`, `@yearly`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "@daily",
            Self::Monthly => "@monthly",
            Self::Yearly => "@yearly",
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "@daily" => Ok(Self::Daily),
            "@monthly" => Ok(Self::Monthly),
            "@yearly" => Ok(Self::Yearly),
            _ => Err(Error::InvalidFeature(format!("unknown interval {s:?}"))),
        }
    }
}

/// How metered usage aggregates within a billing period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    /// Usage sums over the period.
    #[default]
    Sum,
    /// The maximum reported value wins.
    Max,
    /// The last value reported during the period wins.
    Last,
    /// The last value ever reported wins, across periods.
    LastEver,
    /// Alias of [`Aggregate::LastEver`]: usage persists across periods.
    Perpetual,
}

impl Aggregate {
    /// The Stripe `recurring[aggregate_usage]` value.
    #[must_use]
    pub fn stripe_aggregate(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Last => "last_during_period",
            Self::LastEver | Self::Perpetual => "last_ever",
        }
    }

    /// The tier wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Last => "last",
            Self::LastEver => "last_ever",
            Self::Perpetual => "perpetual",
        }
    }
}

impl std::str::FromStr for Aggregate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Self::Sum),
            "max" => Ok(Self::Max),
            "last" => Ok(Self::Last),
            "last_ever" => Ok(Self::LastEver),
            "perpetual" => Ok(Self::Perpetual),
            _ => Err(Error::InvalidFeature(format!("unknown aggregate {s:?}"))),
        }
    }
}

/// How the tier table prices units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierMode {
    /// Units are distributed across tiers.
    #[default]
    Graduated,
    /// One tier prices all units.
    Volume,
}

impl TierMode {
    /// The Stripe `tiers_mode` value, which is also the tier wire name.
    #[must_use]
    pub fn stripe_mode(self) -> &'static str {
        match self {
            Self::Graduated => "graduated",
            Self::Volume => "volume",
        }
    }

    /// The tier wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.stripe_mode()
    }
}

impl std::str::FromStr for TierMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "graduated" => Ok(Self::Graduated),
            "volume" => Ok(Self::Volume),
            _ => Err(Error::InvalidFeature(format!("unknown tier mode {s:?}"))),
        }
    }
}

/// Rounding mode for the transform divisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Round divided quantities up.
    #[default]
    Up,
    /// Round divided quantities down.
    Down,
}

impl Rounding {
    /// The Stripe `transform_quantity[round]` value, which is also the tier
    /// wire name.
    #[must_use]
    pub fn stripe_round(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::str::FromStr for Rounding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            _ => Err(Error::InvalidFeature(format!("unknown rounding {s:?}"))),
        }
    }
}

/// One row of a tier table.
///
/// `upto == 0` or [`INF`] means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Highest unit this tier covers; `0` or [`INF`] means unbounded.
    #[serde(default)]
    pub upto: i64,
    /// Price per unit in minor currency units.
    #[serde(default)]
    pub price: i64,
    /// Flat fee for entering this tier, in minor currency units.
    #[serde(default)]
    pub base: i64,
}

impl Tier {
    /// The cap with the `0` sentinel normalized to [`INF`].
    #[must_use]
    pub fn effective_upto(&self) -> i64 {
        if self.upto == 0 { INF } else { self.upto }
    }
}

/// A feature definition: one nameable unit of functionality priced under
/// one plan version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    /// The billing key.
    pub feature_plan: FeaturePlan,
    /// Display title of the feature; empty falls back to the reference.
    pub title: String,
    /// Display title of the plan; empty falls back to the reference.
    pub plan_title: String,
    /// ISO 4217 currency code, lowercase.
    pub currency: String,
    /// Billing interval.
    pub interval: Interval,
    /// Base price in minor units; ignored for metered features.
    pub base: i64,
    /// Tier table; non-empty makes the feature metered.
    pub tiers: Vec<Tier>,
    /// Tier pricing mode.
    pub mode: TierMode,
    /// Usage aggregation mode.
    pub aggregate: Aggregate,
    /// Usage divisor before pricing; `0` means no transform.
    pub transform_divide_by: i64,
    /// Rounding applied with the divisor.
    pub transform_round: Rounding,
    /// Opaque provider id (the Stripe price id), set after push.
    pub provider_id: String,
}

impl Feature {
    /// Creates a licensed feature with defaults: monthly interval, `usd`,
    /// graduated mode, sum aggregation, no tiers.
    #[must_use]
    pub fn new(feature_plan: FeaturePlan) -> Self {
        Self {
            feature_plan,
            title: String::new(),
            plan_title: String::new(),
            currency: "usd".to_owned(),
            interval: Interval::default(),
            base: 0,
            tiers: Vec::new(),
            mode: TierMode::default(),
            aggregate: Aggregate::default(),
            transform_divide_by: 0,
            transform_round: Rounding::default(),
            provider_id: String::new(),
        }
    }

    /// Reports whether the feature is metered (has a tier table).
    #[must_use]
    pub fn is_metered(&self) -> bool {
        !self.tiers.is_empty()
    }

    /// The feature's usage limit: the sum of tier caps for metered
    /// features, [`INF`] otherwise. Any unbounded tier makes the limit
    /// unbounded.
    #[must_use]
    pub fn limit(&self) -> i64 {
        if !self.is_metered() {
            return INF;
        }
        self.tiers
            .iter()
            .fold(0_i64, |acc, t| acc.saturating_add(t.effective_upto()))
    }

    /// The provider product name: `"<PlanTitle> - <FeatureTitle>"`.
    #[must_use]
    pub fn product_name(&self) -> String {
        let plan_title = if self.plan_title.is_empty() {
            self.feature_plan.plan().to_string()
        } else {
            self.plan_title.clone()
        };
        let title = if self.title.is_empty() {
            self.feature_plan.to_string()
        } else {
            self.title.clone()
        };
        format!("{plan_title} - {title}")
    }

    /// Validates the definition before it is pushed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFeature`] when the currency is missing, a
    /// price is negative, or the tier table is not strictly ascending by
    /// cap.
    pub fn validate(&self) -> Result<()> {
        if self.currency.is_empty() {
            return Err(Error::InvalidFeature(format!(
                "{}: missing currency",
                self.feature_plan
            )));
        }
        if self.base < 0 {
            return Err(Error::InvalidFeature(format!(
                "{}: negative base price",
                self.feature_plan
            )));
        }
        for t in &self.tiers {
            if t.price < 0 || t.base < 0 || t.upto < 0 {
                return Err(Error::InvalidFeature(format!(
                    "{}: negative tier value",
                    self.feature_plan
                )));
            }
        }
        for pair in self.tiers.windows(2) {
            if pair[0].effective_upto() >= pair[1].effective_upto() {
                return Err(Error::InvalidFeature(format!(
                    "{}: tiers must be strictly ascending by upto",
                    self.feature_plan
                )));
            }
        }
        Ok(())
    }
}

/// Projects a feature list onto its feature-plan references.
#[must_use]
pub fn feature_plans(features: &[Feature]) -> Vec<FeaturePlan> {
    features.iter().map(|f| f.feature_plan.clone()).collect()
}

/// Resolves a plan reference to the feature-plans defined under it.
///
/// # Errors
///
/// Returns [`Error::FeatureNotFound`] when no feature is defined under the
/// plan.
pub fn expand(features: &[Feature], plan: &crate::refs::Plan) -> Result<Vec<FeaturePlan>> {
    let fps: Vec<FeaturePlan> = features
        .iter()
        .filter(|f| f.feature_plan.plan() == plan)
        .map(|f| f.feature_plan.clone())
        .collect();
    if fps.is_empty() {
        return Err(Error::FeatureNotFound);
    }
    Ok(fps)
}
