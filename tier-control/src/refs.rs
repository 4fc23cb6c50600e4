//! Name references for plans, features, and feature-plan pairs.
//!
//! Every entity in the control plane is addressed by one of three reference
//! shapes with strict textual syntax:
//!
//! - [`Plan`]: `plan:<name>@<version>`
//! - [`Name`]: `feature:<name>` (a feature with no plan attached)
//! - [`FeaturePlan`]: `feature:<name>@plan:<planName>@<version>`
//!
//! `<name>` is one or more `[a-zA-Z0-9_]+` segments joined by `:`, starting
//! with a letter. `<version>` is one or more `[a-zA-Z0-9]+` groups joined by
//! `.`. There is no normalization: parsing either accepts the input exactly
//! as written or fails with [`Error::InvalidReference`], and every reference
//! prints back byte-identical to the string it was parsed from.
//!
//! Comparison is lexicographic on the textual form. A second, grouped order
//! exists for feature-plans ([`sort_grouped_by_version`]): group by feature
//! name, then order by version within each group, stably.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Reports whether `s` is a valid reference name.
///
/// Segments of ASCII alphanumerics and underscores, joined by `:`, first
/// character a letter.
fn valid_name(s: &str) -> bool {
    if !s.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    s.split(':')
        .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}

/// Reports whether `s` is a valid version tag: dotted groups of ASCII
/// alphanumerics.
fn valid_version(s: &str) -> bool {
    !s.is_empty()
        && s.split('.')
            .all(|g| !g.is_empty() && g.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// A feature name with no plan attached: `feature:<name>`.
///
/// This is the shape application servers use when reporting usage or asking
/// entitlement questions; the plan half is resolved against the org's
/// current phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    name: String,
}

impl Name {
    /// The bare name without the `feature:` prefix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feature:{}", self.name)
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(name) = s.strip_prefix("feature:") else {
            return Err(Error::InvalidReference(s.to_owned()));
        };
        if !valid_name(name) {
            return Err(Error::InvalidReference(s.to_owned()));
        }
        Ok(Self { name: name.to_owned() })
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.bytes().cmp(other.name.bytes())
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A versioned plan reference: `plan:<name>@<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Plan {
    name: String,
    version: String,
}

impl Plan {
    /// The bare plan name without prefix or version.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The version tag.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Bytes of the textual form, for lexicographic comparison without
    /// allocating.
    fn text_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        "plan:"
            .bytes()
            .chain(self.name.bytes())
            .chain("@".bytes())
            .chain(self.version.bytes())
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plan:{}@{}", self.name, self.version)
    }
}

impl FromStr for Plan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(rest) = s.strip_prefix("plan:") else {
            return Err(Error::InvalidReference(s.to_owned()));
        };
        let Some((name, version)) = rest.split_once('@') else {
            return Err(Error::InvalidReference(s.to_owned()));
        };
        if !valid_name(name) || !valid_version(version) {
            return Err(Error::InvalidReference(s.to_owned()));
        }
        Ok(Self { name: name.to_owned(), version: version.to_owned() })
    }
}

impl Ord for Plan {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text_bytes().cmp(other.text_bytes())
    }
}

impl PartialOrd for Plan {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A feature under a specific plan version:
/// `feature:<name>@plan:<planName>@<version>`.
///
/// This is the primary billing key. It projects onto the feature name
/// ([`FeaturePlan::name`]) and the plan ([`FeaturePlan::plan`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeaturePlan {
    name: String,
    plan: Plan,
}

impl FeaturePlan {
    /// Builds a feature-plan from already-validated components.
    #[must_use]
    pub fn from_parts(name: &Name, plan: Plan) -> Self {
        Self { name: name.name.clone(), plan }
    }

    /// Projects onto the feature name reference.
    #[must_use]
    pub fn name(&self) -> Name {
        Name { name: self.name.clone() }
    }

    /// The bare feature name without prefix.
    #[must_use]
    pub fn name_str(&self) -> &str {
        &self.name
    }

    /// Projects onto the plan reference.
    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    fn text_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        "feature:"
            .bytes()
            .chain(self.name.bytes())
            .chain("@".bytes())
            .chain(self.plan.text_bytes())
    }
}

impl fmt::Display for FeaturePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feature:{}@{}", self.name, self.plan)
    }
}

impl FromStr for FeaturePlan {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(rest) = s.strip_prefix("feature:") else {
            return Err(Error::InvalidReference(s.to_owned()));
        };
        let Some((name, plan)) = rest.split_once('@') else {
            return Err(Error::InvalidReference(s.to_owned()));
        };
        if !valid_name(name) {
            return Err(Error::InvalidReference(s.to_owned()));
        }
        let plan = plan
            .parse::<Plan>()
            .map_err(|_| Error::InvalidReference(s.to_owned()))?;
        Ok(Self { name: name.to_owned(), plan })
    }
}

impl Ord for FeaturePlan {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text_bytes().cmp(other.text_bytes())
    }
}

impl PartialOrd for FeaturePlan {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Sorts feature-plans grouped by feature name, versions ordered within
/// each group. The sort is stable.
pub fn sort_grouped_by_version(fps: &mut [FeaturePlan]) {
    fps.sort_by(|a, b| {
        a.name
            .cmp(&b.name)
            .then_with(|| a.plan.version.cmp(&b.plan.version))
    });
}

/// Comparator ordering feature-plans by feature name only.
///
/// Useful for presenting usage listings where the plan half is noise.
#[must_use]
pub fn by_name(a: &FeaturePlan, b: &FeaturePlan) -> Ordering {
    a.name.cmp(&b.name)
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(Name);
string_serde!(Plan);
string_serde!(FeaturePlan);

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn fp(s: &str) -> FeaturePlan {
        s.parse().unwrap()
    }

    #[test]
    fn parse_name() {
        let n: Name = "feature:convert".parse().unwrap();
        assert_eq!(n.to_string(), "feature:convert");
        assert_eq!(n.as_str(), "convert");

        let n: Name = "feature:convert:pdf_v2".parse().unwrap();
        assert_eq!(n.to_string(), "feature:convert:pdf_v2");
    }

    #[test]
    fn parse_name_rejects() {
        for s in [
            "",
            "feature:",
            "convert",
            "plan:convert",
            "feature:9lives",
            "feature:a b",
            "feature:a@plan:p@0", // feature-plan, not a bare name
            "feature::x",
            "feature:x:",
            "Feature:x",
        ] {
            let err = s.parse::<Name>().unwrap_err();
            assert!(matches!(err, Error::InvalidReference(_)), "accepted {s:?}");
        }
    }

    #[test]
    fn parse_plan() {
        let p: Plan = "plan:pro@1".parse().unwrap();
        assert_eq!(p.name(), "pro");
        assert_eq!(p.version(), "1");
        assert_eq!(p.to_string(), "plan:pro@1");

        let p: Plan = "plan:pro@2023.10.1".parse().unwrap();
        assert_eq!(p.version(), "2023.10.1");
    }

    #[test]
    fn parse_plan_rejects() {
        for s in [
            "",
            "plan:pro",
            "plan:pro@",
            "plan:@1",
            "plan:pro@1@2",
            "plan:pro@1..2",
            "plan:pro@.1",
            "plan:pro@1_0",
            "feature:pro@1",
        ] {
            let err = s.parse::<Plan>().unwrap_err();
            assert!(matches!(err, Error::InvalidReference(_)), "accepted {s:?}");
        }
    }

    #[test]
    fn parse_feature_plan() {
        let f = fp("feature:convert@plan:pro@1");
        assert_eq!(f.to_string(), "feature:convert@plan:pro@1");
        assert_eq!(f.name().to_string(), "feature:convert");
        assert_eq!(f.plan().to_string(), "plan:pro@1");
    }

    #[test]
    fn parse_feature_plan_rejects() {
        for s in [
            "feature:convert",
            "feature:convert@pro@1",
            "feature:convert@plan:pro",
            "plan:pro@1",
            "feature:@plan:pro@1",
            "feature:convert@plan:pro@1@2",
        ] {
            let err = s.parse::<FeaturePlan>().unwrap_err();
            assert!(matches!(err, Error::InvalidReference(_)), "accepted {s:?}");
        }
    }

    #[test]
    fn ordering_is_textual() {
        // '@' (0x40) sorts below digits and letters, so the order of the
        // parsed values must track the order of the full strings even when
        // one name is a prefix of another.
        let a = fp("feature:a@plan:p@0");
        let b = fp("feature:a1@plan:p@0");
        assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));

        let p: Plan = "plan:a@x".parse().unwrap();
        let q: Plan = "plan:a1@x".parse().unwrap();
        assert_eq!(p.cmp(&q), p.to_string().cmp(&q.to_string()));
    }

    #[test]
    fn grouped_sort_groups_by_name_then_version() {
        let mut fps = vec![
            fp("feature:b@plan:p@1"),
            fp("feature:a@plan:q@1"),
            fp("feature:b@plan:q@0"),
            fp("feature:a@plan:p@0"),
        ];
        sort_grouped_by_version(&mut fps);
        let got: Vec<String> = fps.iter().map(ToString::to_string).collect();
        assert_eq!(
            got,
            [
                "feature:a@plan:p@0",
                "feature:a@plan:q@1",
                "feature:b@plan:q@0",
                "feature:b@plan:p@1",
            ]
        );
    }

    #[test]
    fn grouped_sort_is_stable_within_same_version() {
        let mut fps = vec![fp("feature:a@plan:q@0"), fp("feature:a@plan:p@0")];
        sort_grouped_by_version(&mut fps);
        // Same name and version: original order preserved.
        assert_eq!(fps[0].plan().name(), "q");
        assert_eq!(fps[1].plan().name(), "p");
    }

    #[test]
    fn by_name_ignores_plan() {
        let a = fp("feature:a@plan:z@9");
        let b = fp("feature:b@plan:a@0");
        assert_eq!(by_name(&a, &b), Ordering::Less);
        assert_eq!(by_name(&b, &a), Ordering::Greater);
        let a2 = fp("feature:a@plan:other@1");
        assert_eq!(by_name(&a, &a2), Ordering::Equal);
    }

    #[test]
    fn serde_round_trip() {
        let f = fp("feature:convert@plan:pro@1");
        let json = serde_json::to_string(&f).unwrap();
        assert_eq!(json, "\"feature:convert@plan:pro@1\"");
        let back: FeaturePlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);

        assert!(serde_json::from_str::<FeaturePlan>("\"nope\"").is_err());
    }

    prop_compose! {
        fn arb_name()(first in "[a-zA-Z]", rest in "[a-zA-Z0-9_]{0,8}", extra in proptest::option::of("[a-zA-Z0-9_]{1,4}")) -> String {
            match extra {
                Some(seg) => format!("{first}{rest}:{seg}"),
                None => format!("{first}{rest}"),
            }
        }
    }

    prop_compose! {
        fn arb_version()(head in "[a-zA-Z0-9]{1,4}", tail in proptest::option::of("[a-zA-Z0-9]{1,4}")) -> String {
            match tail {
                Some(t) => format!("{head}.{t}"),
                None => head,
            }
        }
    }

    proptest! {
        #[test]
        fn round_trips_byte_identical(name in arb_name(), plan in arb_name(), version in arb_version()) {
            let s = format!("feature:{name}@plan:{plan}@{version}");
            let parsed: FeaturePlan = s.parse().unwrap();
            prop_assert_eq!(parsed.to_string(), s);

            let s = format!("plan:{plan}@{version}");
            let parsed: Plan = s.parse().unwrap();
            prop_assert_eq!(parsed.to_string(), s);

            let s = format!("feature:{name}");
            let parsed: Name = s.parse().unwrap();
            prop_assert_eq!(parsed.to_string(), s);
        }
    }
}
