//! Stripe object shapes the control plane reads.
//!
//! Only the fields the engines consume are modeled; everything else in the
//! provider's responses is ignored. These are deliberately private: the
//! public surface speaks [`crate::feature::Feature`], [`super::Phase`], and
//! friends.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::stripe::PageItem;

#[derive(Debug, Deserialize)]
pub(crate) struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl PageItem for Customer {
    fn page_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Product {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Price {
    pub id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub transform_quantity: Option<TransformQuantity>,
}

impl PageItem for Price {
    fn page_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TransformQuantity {
    pub divide_by: i64,
    #[serde(default)]
    pub round: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Schedule {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub phases: Vec<SchedulePhase>,
}

impl PageItem for Schedule {
    fn page_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SchedulePhase {
    pub start_date: i64,
    #[serde(default)]
    pub end_date: Option<i64>,
    #[serde(default)]
    pub items: Vec<ScheduleItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleItem {
    pub price: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Subscription {
    pub id: String,
    #[serde(default)]
    pub items: SubscriptionItems,
}

impl PageItem for Subscription {
    fn page_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubscriptionItem {
    pub id: String,
    pub price: Price,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LineItem {
    pub id: String,
    #[serde(default)]
    pub quantity: i64,
    pub period: Period,
    pub price: Price,
}

impl PageItem for LineItem {
    fn page_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Period {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TestClock {
    #[allow(dead_code)]
    pub id: String,
    pub frozen_time: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Account {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}
