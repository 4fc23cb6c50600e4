//! Tier control plane: declarative pricing realized on Stripe.
//!
//! A vendor writes its pricing model — plans, features, tiered prices,
//! metered aggregation — as a declarative document. This crate bridges
//! that model onto the payment provider's concrete one: products, prices,
//! subscription schedules, customers, and usage records. Stripe stays the
//! system of record; nothing is persisted locally.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  App servers     │  push/pull, subscribe, report, can
//! └────────┬─────────┘
//!          │ HTTP (the tier sidecar, see the tier-sidecar crate)
//! ┌────────▼─────────────────────────────────────────┐
//! │          tier-control (this crate)               │
//! │  ┌──────────┐ ┌──────────┐ ┌───────────────────┐ │
//! │  │ catalog  │ │ schedule │ │ usage/entitlement │ │
//! │  │ (C)      │ │ (D)      │ │ (E/F)             │ │
//! │  └────┬─────┘ └────┬─────┘ └─────────┬─────────┘ │
//! │       └────────────┼─────────────────┘           │
//! │              ┌─────▼──────┐   references: refs   │
//! │              │   stripe   │   retries: backoff   │
//! │              │ client (B) │                      │
//! │              └─────┬──────┘                      │
//! └────────────────────┼─────────────────────────────┘
//!                      │ HTTPS, form-encoded
//!              ┌───────▼───────┐
//!              │    Stripe     │
//!              └───────────────┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use tier_control::control::Client;
//! use tier_control::feature::{Feature, Tier};
//!
//! # async fn example() -> tier_control::error::Result<()> {
//! let client = Client::from_env()?;
//!
//! // Push a one-feature plan.
//! let feature = Feature {
//!     tiers: vec![Tier { upto: 0, price: 100, base: 0 }],
//!     ..Feature::new("feature:convert@plan:free@0".parse()?)
//! };
//! client.push(&[feature], |f, err| match err {
//!     None => println!("pushed {}", f.feature_plan),
//!     Some(err) => eprintln!("failed {}: {err}", f.feature_plan),
//! })
//! .await;
//!
//! // Subscribe an org and report usage.
//! client.subscribe("org:acme", &["feature:convert@plan:free@0".parse()?]).await?;
//! let feature = "feature:convert".parse()?;
//! let answer = client.can("org:acme", &feature).await;
//! if answer.ok() {
//!     // ... do the work ...
//!     answer.report().await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Module organization
//!
//! - [`refs`]: the name-reference grammar everything is addressed by
//! - [`stripe`]: form encoding, request execution, pagination, idempotency
//! - [`backoff`]: bounded jittered retries for safe-to-retry calls
//! - [`feature`]: the feature/tier model and its invariants
//! - [`control`]: catalog translation, schedules, usage, entitlement
//! - [`api`]: the JSON wire types of the sidecar endpoints
//! - [`error`]: the error taxonomy
//!
//! # Concurrency
//!
//! Everything is safe for concurrent use across independent organizations.
//! There are no in-process locks: consistency under concurrency relies on
//! deterministic idempotency keys at the provider (customer creation keys
//! on the org id, so parallel subscribes collapse to one customer). All
//! I/O is plain async; dropping or timing out a future aborts its in-flight
//! request.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod api;
pub mod backoff;
pub mod control;
pub mod error;
pub mod feature;
pub mod refs;
pub mod stripe;

pub use control::Client;
pub use error::{Error, Result};
pub use feature::{Feature, INF, Tier};
