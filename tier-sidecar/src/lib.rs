//! The tier sidecar: a small HTTP service application servers run next to
//! themselves to reach the control plane.
//!
//! Endpoints (all JSON, errors as `{status, code, message}`):
//!
//! | Method & path        | Purpose                                  |
//! |----------------------|------------------------------------------|
//! | `POST /v1/push`      | Push the pricing model to the provider   |
//! | `GET  /v1/pull`      | Pull the model back                      |
//! | `POST /v1/subscribe` | Schedule an org onto features or plans   |
//! | `GET  /v1/phase`     | The org's current phase                  |
//! | `GET  /v1/limits`    | Per-feature usage and limits             |
//! | `POST /v1/report`    | Report metered usage                     |
//! | `GET  /v1/whois`     | Org → provider customer id               |
//! | `GET  /v1/whoami`    | Identity of the configured provider key  |

#![warn(missing_docs)]

pub mod error;
pub mod observability;
pub mod routes;
pub mod state;
