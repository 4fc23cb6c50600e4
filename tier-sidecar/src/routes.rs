//! The sidecar's public endpoints.
//!
//! Each handler is a thin projection over the control plane: parse the
//! query or body, call the engine, map errors to the stable envelope.
//! Behavior lives in tier-control; nothing here talks to the provider
//! directly.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tier_control::api::{
    self, Model, PhaseResponse, PushResponse, PushResult, ReportRequest, ScheduleRequest,
    UsageItem, UsageResponse, WhoAmIResponse, WhoIsResponse,
};
use tier_control::control::{Report, schedule::PhaseSpec};
use tier_control::error::Error;

use crate::error::ApiError;
use crate::state::AppState;

/// Builds the sidecar router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/push", post(push))
        .route("/v1/pull", get(pull))
        .route("/v1/subscribe", post(subscribe))
        .route("/v1/phase", get(phase))
        .route("/v1/limits", get(limits))
        .route("/v1/report", post(report))
        .route("/v1/whois", get(whois))
        .route("/v1/whoami", get(whoami))
        .with_state(state)
}

/// Validates the `org=` query/body value: must be `org:` plus a name.
fn require_org(org: &str) -> Result<&str, ApiError> {
    match org.strip_prefix("org:") {
        Some(rest) if !rest.is_empty() => Ok(org),
        _ => Err(ApiError::invalid_org()),
    }
}

async fn push(
    State(state): State<AppState>,
    Json(model): Json<Model>,
) -> Result<Json<PushResponse>, ApiError> {
    let features = api::model_to_features(&model);
    let mut results = Vec::with_capacity(features.len());
    state
        .control
        .push(&features, |f, err| {
            results.push(match err {
                None => PushResult {
                    feature: f.feature_plan.clone(),
                    status: "ok".to_owned(),
                    reason: None,
                },
                Some(err) => PushResult {
                    feature: f.feature_plan.clone(),
                    status: "failed".to_owned(),
                    reason: Some(err.to_string()),
                },
            });
        })
        .await;
    Ok(Json(PushResponse { results }))
}

async fn pull(State(state): State<AppState>) -> Result<Json<Model>, ApiError> {
    let features = state.control.pull().await?;
    Ok(Json(api::features_to_model(&features)))
}

async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<ScheduleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let org = require_org(&req.org)?;

    let mut phases = Vec::with_capacity(req.phases.len());
    for p in &req.phases {
        let features = state.control.expand_refs(&p.features).await?;
        phases.push(PhaseSpec { effective: p.effective, features });
    }

    state
        .control
        .schedule(org, req.info.as_ref(), &phases)
        .await?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Debug, Deserialize)]
struct PhaseQuery {
    org: Option<String>,
}

async fn phase(
    State(state): State<AppState>,
    Query(q): Query<PhaseQuery>,
) -> Result<Json<PhaseResponse>, ApiError> {
    // Missing org is a routing miss, not a validation failure.
    let Some(org) = q.org.as_deref() else {
        return Err(ApiError::not_found());
    };
    let org = require_org(org)?;

    let phases = state.control.lookup_phases(org).await.map_err(|err| match err {
        Error::OrgNotFound => ApiError::not_found(),
        other => other.into(),
    })?;

    let current = phases
        .into_iter()
        .find(|p| p.current)
        .ok_or_else(ApiError::not_found)?;
    Ok(Json(PhaseResponse {
        effective: current.effective,
        features: current.features,
        plans: current.plans,
        fragments: current.fragments,
    }))
}

#[derive(Debug, Deserialize)]
struct OrgQuery {
    #[serde(default)]
    org: String,
}

async fn limits(
    State(state): State<AppState>,
    Query(q): Query<OrgQuery>,
) -> Result<Json<UsageResponse>, ApiError> {
    let org = require_org(&q.org)?;
    let mut usage: Vec<UsageItem> = state
        .control
        .lookup_limits(org)
        .await?
        .into_iter()
        .map(|u| UsageItem { feature: u.feature.name(), used: u.used, limit: u.limit })
        .collect();
    usage.sort_by(|a, b| a.feature.cmp(&b.feature));
    Ok(Json(UsageResponse { org: org.to_owned(), usage }))
}

async fn report(
    State(state): State<AppState>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let org = require_org(&req.org)?;
    let report = Report {
        n: req.n,
        at: req.at.unwrap_or_else(Utc::now),
        clobber: req.clobber,
        idempotency_key: None,
    };
    state.control.report_usage(org, &req.feature, report).await?;
    Ok(Json(serde_json::json!({})))
}

#[derive(Debug, Deserialize)]
struct WhoIsQuery {
    #[serde(default)]
    org: String,
    include: Option<String>,
}

async fn whois(
    State(state): State<AppState>,
    Query(q): Query<WhoIsQuery>,
) -> Result<Json<WhoIsResponse>, ApiError> {
    let org = require_org(&q.org)?;
    if q.include.as_deref() == Some("info") {
        let (stripe_id, info) = state.control.lookup_org(org).await?;
        return Ok(Json(WhoIsResponse {
            org: org.to_owned(),
            stripe_id,
            info: Some(info),
        }));
    }
    let stripe_id = state.control.whois(org).await?;
    Ok(Json(WhoIsResponse { org: org.to_owned(), stripe_id, info: None }))
}

async fn whoami(State(state): State<AppState>) -> Result<Json<WhoAmIResponse>, ApiError> {
    let me = state.control.whoami().await?;
    Ok(Json(WhoAmIResponse {
        provider_id: me.provider_id,
        email: me.email,
        key_prefix: me.key_prefix,
        is_live: me.live,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_validation() {
        assert!(require_org("org:acme").is_ok());
        assert!(require_org("org:").is_err());
        assert!(require_org("acme").is_err());
        assert!(require_org("").is_err());

        let err = require_org("nope").unwrap_err();
        assert_eq!(err.message, r#"org must be prefixed with "org:""#);
    }
}
