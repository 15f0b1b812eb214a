// http/handlers/subdomain.rs — availability checks and releases.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use super::{caller_key, CurrentUser};
use crate::deploy::orchestrator;
use crate::error::{ApiError, ApiResult};
use crate::ratelimit::{self, RateClass};
use crate::store::DeploymentRow;
use crate::subdomain::{self, Availability, ReleaseDecision};
use crate::AppContext;

pub async fn check(
    State(ctx): State<AppContext>,
    Path(raw_label): Path<String>,
    auth: Option<CurrentUser>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let caller = caller_key(auth.as_ref().map(|c| &c.0), &headers, &ctx);
    ratelimit::check(ctx.routing.as_ref(), RateClass::Subdomain, &caller).await?;

    let label = subdomain::normalize(&raw_label)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let body = match subdomain::classify(ctx.routing.as_ref(), &label).await? {
        Availability::Available => json!({
            "label": label,
            "available": true,
            "message": format!("{label} is available"),
        }),
        Availability::Reserved => json!({
            "label": label,
            "available": false,
            "reason": "reserved",
            "can_release": false,
            "message": format!("{label} is reserved"),
        }),
        Availability::InUse { .. } => json!({
            "label": label,
            "available": false,
            "reason": "in_use",
            "can_release": false,
            "message": format!("{label} is in use"),
        }),
        Availability::StaleFailed { .. } => json!({
            "label": label,
            "available": false,
            "reason": "stale_failed",
            "can_release": true,
            "message": format!("{label} is held by a stale deployment and can be released"),
        }),
    };
    Ok(Json(body))
}

pub async fn release(
    State(ctx): State<AppContext>,
    Path(raw_label): Path<String>,
    CurrentUser(auth): CurrentUser,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let caller = caller_key(Some(&auth), &headers, &ctx);
    ratelimit::check(ctx.routing.as_ref(), RateClass::Subdomain, &caller).await?;

    let label = subdomain::normalize(&raw_label)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if subdomain::is_reserved(&label) {
        return Err(ApiError::Validation("reserved subdomains cannot be released".into()));
    }

    let deployment_id = ctx
        .routing
        .lookup_subdomain(&label)
        .await?
        .ok_or(ApiError::NotFound("deployment"))?;

    let row = ctx.storage.get_deployment(&deployment_id).await?;
    let record = ctx.routing.get_record(&deployment_id).await?;

    // Ownership comes from the metadata row; status/timestamps prefer the
    // hot record, falling back to the row for reaped-but-indexed holders.
    let owner = row.as_ref().and_then(|r| r.user_id.clone());
    let (status, created_at, updated_at) = match (&record, &row) {
        (Some(rec), _) => (rec.status, rec.created_at, rec.updated_at),
        (None, Some(r)) => {
            let status = r
                .status
                .parse()
                .map_err(|e: String| ApiError::Internal(anyhow::anyhow!(e)))?;
            let parse = |s: &str| {
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now())
            };
            (status, parse(&r.created_at), parse(&r.updated_at))
        }
        (None, None) => {
            // Dangling secondary with no state anywhere: heal it here.
            ctx.routing.release_subdomain(&label).await?;
            return Ok(Json(json!({
                "success": true,
                "label": label,
                "message": format!("{label} released"),
            })));
        }
    };

    match subdomain::authorize_release(&auth.user.id, owner.as_deref(), status, created_at, updated_at, Utc::now()) {
        ReleaseDecision::Deny(reason) => Err(ApiError::ForbiddenWithReason(reason)),
        ReleaseDecision::Allow => {
            let row = row.unwrap_or_else(|| placeholder_row(&deployment_id, &label));
            let reason = if owner.as_deref() == Some(auth.user.id.as_str()) {
                "owner_release"
            } else {
                "third_party_release"
            };
            orchestrator::deprovision(&ctx, &row, &auth.user.id, reason).await;
            Ok(Json(json!({
                "success": true,
                "label": label,
                "message": format!("{label} released"),
            })))
        }
    }
}

/// Minimal row for deprovisioning holders whose metadata row is already
/// gone.
fn placeholder_row(deployment_id: &str, label: &str) -> DeploymentRow {
    let now = Utc::now().to_rfc3339();
    DeploymentRow {
        id: deployment_id.to_string(),
        user_id: None,
        subdomain: label.to_string(),
        framework: None,
        language: None,
        status: "failed".into(),
        origin: None,
        build_id: None,
        error: None,
        praise: None,
        character_id: None,
        created_at: now.clone(),
        updated_at: now,
        expires_at: None,
    }
}
