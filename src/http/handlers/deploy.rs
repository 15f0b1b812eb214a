// http/handlers/deploy.rs — begin orchestration for an uploaded archive.
//
// Synchronous part: quota, subdomain claim, record + row creation. The
// rest of the pipeline runs as a detached task; the response is a 202.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use rand::Rng as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::{caller_key, CurrentUser};
use crate::classifier::Framework;
use crate::deploy::orchestrator::{self, DeployRequest as PipelineRequest};
use crate::error::{ApiError, ApiResult};
use crate::gcp::secrets;
use crate::quota;
use crate::ratelimit::{self, RateClass};
use crate::routing::RoutingRecord;
use crate::subdomain;
use crate::AppContext;

/// Narrative character ids are assigned at create time; generation of the
/// praise text itself is out of core.
const CHARACTER_COUNT: i64 = 12;

#[derive(Debug, Deserialize)]
pub struct DeployBody {
    pub deployment_id: String,
    pub subdomain: String,
    pub api_key: String,
    #[serde(default)]
    pub framework: Option<String>,
}

pub async fn deploy(
    State(ctx): State<AppContext>,
    CurrentUser(auth): CurrentUser,
    headers: HeaderMap,
    Json(body): Json<DeployBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let caller = caller_key(Some(&auth), &headers, &ctx);
    ratelimit::check(ctx.routing.as_ref(), RateClass::Deploy, &caller).await?;

    // ── Validation ───────────────────────────────────────────────────────
    let deployment_id = body.deployment_id.trim().to_string();
    if deployment_id.is_empty()
        || deployment_id.len() > 64
        || !deployment_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return Err(ApiError::Validation("malformed deployment_id".into()));
    }

    secrets::validate_user_key(&body.api_key).map_err(ApiError::Validation)?;

    let framework_hint = match &body.framework {
        None => None,
        Some(raw) => Some(
            raw.parse::<Framework>()
                .map_err(ApiError::Validation)?,
        ),
    };

    let label = subdomain::normalize(&body.subdomain)
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    // ── Guards ───────────────────────────────────────────────────────────
    if ctx.storage.get_deployment(&deployment_id).await?.is_some() {
        return Err(ApiError::Conflict(
            "this deployment has already been submitted".into(),
        ));
    }

    let used = ctx.storage.count_deployments_for_user(&auth.user.id).await?;
    let max = quota::max_deployments(&auth.user, &ctx.config.quotas);
    if used >= max as i64 {
        return Err(ApiError::Conflict(format!(
            "deployment quota reached ({used} of {max}); delete one or upgrade"
        )));
    }

    if !ctx.archives.archive_exists(&deployment_id).await? {
        return Err(ApiError::Validation(
            "no archive uploaded for this deployment".into(),
        ));
    }

    // ── Subdomain claim ──────────────────────────────────────────────────
    // Primary record first, then the secondary index: a claim whose
    // primary already exists can never be mistaken for a dangling entry
    // and healed away mid-create.
    let record = RoutingRecord::new(&deployment_id, &label);
    ctx.routing.create_record(&record).await?;

    if let Err(rejection) = subdomain::claim(ctx.routing.as_ref(), &label, &deployment_id).await? {
        let _ = ctx.routing.delete_record(&deployment_id).await;
        return Err(ApiError::Conflict(rejection.message(&label)));
    }

    let expires_at = quota::ttl_for(Some(&auth.user), &ctx.config.quotas, Utc::now());
    let character_id = rand::thread_rng().gen_range(1..=CHARACTER_COUNT);
    let row = ctx
        .storage
        .insert_deployment(
            &deployment_id,
            Some(&auth.user.id),
            &label,
            Some(character_id),
            expires_at,
        )
        .await;
    if let Err(e) = row {
        warn!(%deployment_id, err = %e, "deployment row insert failed; compensating");
        let _ = ctx.routing.release_subdomain(&label).await;
        let _ = ctx.routing.delete_record(&deployment_id).await;
        return Err(ApiError::Internal(e));
    }

    // ── Fire the pipeline ────────────────────────────────────────────────
    let pipeline = PipelineRequest {
        deployment_id: deployment_id.clone(),
        subdomain: label.clone(),
        api_key: body.api_key,
        framework_hint,
    };
    tokio::spawn(orchestrator::run_pipeline(ctx.clone(), pipeline));

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "deployment_id": deployment_id,
            "subdomain": label,
            "status": "pending",
            "message": format!("deployment accepted; your app will appear at https://{label}.{}", ctx.config.apex_domain),
        })),
    ))
}
