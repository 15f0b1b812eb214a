// http/handlers/webhooks.rs — asynchronous inputs: build-lifecycle events
// from the executor's push subscription, and tier events from the billing
// provider.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use crate::deploy::reconcile;
use crate::deploy::state::BuildEventStatus;
use crate::error::{ApiError, ApiResult};
use crate::AppContext;

type HmacSha256 = Hmac<Sha256>;

// ─── Build executor webhook ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BuildWebhookQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Consume a build-lifecycle push event. Always acks with 2xx once past
/// authentication; the state machine absorbs duplicates, stragglers, and
/// events for deployments that no longer exist.
pub async fn cloudbuild(
    State(ctx): State<AppContext>,
    Query(query): Query<BuildWebhookQuery>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    if let Some(expected) = &ctx.config.build_webhook_token {
        if query.token.as_deref() != Some(expected.as_str()) {
            return Err(ApiError::Forbidden);
        }
    }

    let Some(event) = reconcile::decode_envelope(&body) else {
        warn!("undecodable build webhook envelope; acking");
        return Ok(Json(json!({ "received": false })));
    };

    let Some(deployment_id) = event.deployment_id.clone() else {
        info!(build_id = %event.build_id, "build event resolves to no deployment; acking");
        return Ok(Json(json!({
            "received": true,
            "build_id": event.build_id,
            "status": event.status,
        })));
    };

    if let Some(status) = BuildEventStatus::parse(&event.status) {
        // Ack even when applying fails; the status poller converges on
        // ground truth without redelivery.
        if let Err(e) = reconcile::apply_event(&ctx, &deployment_id, status).await {
            warn!(deployment_id = %deployment_id, err = %format!("{e:#}"), "build event apply failed; acking");
        }
    }

    Ok(Json(json!({
        "received": true,
        "build_id": event.build_id,
        "status": event.status,
    })))
}

// ─── Billing webhook ──────────────────────────────────────────────────────────

/// Verify a `t={unix},v1={hex}` signature over `{t}.{body}`.
fn verify_billing_signature(
    signature_header: &str,
    body: &[u8],
    secret: &str,
    now: i64,
) -> Result<(), String> {
    let mut timestamp: Option<i64> = None;
    let mut provided: Option<Vec<u8>> = None;
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse().ok(),
            Some(("v1", v)) => provided = hex::decode(v).ok(),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or("missing signature timestamp")?;
    let provided = provided.ok_or("missing signature")?;

    if (now - timestamp).abs() > 300 {
        return Err("signature timestamp outside tolerance".into());
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid webhook secret".to_string())?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| "signature mismatch".to_string())
}

pub async fn billing(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let Some(secret) = &ctx.config.billing_webhook_secret else {
        return Err(ApiError::NotFound("billing webhook"));
    };
    let signature = headers
        .get("billing-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Forbidden)?;
    verify_billing_signature(signature, &body, secret, Utc::now().timestamp())
        .map_err(|_| ApiError::Forbidden)?;

    let event: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("malformed billing event".into()))?;
    let kind = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
    let object = event.pointer("/data/object").cloned().unwrap_or(Value::Null);

    match kind {
        "checkout.session.completed" => checkout_completed(&ctx, &object).await?,
        "customer.subscription.updated" => subscription_updated(&ctx, &object).await?,
        "customer.subscription.deleted" => subscription_deleted(&ctx, &object).await?,
        other => {
            info!(kind = other, "ignoring billing event kind");
        }
    }

    Ok(Json(json!({ "received": true })))
}

async fn checkout_completed(ctx: &AppContext, object: &Value) -> Result<(), ApiError> {
    let Some(user_id) = object
        .get("client_reference_id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    else {
        warn!("checkout event without client_reference_id; ignoring");
        return Ok(());
    };
    let customer = object.get("customer").and_then(|v| v.as_str());
    let subscription = object.get("subscription").and_then(|v| v.as_str());
    let mode = object.get("mode").and_then(|v| v.as_str()).unwrap_or("");

    ctx.storage
        .set_user_billing_refs(user_id, customer, subscription)
        .await?;

    match mode {
        "subscription" => {
            // Tier upgrade: pro removes the TTL from every non-failed
            // deployment the user owns.
            ctx.storage.set_user_tier(user_id, "pro", "active").await?;
            let cleared = ctx.storage.clear_user_deployment_ttls(user_id).await?;
            info!(user_id, cleared, "user upgraded to pro");
        }
        "payment" => {
            let packs = object
                .pointer("/metadata/packs")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(1)
                .max(1);
            ctx.storage.add_addon_packs(user_id, packs).await?;
            info!(user_id, packs, "add-on packs purchased");
        }
        other => info!(user_id, mode = other, "ignoring checkout mode"),
    }
    Ok(())
}

async fn subscription_updated(ctx: &AppContext, object: &Value) -> Result<(), ApiError> {
    let Some(user) = user_for_customer(ctx, object).await? else {
        return Ok(());
    };
    let status = object.get("status").and_then(|v| v.as_str()).unwrap_or("");
    let tier_status = match status {
        "active" | "trialing" => "active",
        "past_due" | "unpaid" => "past_due",
        "canceled" => "canceled",
        _ => return Ok(()),
    };
    ctx.storage
        .set_user_tier(&user.id, &user.tier, tier_status)
        .await?;
    if tier_status == "active" && user.tier == "pro" {
        // Reactivation restores the no-TTL policy.
        ctx.storage.clear_user_deployment_ttls(&user.id).await?;
    }
    info!(user_id = %user.id, tier_status, "subscription status updated");
    Ok(())
}

async fn subscription_deleted(ctx: &AppContext, object: &Value) -> Result<(), ApiError> {
    let Some(user) = user_for_customer(ctx, object).await? else {
        return Ok(());
    };
    ctx.storage
        .set_user_tier(&user.id, &user.tier, "canceled")
        .await?;
    info!(user_id = %user.id, "subscription canceled; effective tier is free");
    Ok(())
}

async fn user_for_customer(
    ctx: &AppContext,
    object: &Value,
) -> Result<Option<crate::store::UserRow>, ApiError> {
    let Some(customer) = object.get("customer").and_then(|v| v.as_str()) else {
        warn!("billing event without customer; ignoring");
        return Ok(None);
    };
    let user = ctx.storage.get_user_by_billing_customer(customer).await?;
    if user.is_none() {
        warn!(customer, "billing event for unknown customer; ignoring");
    }
    Ok(user)
}
