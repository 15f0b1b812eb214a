// http/handlers/status.rs — deployment status with convergent polling.
//
// The stored record answers most polls; when the deployment sits in
// `building` or `deploying` the reconciler additionally consults the
// executor / runtime for ground truth, so missed webhooks only ever delay
// liveness, never correctness.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use super::{caller_key, CurrentUser};
use crate::deploy::reconcile;
use crate::error::{ApiError, ApiResult};
use crate::ratelimit::{self, RateClass};
use crate::routing::RoutingRecord;
use crate::AppContext;

pub async fn status(
    State(ctx): State<AppContext>,
    Path(deployment_id): Path<String>,
    auth: Option<CurrentUser>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let caller = caller_key(auth.as_ref().map(|c| &c.0), &headers, &ctx);
    ratelimit::check(ctx.routing.as_ref(), RateClass::Status, &caller).await?;

    match ctx.routing.get_record(&deployment_id).await? {
        Some(record) => {
            let record = reconcile::converge(&ctx, record).await;
            Ok(Json(record_json(&record)))
        }
        None => {
            // The hot record can outlive or predate the metadata row in
            // either direction; fall back to the source of truth.
            let row = ctx
                .storage
                .get_deployment(&deployment_id)
                .await?
                .ok_or(ApiError::NotFound("deployment"))?;
            Ok(Json(json!({
                "deployment_id": row.id,
                "subdomain": row.subdomain,
                "status": row.status,
                "origin": row.origin,
                "error": row.error,
                "created_at": row.created_at,
                "updated_at": row.updated_at,
                "build_handle": row.build_id,
            })))
        }
    }
}

fn record_json(record: &RoutingRecord) -> Value {
    json!({
        "deployment_id": record.deployment_id,
        "subdomain": record.subdomain,
        "status": record.status,
        "origin": record.origin,
        "error": record.error,
        "created_at": record.created_at.to_rfc3339(),
        "updated_at": record.updated_at.to_rfc3339(),
        "build_handle": record.build_id,
    })
}
