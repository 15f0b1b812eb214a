// http/handlers/deployments.rs — owner listing and deletion, plus the
// super-admin surface.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::{CurrentUser, SuperAdmin};
use crate::deploy::orchestrator;
use crate::error::{ApiError, ApiResult};
use crate::store::DeploymentRow;
use crate::AppContext;

fn row_json(row: &DeploymentRow) -> Value {
    json!({
        "deployment_id": row.id,
        "subdomain": row.subdomain,
        "status": row.status,
        "framework": row.framework,
        "origin": row.origin,
        "error": row.error,
        "praise": row.praise,
        "character_id": row.character_id,
        "created_at": row.created_at,
        "updated_at": row.updated_at,
        "expires_at": row.expires_at,
    })
}

pub async fn list(
    State(ctx): State<AppContext>,
    CurrentUser(auth): CurrentUser,
) -> ApiResult<Json<Value>> {
    let rows = ctx.storage.list_deployments_for_user(&auth.user.id).await?;
    let deployments: Vec<Value> = rows.iter().map(row_json).collect();
    Ok(Json(json!({ "deployments": deployments })))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    CurrentUser(auth): CurrentUser,
) -> ApiResult<Json<Value>> {
    let row = ctx
        .storage
        .get_deployment(&id)
        .await?
        .ok_or(ApiError::NotFound("deployment"))?;

    let is_owner = row.user_id.as_deref() == Some(auth.user.id.as_str());
    if !is_owner && !auth.user.is_super_admin() {
        return Err(ApiError::Forbidden);
    }

    let reason = if is_owner { "owner_delete" } else { "admin_delete" };
    orchestrator::deprovision(&ctx, &row, &auth.user.id, reason).await;
    Ok(Json(json!({ "success": true })))
}

pub async fn admin_list(
    State(ctx): State<AppContext>,
    SuperAdmin(_admin): SuperAdmin,
) -> ApiResult<Json<Value>> {
    let rows = ctx.storage.list_all_deployments().await?;
    let stats = ctx.storage.deployment_stats().await?;
    let deployments: Vec<Value> = rows
        .iter()
        .map(|row| {
            let mut v = row_json(row);
            v["user_id"] = json!(row.user_id);
            v
        })
        .collect();
    Ok(Json(json!({ "deployments": deployments, "stats": stats })))
}

pub async fn admin_delete(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    SuperAdmin(admin): SuperAdmin,
) -> ApiResult<Json<Value>> {
    let row = ctx
        .storage
        .get_deployment(&id)
        .await?
        .ok_or(ApiError::NotFound("deployment"))?;
    orchestrator::deprovision(&ctx, &row, &admin.user.id, "admin_delete").await;
    Ok(Json(json!({ "success": true })))
}
