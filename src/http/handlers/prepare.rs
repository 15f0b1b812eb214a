// http/handlers/prepare.rs — issue an upload capability.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{caller_key, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::ratelimit::{self, RateClass};
use crate::{ids, upload_token, AppContext};

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    #[serde(default)]
    pub filename: Option<String>,
}

pub async fn prepare(
    State(ctx): State<AppContext>,
    CurrentUser(auth): CurrentUser,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let caller = caller_key(Some(&auth), &headers, &ctx);
    ratelimit::check(ctx.routing.as_ref(), RateClass::Prepare, &caller).await?;

    // The body is optional; an empty one takes every default.
    let request: PrepareRequest = if body.is_empty() {
        PrepareRequest { filename: None }
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::Validation(format!("malformed request body: {e}")))?
    };

    let deployment_id = ids::deployment_id();
    let filename = request
        .filename
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "source.zip".to_string());

    let ttl = ctx.config.upload_url_ttl_secs;
    let token = upload_token::mint(&deployment_id, &filename, ttl, &ctx.config.signing_secret)?;
    let upload_url = format!(
        "{}/api/v1/upload/{}?token={}",
        ctx.config.api_base_url, deployment_id, token
    );
    let expires_at = Utc::now() + Duration::seconds(ttl);

    Ok(Json(json!({
        "deployment_id": deployment_id,
        "upload_url": upload_url,
        "expires_at": expires_at.to_rfc3339(),
    })))
}
