// http/handlers/upload.rs — accept archive bytes against an upload
// capability token.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::caller_key;
use crate::classifier::MAX_COMPRESSED_BYTES;
use crate::error::{ApiError, ApiResult};
use crate::ratelimit::{self, RateClass};
use crate::{upload_token, AppContext};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub token: String,
}

pub async fn upload(
    State(ctx): State<AppContext>,
    Path(deployment_id): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    // The token is the auth here; rate limiting keys on the client IP.
    let caller = caller_key(None, &headers, &ctx);
    ratelimit::check(ctx.routing.as_ref(), RateClass::Upload, &caller).await?;

    upload_token::verify(&query.token, &deployment_id, &ctx.config.signing_secret)
        .map_err(|e| ApiError::Validation(format!("invalid upload token: {e}")))?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/zip")
        && !content_type.starts_with("application/octet-stream")
    {
        return Err(ApiError::Validation(
            "Content-Type must be application/zip".into(),
        ));
    }

    if body.is_empty() {
        return Err(ApiError::Validation("empty archive".into()));
    }
    if body.len() as u64 > MAX_COMPRESSED_BYTES {
        return Err(ApiError::Validation(format!(
            "archive exceeds {} MiB",
            MAX_COMPRESSED_BYTES / (1024 * 1024)
        )));
    }
    // Full central-directory validation happens at analysis; this gate
    // only rejects obvious non-zips early.
    if !body.starts_with(b"PK") {
        return Err(ApiError::Validation("payload is not a zip archive".into()));
    }

    ctx.archives
        .put_archive(&deployment_id, body.to_vec())
        .await?;

    Ok(Json(json!({
        "success": true,
        "deployment_id": deployment_id,
    })))
}
