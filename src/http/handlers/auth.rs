// http/handlers/auth.rs — federated login, session introspection, logout.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{caller_key, CurrentUser};
use crate::error::{ApiError, ApiResult};
use crate::oauth;
use crate::quota;
use crate::ratelimit::{self, RateClass};
use crate::AppContext;

pub async fn login(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let caller = caller_key(None, &headers, &ctx);
    ratelimit::check(ctx.routing.as_ref(), RateClass::Auth, &caller).await?;

    let state = oauth::mint_state(&ctx.config.signing_secret)?;
    let url = oauth::login_url(&ctx.config, &state);
    Ok(Redirect::to(&url).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn callback(
    State(ctx): State<AppContext>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let caller = caller_key(None, &headers, &ctx);
    ratelimit::check(ctx.routing.as_ref(), RateClass::Auth, &caller).await?;

    if let Some(err) = query.error {
        return Err(ApiError::Validation(format!("login was not completed: {err}")));
    }
    let code = query
        .code
        .ok_or_else(|| ApiError::Validation("missing authorization code".into()))?;
    let state = query
        .state
        .ok_or_else(|| ApiError::Validation("missing state".into()))?;
    oauth::verify_state(&state, &ctx.config.signing_secret)
        .map_err(|_| ApiError::Validation("invalid login state".into()))?;

    let identity = oauth::complete_login(&ctx.http, &ctx.config, &code).await?;

    let role = if ctx
        .config
        .super_admin_email
        .as_deref()
        .is_some_and(|admin| admin.eq_ignore_ascii_case(&identity.email))
    {
        "super_admin"
    } else {
        "user"
    };
    let user = ctx
        .storage
        .upsert_user_on_login(
            &identity.email,
            identity.name.as_deref(),
            identity.picture.as_deref(),
            role,
        )
        .await?;
    info!(user_id = %user.id, "federated login completed");

    let cookie = ctx.sessions.create(&user.id).await?;
    let mut resp = Redirect::to(&ctx.config.frontend_url).into_response();
    resp.headers_mut().append(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(|e| ApiError::Internal(e.into()))?,
    );
    Ok(resp)
}

pub async fn me(
    State(ctx): State<AppContext>,
    CurrentUser(auth): CurrentUser,
) -> ApiResult<Json<Value>> {
    let used = ctx
        .storage
        .count_deployments_for_user(&auth.user.id)
        .await?;
    let summary = quota::summarize(&auth.user, used, &ctx.config.quotas);
    Ok(Json(json!({
        "user": {
            "user_id": auth.user.id,
            "email": auth.user.email,
            "display_name": auth.user.display_name,
            "avatar_url": auth.user.avatar_url,
            "role": auth.user.role,
            "tier": auth.user.tier,
            "tier_status": auth.user.tier_status,
            "addon_packs": auth.user.addon_packs,
        },
        "quota": summary,
    })))
}

pub async fn logout(
    State(ctx): State<AppContext>,
    CurrentUser(auth): CurrentUser,
) -> ApiResult<Response> {
    let cookie = ctx.sessions.logout(&auth.session_id).await?;
    let mut resp = Json(json!({ "success": true })).into_response();
    resp.headers_mut().append(
        header::SET_COOKIE,
        HeaderValue::from_str(&cookie).map_err(|e| ApiError::Internal(e.into()))?,
    );
    Ok(resp)
}
