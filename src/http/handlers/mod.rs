// http/handlers/mod.rs — handler modules plus the shared auth plumbing.

pub mod auth;
pub mod deploy;
pub mod deployments;
pub mod health;
pub mod prepare;
pub mod status;
pub mod subdomain;
pub mod upload;
pub mod webhooks;

use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::error::ApiError;
use crate::proxy;
use crate::session::{self, AuthUser};
use crate::AppContext;

// ─── Session middleware ───────────────────────────────────────────────────────

/// Resolve the session cookie into an `AuthUser` request extension. When
/// rotation fires, the replacement cookie rides out on the same response.
pub async fn session_middleware(
    State(ctx): State<AppContext>,
    mut req: Request,
    next: Next,
) -> Response {
    let mut rotated_cookie: Option<String> = None;

    if let Some(session_id) = session::session_id_from_headers(req.headers()) {
        match ctx.sessions.authenticate(&session_id).await {
            Ok(Some((auth, cookie))) => {
                req.extensions_mut().insert(auth);
                rotated_cookie = cookie;
            }
            Ok(None) => {}
            Err(e) => warn!(err = %e, "session validation failed"),
        }
    }

    let mut resp = next.run(req).await;
    if let Some(cookie) = rotated_cookie {
        if let Ok(v) = HeaderValue::from_str(&cookie) {
            resp.headers_mut().append(header::SET_COOKIE, v);
        }
    }
    resp
}

// ─── Extractors ───────────────────────────────────────────────────────────────

/// Required user auth; rejects with 401 when no valid session is attached.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthUser);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or(ApiError::Unauthenticated)
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<AuthUser>().cloned().map(CurrentUser))
    }
}

/// Required super-admin auth.
pub struct SuperAdmin(pub AuthUser);

impl<S: Send + Sync> FromRequestParts<S> for SuperAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(ApiError::Unauthenticated)?;
        if !auth.user.is_super_admin() {
            return Err(ApiError::Forbidden);
        }
        Ok(SuperAdmin(auth))
    }
}

// ─── Rate-limit keying ────────────────────────────────────────────────────────

/// Authenticated user id when present, else the ingress-reported client IP.
pub fn caller_key(auth: Option<&AuthUser>, headers: &HeaderMap, ctx: &AppContext) -> String {
    match auth {
        Some(a) => a.user.id.clone(),
        None => proxy::client_ip(headers, &ctx.config.trusted_ip_header)
            .unwrap_or_else(|| "unknown".to_string()),
    }
}
