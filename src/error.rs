// error.rs — API error taxonomy and its wire mapping.
//
// Every API failure surfaces as `{"error": {"code": ..., "message": ...}}`
// with the HTTP status of the taxonomy. Internal errors hide their detail
// in production; non-production environments surface it for debugging.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

static PRODUCTION: AtomicBool = AtomicBool::new(true);

/// Called once at startup; controls whether 5xx detail is surfaced.
pub fn set_production(production: bool) {
    PRODUCTION.store(production, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad JSON, missing field, malformed subdomain, oversized archive.
    #[error("{0}")]
    Validation(String),
    /// No session, or an expired/aged-out one.
    #[error("authentication required")]
    Unauthenticated,
    /// Wrong role or not the owner.
    #[error("forbidden")]
    Forbidden,
    /// Forbidden with a caller-facing explanation (e.g. release cooldown).
    #[error("{0}")]
    ForbiddenWithReason(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Subdomain taken, quota exceeded, wrong state.
    #[error("{0}")]
    Conflict(String),
    /// Too many requests; carries Retry-After seconds.
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: i64 },
    /// Archive or routing store probe failed.
    #[error("service unavailable")]
    Unavailable,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::ForbiddenWithReason(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden | Self::ForbiddenWithReason(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Internal(e) => {
                if PRODUCTION.load(Ordering::Relaxed) {
                    "internal error".to_string()
                } else {
                    format!("{e:#}")
                }
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref e) = self {
            tracing::error!(err = %format!("{e:#}"), "request failed");
        }
        let status = self.status();
        let body = Json(json!({
            "error": { "code": self.code(), "message": self.message() }
        }));
        let mut resp = (status, body).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            if let Ok(v) = retry_after_secs.max(1).to_string().parse() {
                resp.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        resp
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::NotFound("deployment").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict("subdomain taken".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited {
                retry_after_secs: 30
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::Unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn production_hides_internal_detail() {
        set_production(true);
        let e = ApiError::Internal(anyhow::anyhow!("secret connection string"));
        assert_eq!(e.message(), "internal error");
        set_production(false);
        let e = ApiError::Internal(anyhow::anyhow!("secret connection string"));
        assert!(e.message().contains("secret connection string"));
        set_production(true);
    }
}
