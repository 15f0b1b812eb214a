// ratelimit.rs — class-based rate limiting backed by the routing store.
//
// Counters live at rl:{class}:{caller} with a TTL slightly past the
// window, so limits hold across every control-plane replica. The caller
// key is the authenticated user id when present, else the client IP from
// the ingress's trusted forwarded header. The minimum of the class limit
// and the global limit applies.

use anyhow::Result;
use serde::Serialize;

use crate::error::ApiError;
use crate::routing::RoutingStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateClass {
    Prepare,
    Deploy,
    Upload,
    Status,
    Subdomain,
    Auth,
    Global,
}

impl RateClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Deploy => "deploy",
            Self::Upload => "upload",
            Self::Status => "status",
            Self::Subdomain => "subdomain",
            Self::Auth => "auth",
            Self::Global => "global",
        }
    }

    /// (max requests, window seconds)
    pub fn limits(&self) -> (i64, i64) {
        match self {
            Self::Prepare => (10, 60),
            Self::Deploy => (5, 60),
            Self::Upload => (3, 60),
            Self::Status => (30, 60),
            Self::Subdomain => (20, 60),
            Self::Auth => (10, 300),
            Self::Global => (100, 60),
        }
    }
}

/// Count this request against `class` and the global class for `caller`.
/// Exceeding either limit rejects with 429 and a Retry-After.
pub async fn check(
    routing: &dyn RoutingStore,
    class: RateClass,
    caller: &str,
) -> Result<(), ApiError> {
    enforce(routing, class, caller).await?;
    if class != RateClass::Global {
        enforce(routing, RateClass::Global, caller).await?;
    }
    Ok(())
}

async fn enforce(
    routing: &dyn RoutingStore,
    class: RateClass,
    caller: &str,
) -> Result<(), ApiError> {
    let (max, window) = class.limits();
    let key = format!("rl:{}:{}", class.as_str(), caller);
    let state = routing
        .incr_rate_counter(&key, window)
        .await
        .map_err(ApiError::Internal)?;
    if state.count > max {
        let retry_after_secs = (state.reset_at - chrono::Utc::now().timestamp()).max(1);
        return Err(ApiError::RateLimited { retry_after_secs });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::memory::MemoryRoutingStore;

    #[tokio::test]
    async fn class_limit_rejects_after_max() {
        let store = MemoryRoutingStore::new();
        for _ in 0..5 {
            check(&store, RateClass::Deploy, "u1").await.unwrap();
        }
        let err = check(&store, RateClass::Deploy, "u1").await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn callers_are_isolated() {
        let store = MemoryRoutingStore::new();
        for _ in 0..5 {
            check(&store, RateClass::Deploy, "u1").await.unwrap();
        }
        check(&store, RateClass::Deploy, "u2").await.unwrap();
    }

    #[tokio::test]
    async fn global_limit_caps_across_classes() {
        let store = MemoryRoutingStore::new();
        // 100 status checks exhaust the global window even though the
        // status class itself would still admit more at higher limits.
        for _ in 0..30 {
            check(&store, RateClass::Status, "u1").await.unwrap();
        }
        for _ in 0..20 {
            check(&store, RateClass::Subdomain, "u1").await.unwrap();
        }
        for _ in 0..10 {
            check(&store, RateClass::Prepare, "u1").await.unwrap();
        }
        // 60 global so far; drive it past 100 with auth (10 per 300 s)…
        for _ in 0..10 {
            check(&store, RateClass::Auth, "u1").await.unwrap();
        }
        // …and direct global hits for the remainder.
        for _ in 0..30 {
            check(&store, RateClass::Global, "u1").await.unwrap();
        }
        let err = check(&store, RateClass::Global, "u1").await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { .. }));
    }
}
