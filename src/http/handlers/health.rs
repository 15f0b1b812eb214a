// http/handlers/health.rs — reachability plus dependency probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::time::Duration;

use crate::AppContext;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn landing(State(ctx): State<AppContext>) -> Response {
    crate::proxy::landing_page(&ctx.config.apex_domain)
}

async fn probe<F>(fut: F) -> bool
where
    F: std::future::Future<Output = anyhow::Result<()>>,
{
    matches!(tokio::time::timeout(PROBE_TIMEOUT, fut).await, Ok(Ok(())))
}

pub async fn health(State(ctx): State<AppContext>) -> (StatusCode, Json<Value>) {
    let (routing, archive, relational) = tokio::join!(
        probe(ctx.routing.probe()),
        probe(ctx.archives.probe()),
        probe(ctx.storage.probe()),
    );

    let healthy = routing && archive && relational;
    let body = json!({
        "status": if healthy { "ok" } else { "degraded" },
        "checks": {
            "routing": routing,
            "archive": archive,
            "relational": relational,
        },
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
    });
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}
