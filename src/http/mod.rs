// http/mod.rs — the control-plane ingress.
//
// One listener, dispatched on host: the apex, www, api (and loopback for
// dev) enter the API router; every other host enters the wildcard proxy.

pub mod handlers;
pub mod headers;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::header;
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::net::SocketAddr;
use tower::util::ServiceExt as _;
use tracing::info;

use crate::{proxy, AppContext};

/// Body ceiling: the archive bound plus slack for multipart overhead.
const MAX_BODY_BYTES: usize = 52 * 1024 * 1024;

pub async fn serve(ctx: AppContext) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], ctx.config.port).into();
    let router = build_router(ctx);
    info!(%addr, "control plane listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM; in-flight requests drain before exit.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

/// Top-level host dispatch wrapping the API router and the proxy.
pub fn build_router(ctx: AppContext) -> Router {
    let api = api_router(ctx.clone());

    Router::new().fallback_service(tower::service_fn(move |req: Request| {
        let api = api.clone();
        let ctx = ctx.clone();
        async move {
            let host = req
                .headers()
                .get(header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.split(':').next().unwrap_or(h).to_lowercase())
                .unwrap_or_default();
            if ctx.config.is_api_host(&host) {
                api.oneshot(req).await
            } else {
                Ok(proxy::handle(ctx, req).await)
            }
        }
    }))
}

fn api_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/", get(handlers::health::landing))
        .route("/api/v1/prepare", post(handlers::prepare::prepare))
        .route("/api/v1/upload/{deployment_id}", put(handlers::upload::upload))
        .route("/api/v1/deploy", post(handlers::deploy::deploy))
        .route("/api/v1/status/{deployment_id}", get(handlers::status::status))
        .route(
            "/api/v1/subdomain/check/{label}",
            get(handlers::subdomain::check),
        )
        .route(
            "/api/v1/subdomain/release/{label}",
            post(handlers::subdomain::release),
        )
        .route(
            "/api/v1/webhook/cloudbuild",
            post(handlers::webhooks::cloudbuild),
        )
        .route("/api/v1/webhook/billing", post(handlers::webhooks::billing))
        .route("/api/v1/deployments", get(handlers::deployments::list))
        .route(
            "/api/v1/deployments/{id}",
            delete(handlers::deployments::delete),
        )
        .route(
            "/api/v1/admin/deployments",
            get(handlers::deployments::admin_list),
        )
        .route(
            "/api/v1/admin/deployments/{id}",
            delete(handlers::deployments::admin_delete),
        )
        .route("/api/v1/health", get(handlers::health::health))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/callback", get(handlers::auth::callback))
        .route("/api/v1/auth/me", get(handlers::auth::me))
        .route("/api/v1/auth/logout", post(handlers::auth::logout))
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            handlers::session_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            headers::security_and_cors,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(ctx)
}
