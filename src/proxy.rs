// proxy.rs — the wildcard reverse proxy.
//
// Every request whose host is not an API host lands here. The first host
// label resolves through the routing ledger; live deployments are
// forwarded to their origin, everything else renders a status page. The
// proxy performs no per-request authorization and never mutates
// deployment state on upstream errors.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use std::time::Duration;
use tracing::{debug, warn};

use crate::deploy::state::DeploymentStatus;
use crate::routing::RoutingRecord;
use crate::subdomain;
use crate::AppContext;

/// Hop-by-hop headers (plus Host) never forwarded upstream.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Runtime-specific informational headers stripped from upstream
/// responses.
const STRIP_RESPONSE: [&str; 4] = ["server", "x-cloud-trace-context", "via", "alt-svc"];

pub async fn handle(ctx: AppContext, req: Request) -> Response {
    let host = request_host(req.headers()).unwrap_or_default();
    let label = host.split('.').next().unwrap_or("").to_string();

    // Reserved labels (and the bare apex) get the product site.
    if label.is_empty() || host == ctx.config.apex_domain || subdomain::is_reserved(&label) {
        return landing_page(&ctx.config.apex_domain);
    }

    let record = match lookup(&ctx, &label).await {
        Ok(Some(record)) => record,
        Ok(None) => return not_found_page(&label, &ctx.config.apex_domain),
        Err(e) => {
            warn!(%label, err = %e, "routing lookup failed");
            return unavailable_page(&label);
        }
    };

    match (record.status, record.origin.clone()) {
        (DeploymentStatus::Active, Some(origin)) => forward(&ctx, req, &record, &origin, &host).await,
        _ => status_page(&record, &ctx.config.apex_domain),
    }
}

fn request_host(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::HOST)?.to_str().ok()?;
    Some(raw.split(':').next().unwrap_or(raw).to_lowercase())
}

async fn lookup(ctx: &AppContext, label: &str) -> anyhow::Result<Option<RoutingRecord>> {
    let Some(deployment_id) = ctx.routing.lookup_subdomain(label).await? else {
        return Ok(None);
    };
    ctx.routing.get_record(&deployment_id).await
}

// ─── Forwarding ───────────────────────────────────────────────────────────────

async fn forward(
    ctx: &AppContext,
    req: Request,
    record: &RoutingRecord,
    origin: &str,
    host: &str,
) -> Response {
    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream_url = format!("{}{}", origin.trim_end_matches('/'), path_and_query);

    let mut headers = HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        // The session cookie never reaches the deployed service.
        if lower == "cookie" {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if let Ok(v) = HeaderValue::from_str(host) {
        headers.insert(HeaderName::from_static("x-forwarded-host"), v);
    }
    headers.insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static("https"),
    );
    if let Some(ip) = client_ip(&parts.headers, &ctx.config.trusted_ip_header) {
        if let Ok(v) = HeaderValue::from_str(&ip) {
            headers.insert(HeaderName::from_static("x-real-ip"), v);
        }
    }
    if let Ok(v) = HeaderValue::from_str(&record.deployment_id) {
        headers.insert(HeaderName::from_static("x-berth-deployment"), v);
    }

    let request = ctx
        .http
        .request(parts.method, &upstream_url)
        .timeout(Duration::from_secs(ctx.config.proxy_upstream_timeout_secs))
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()));

    let upstream = match request.send().await {
        Ok(resp) => resp,
        Err(e) => {
            debug!(deployment_id = %record.deployment_id, err = %e, "upstream connection failed");
            return upstream_error_page(&record.subdomain);
        }
    };

    let mut builder = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        if STRIP_RESPONSE.contains(&name.as_str().to_ascii_lowercase().as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    match builder.body(Body::from_stream(upstream.bytes_stream())) {
        Ok(resp) => resp,
        Err(e) => {
            warn!(err = %e, "failed to assemble proxied response");
            upstream_error_page(&record.subdomain)
        }
    }
}

/// First value of the ingress-provided client IP header.
pub fn client_ip(headers: &HeaderMap, trusted_header: &str) -> Option<String> {
    let raw = headers.get(trusted_header)?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

// ─── Pages ────────────────────────────────────────────────────────────────────

fn page_shell(title: &str, meta: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">{meta}\
         <title>{title}</title>\
         <style>body{{font-family:system-ui,sans-serif;display:flex;align-items:center;justify-content:center;min-height:100vh;margin:0;background:#0b1020;color:#e6e9f0}}\
         main{{max-width:28rem;padding:2rem;text-align:center}}h1{{font-size:1.4rem}}p{{color:#9aa3b5;line-height:1.5}}\
         code{{background:#1a2238;padding:.15rem .4rem;border-radius:4px}}</style></head>\
         <body><main>{body}</main></body></html>"
    )
}

pub fn landing_page(apex: &str) -> Response {
    let html = page_shell(
        "Berth",
        "",
        &format!(
            "<h1>Berth</h1><p>Ship an app, get <code>&lt;name&gt;.{apex}</code>. \
             Upload a zip, we do the rest.</p>"
        ),
    );
    (StatusCode::OK, Html(html)).into_response()
}

fn not_found_page(label: &str, apex: &str) -> Response {
    let html = page_shell(
        "Not found",
        "",
        &format!(
            "<h1>Nothing lives here</h1><p><code>{label}.{apex}</code> is not \
             deployed. The name may be free to claim.</p>"
        ),
    );
    (StatusCode::NOT_FOUND, Html(html)).into_response()
}

fn unavailable_page(label: &str) -> Response {
    let html = page_shell(
        "Temporarily unavailable",
        "",
        &format!("<h1>Temporarily unavailable</h1><p>Routing for <code>{label}</code> could not be resolved. Try again shortly.</p>"),
    );
    let mut resp = (StatusCode::SERVICE_UNAVAILABLE, Html(html)).into_response();
    resp.headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
    resp
}

/// Status page for a deployment that is not (yet) live.
fn status_page(record: &RoutingRecord, apex: &str) -> Response {
    let label = &record.subdomain;
    match record.status {
        DeploymentStatus::Pending
        | DeploymentStatus::Uploading
        | DeploymentStatus::Analyzing
        | DeploymentStatus::Building
        | DeploymentStatus::Deploying => {
            let html = page_shell(
                "Deploying…",
                "<meta http-equiv=\"refresh\" content=\"5\">",
                &format!(
                    "<h1>Your app is on its way</h1>\
                     <p><code>{label}.{apex}</code> is <strong>{}</strong>. \
                     This page refreshes automatically.</p>",
                    record.status
                ),
            );
            (StatusCode::ACCEPTED, Html(html)).into_response()
        }
        DeploymentStatus::Failed => {
            let error = record
                .error
                .as_deref()
                .unwrap_or("the build did not complete");
            let html = page_shell(
                "Deployment failed",
                "",
                &format!(
                    "<h1>Deployment failed</h1><p><code>{label}.{apex}</code> \
                     could not be deployed: {error}</p>"
                ),
            );
            (StatusCode::SERVICE_UNAVAILABLE, Html(html)).into_response()
        }
        DeploymentStatus::Expired => {
            let html = page_shell(
                "Deployment expired",
                "",
                &format!(
                    "<h1>This deployment expired</h1><p><code>{label}.{apex}</code> \
                     reached the end of its free-tier lifetime.</p>"
                ),
            );
            (StatusCode::SERVICE_UNAVAILABLE, Html(html)).into_response()
        }
        // Active with a missing origin renders as still-deploying.
        DeploymentStatus::Active => {
            let html = page_shell(
                "Starting…",
                "<meta http-equiv=\"refresh\" content=\"5\">",
                &format!(
                    "<h1>Almost there</h1><p><code>{label}.{apex}</code> is \
                     starting up. This page refreshes automatically.</p>"
                ),
            );
            (StatusCode::ACCEPTED, Html(html)).into_response()
        }
    }
}

fn upstream_error_page(label: &str) -> Response {
    let html = page_shell(
        "Upstream unavailable",
        "",
        &format!(
            "<h1>The app did not answer</h1><p><code>{label}</code> is deployed \
             but its service did not respond. Try again in a few seconds.</p>"
        ),
    );
    let mut resp = (StatusCode::SERVICE_UNAVAILABLE, Html(html)).into_response();
    resp.headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(status: DeploymentStatus) -> RoutingRecord {
        let mut r = RoutingRecord::new("dep1", "hello");
        r.status = status;
        r.created_at = Utc::now();
        r.updated_at = Utc::now();
        r
    }

    #[test]
    fn in_progress_states_render_202_with_refresh() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::Analyzing,
            DeploymentStatus::Building,
            DeploymentStatus::Deploying,
        ] {
            let resp = status_page(&record(status), "berth.sh");
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }
    }

    #[test]
    fn terminal_states_render_503_without_refresh() {
        for status in [DeploymentStatus::Failed, DeploymentStatus::Expired] {
            let resp = status_page(&record(status), "berth.sh");
            assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
    }

    #[test]
    fn upstream_error_carries_retry_after() {
        let resp = upstream_error_page("hello");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            resp.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from_static("5")
        );
    }

    #[test]
    fn client_ip_takes_first_forwarded_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        assert_eq!(
            client_ip(&headers, "x-forwarded-for").as_deref(),
            Some("203.0.113.9")
        );
        assert!(client_ip(&headers, "x-real-ip").is_none());
    }
}
