// scheduler/mod.rs — the periodic quota/TTL reaper.
//
// A single-tenant loop: each cycle reaps deployments whose TTL has passed
// and clears expired sessions. Per-deployment errors are logged and never
// halt the batch.

use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use crate::deploy::orchestrator;
use crate::deploy::state::DeploymentStatus;
use crate::routing;
use crate::AppContext;

pub async fn run(ctx: AppContext) {
    let interval = Duration::from_secs(ctx.config.reaper_interval_secs);
    info!(interval_secs = interval.as_secs(), "reaper scheduler started");
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately: one startup sweep catches anything
    // that expired while the process was down.
    loop {
        ticker.tick().await;
        reap_cycle(&ctx).await;
        match ctx.sessions.cleanup_expired().await {
            Ok(n) if n > 0 => info!(count = n, "expired sessions removed"),
            Ok(_) => {}
            Err(e) => warn!(err = %e, "session cleanup failed"),
        }
    }
}

/// One reap pass: every deployment with `expires_at <= now` transitions to
/// `expired` and has its bundle deprovisioned.
pub async fn reap_cycle(ctx: &AppContext) {
    let expired = match ctx.storage.list_expired_deployments(Utc::now()).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(err = %e, "expired deployment scan failed");
            return;
        }
    };
    if expired.is_empty() {
        return;
    }
    info!(count = expired.len(), "reaping expired deployments");

    for row in expired {
        // Record the expiry transition first so any observer (proxy,
        // status poll) sees `expired` rather than a vanished record.
        let marked = routing::update_record(ctx.routing.as_ref(), &row.id, |current| {
            if current.status.is_terminal() {
                return None;
            }
            let mut next = current.clone();
            next.status = DeploymentStatus::Expired;
            Some(next)
        })
        .await;
        if let Err(e) = marked {
            warn!(deployment_id = %row.id, err = %e, "expiry transition failed");
        }

        orchestrator::deprovision(ctx, &row, "system", "ttl_expired").await;
    }
}
