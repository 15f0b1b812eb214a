// deploy/reconcile.rs — webhook reconciliation (C8) and convergent
// status polling (C9).
//
// Both paths funnel through `state::apply_build_event`, so webhook
// delivery is a liveness optimization: anything a lost event would have
// told us is re-derived from ground truth on the next status poll.

use anyhow::Result;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::deploy::orchestrator::{self, fail_deployment};
use crate::deploy::state::{apply_build_event, Advance, BuildEventStatus, DeploymentStatus};
use crate::routing::RoutingRecord;
use crate::AppContext;

// ─── Webhook envelope ─────────────────────────────────────────────────────────

/// A build-lifecycle event decoded from the push subscription envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEvent {
    pub build_id: String,
    pub status: String,
    pub deployment_id: Option<String>,
}

/// Decode the push envelope: `{"message": {"data": base64(JSON)}}`.
///
/// The deployment id is resolved from (a) the substitution the
/// orchestrator embedded, falling back to (b) the first component of the
/// mirrored source path. Returns None for undecodable envelopes — the
/// webhook acks those and moves on.
pub fn decode_envelope(body: &Value) -> Option<BuildEvent> {
    let data = body.pointer("/message/data")?.as_str()?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(data)
        .ok()?;
    let build: Value = serde_json::from_slice(&decoded).ok()?;

    let build_id = build.get("id")?.as_str()?.to_string();
    let status = build.get("status")?.as_str()?.to_string();

    let deployment_id = build
        .pointer("/substitutions/_DEPLOYMENT_ID")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            build
                .pointer("/source/storageSource/object")
                .and_then(|v| v.as_str())
                .and_then(|object| object.split('/').next())
                .filter(|first| !first.is_empty())
                .map(str::to_string)
        });

    Some(BuildEvent {
        build_id,
        status,
        deployment_id,
    })
}

/// Apply a build event to a deployment. Idempotent: duplicates, retrograde
/// events, and events for unknown or terminal deployments are absorbed.
pub async fn apply_event(ctx: &AppContext, deployment_id: &str, event: BuildEventStatus) -> Result<()> {
    let Some(record) = ctx.routing.get_record(deployment_id).await? else {
        debug!(deployment_id, "event for unknown deployment; discarding");
        return Ok(());
    };

    match apply_build_event(record.status, event) {
        Advance::To(status) => {
            let updated = orchestrator::advance(ctx, deployment_id, status, |_| {}).await?;
            if updated.is_some() {
                info!(deployment_id, status = %status, "build event advanced deployment");
            }
        }
        Advance::Fail(message) => {
            fail_deployment(ctx, deployment_id, &message).await;
        }
        Advance::Noop => {
            debug!(deployment_id, event = event.as_str(), "duplicate build event; no-op");
        }
        Advance::Discard => {
            info!(
                deployment_id,
                event = event.as_str(),
                "event for terminal deployment; discarding"
            );
        }
    }
    Ok(())
}

// ─── Convergent polling ───────────────────────────────────────────────────────

/// On-demand convergence toward ground truth, run from the status
/// endpoint. Returns the freshest record.
pub async fn converge(ctx: &AppContext, record: RoutingRecord) -> RoutingRecord {
    match record.status {
        DeploymentStatus::Building => converge_building(ctx, record).await,
        DeploymentStatus::Deploying => converge_deploying(ctx, record).await,
        _ => record,
    }
}

async fn converge_building(ctx: &AppContext, record: RoutingRecord) -> RoutingRecord {
    let Some(build_id) = record.build_id.clone() else {
        return record;
    };
    match ctx.builds.get_status(&build_id).await {
        Ok(Some(event)) => {
            if let Err(e) = apply_event(ctx, &record.deployment_id, event).await {
                warn!(deployment_id = %record.deployment_id, err = %e, "status convergence failed");
                return record;
            }
            refreshed(ctx, record).await
        }
        Ok(None) => record,
        Err(e) => {
            warn!(deployment_id = %record.deployment_id, err = %e, "build status poll failed");
            record
        }
    }
}

async fn converge_deploying(ctx: &AppContext, record: RoutingRecord) -> RoutingRecord {
    match ctx.runtime.service_origin(&record.subdomain).await {
        Ok(Some(origin)) => {
            if !origin_is_well_formed(&origin) {
                warn!(deployment_id = %record.deployment_id, %origin, "runtime reported malformed origin");
                return record;
            }
            let advanced = orchestrator::advance(
                ctx,
                &record.deployment_id,
                DeploymentStatus::Active,
                |next| next.origin = Some(origin.clone()),
            )
            .await;
            match advanced {
                Ok(Some(updated)) => {
                    info!(deployment_id = %updated.deployment_id, "origin published; deployment active");
                    updated
                }
                Ok(None) => record,
                Err(e) => {
                    warn!(deployment_id = %record.deployment_id, err = %e, "origin publish failed");
                    record
                }
            }
        }
        Ok(None) => record,
        Err(e) => {
            warn!(deployment_id = %record.deployment_id, err = %e, "runtime origin poll failed");
            record
        }
    }
}

fn origin_is_well_formed(origin: &str) -> bool {
    url::Url::parse(origin)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

async fn refreshed(ctx: &AppContext, fallback: RoutingRecord) -> RoutingRecord {
    match ctx.routing.get_record(&fallback.deployment_id).await {
        Ok(Some(latest)) => latest,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(build: Value) -> Value {
        let data = base64::engine::general_purpose::STANDARD
            .encode(serde_json::to_vec(&build).unwrap());
        json!({ "message": { "data": data, "messageId": "1" }, "subscription": "s" })
    }

    #[test]
    fn decodes_substitution_deployment_id() {
        let body = envelope(json!({
            "id": "build-1",
            "status": "SUCCESS",
            "substitutions": { "_DEPLOYMENT_ID": "dep123", "_SUBDOMAIN": "hello" }
        }));
        let event = decode_envelope(&body).unwrap();
        assert_eq!(event.build_id, "build-1");
        assert_eq!(event.status, "SUCCESS");
        assert_eq!(event.deployment_id.as_deref(), Some("dep123"));
    }

    #[test]
    fn falls_back_to_source_path_prefix() {
        let body = envelope(json!({
            "id": "build-2",
            "status": "WORKING",
            "source": { "storageSource": { "bucket": "b", "object": "dep456/source.zip" } }
        }));
        let event = decode_envelope(&body).unwrap();
        assert_eq!(event.deployment_id.as_deref(), Some("dep456"));
    }

    #[test]
    fn unresolvable_deployment_is_none_not_error() {
        let body = envelope(json!({ "id": "build-3", "status": "SUCCESS" }));
        let event = decode_envelope(&body).unwrap();
        assert!(event.deployment_id.is_none());
    }

    #[test]
    fn garbage_envelopes_decode_to_none() {
        assert!(decode_envelope(&json!({})).is_none());
        assert!(decode_envelope(&json!({ "message": { "data": "!!!not-base64!!!" } })).is_none());
        let body = json!({ "message": { "data": base64::engine::general_purpose::STANDARD.encode(b"not json") } });
        assert!(decode_envelope(&body).is_none());
    }

    #[test]
    fn origin_validation() {
        assert!(origin_is_well_formed("https://hello-abc-uc.a.run.app"));
        assert!(!origin_is_well_formed("not a url"));
        assert!(!origin_is_well_formed("ftp://host/path"));
    }
}
