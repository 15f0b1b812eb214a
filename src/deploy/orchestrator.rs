// deploy/orchestrator.rs — drives a deployment from ingestion to the
// build executor, and owns the provision/deprovision bundle.
//
// The HTTP handler claims the subdomain and inserts the records, then
// fires `run_pipeline` as a detached task: every remaining step is an
// externally-observable transition, so a crash mid-pipeline is recovered
// by staleness classification rather than local state.

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::classifier::{self, Framework};
use crate::deploy::state::DeploymentStatus;
use crate::recipe;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::routing::{self, ReleaseAudit, RoutingRecord};
use crate::store::DeploymentRow;
use crate::AppContext;

pub struct DeployRequest {
    pub deployment_id: String,
    pub subdomain: String,
    /// Moves through the pipeline into the vault; never persisted or
    /// logged on the control plane.
    pub api_key: String,
    pub framework_hint: Option<Framework>,
}

/// Advance the routing record to `status`, mutating extra fields via
/// `extra`, and mirror the result into the relational row. Retrograde
/// transitions are declined by the state machine.
pub async fn advance(
    ctx: &AppContext,
    deployment_id: &str,
    status: DeploymentStatus,
    extra: impl Fn(&mut RoutingRecord),
) -> Result<Option<RoutingRecord>> {
    let updated = routing::update_record(ctx.routing.as_ref(), deployment_id, |current| {
        if !current.status.can_advance_to(status) {
            return None;
        }
        let mut next = current.clone();
        next.status = status;
        extra(&mut next);
        Some(next)
    })
    .await?;

    if let Some(record) = &updated {
        mirror_record(ctx, record).await;
    }
    Ok(updated)
}

/// Best-effort copy of routing-record progress into the metadata row.
pub async fn mirror_record(ctx: &AppContext, record: &RoutingRecord) {
    let result = ctx
        .storage
        .update_deployment(
            &record.deployment_id,
            record.status.as_str(),
            record.origin.as_deref(),
            record.build_id.as_deref(),
            record.framework.map(|f| f.as_str()),
            record.framework.map(|f| f.language()),
            record.error.as_deref(),
        )
        .await;
    if let Err(e) = result {
        warn!(deployment_id = %record.deployment_id, err = %e, "metadata mirror failed");
    }
}

/// Terminate a deployment. The vault secret is destroyed (compensating
/// action); the archive is preserved for forensics until deletion.
pub async fn fail_deployment(ctx: &AppContext, deployment_id: &str, message: &str) {
    info!(deployment_id, message, "deployment failed");
    let updated = routing::update_record(ctx.routing.as_ref(), deployment_id, |current| {
        if current.status.is_terminal() {
            return None;
        }
        let mut next = current.clone();
        next.status = DeploymentStatus::Failed;
        next.error = Some(message.to_string());
        Some(next)
    })
    .await;
    match updated {
        Ok(Some(record)) => mirror_record(ctx, &record).await,
        Ok(None) => {}
        Err(e) => warn!(deployment_id, err = %e, "failed to record failure"),
    }
    if let Err(e) = ctx.vault.destroy(deployment_id).await {
        warn!(deployment_id, err = %e, "compensating secret destroy failed");
    }
}

/// The post-claim pipeline: archive handoff → analysis → secret store →
/// build submission. Spawned by the deploy handler; failures terminate the
/// deployment with a recorded reason.
pub async fn run_pipeline(ctx: AppContext, req: DeployRequest) {
    let id = req.deployment_id.clone();
    if let Err(e) = pipeline_inner(&ctx, req).await {
        fail_deployment(&ctx, &id, &format!("{e:#}")).await;
    }
}

async fn pipeline_inner(ctx: &AppContext, req: DeployRequest) -> Result<()> {
    let id = &req.deployment_id;

    // Archive handoff into the build executor's source bucket.
    advance(ctx, id, DeploymentStatus::Uploading, |_| {}).await?;
    retry_with_backoff(&RetryConfig::default(), || {
        ctx.archives.mirror_to_build_source(id)
    })
    .await
    .map_err(|e| anyhow!("archive handoff failed: {e:#}"))?;

    // Analysis over the central directory.
    advance(ctx, id, DeploymentStatus::Analyzing, |_| {}).await?;
    let bytes = ctx.archives.fetch_archive(id).await?;
    let analysis = classifier::classify(&bytes, req.framework_hint)
        .map_err(|e| anyhow!("archive analysis failed: {e:#}"))?;
    if analysis.framework == Framework::Unknown {
        return Err(anyhow!("could not determine a supported framework"));
    }
    info!(
        deployment_id = %id,
        framework = %analysis.framework,
        has_manifest = analysis.has_dependency_manifest,
        files = analysis.file_list.len(),
        "archive classified"
    );

    // Secret handoff: the key moves client → vault → runtime binding and
    // exists nowhere else.
    let secret_ref = ctx.vault.store(id, &req.api_key).await?;

    let recipe = recipe::for_framework(analysis.framework, analysis.has_dependency_manifest);
    let build_id = match ctx
        .builds
        .submit(id, &req.subdomain, &secret_ref.binding(), &recipe)
        .await
    {
        Ok(handle) => handle,
        Err(e) => {
            // Build submit failed after the vault store: compensate now
            // rather than waiting for fail_deployment's destroy.
            if let Err(de) = ctx.vault.destroy(id).await {
                warn!(deployment_id = %id, err = %de, "secret cleanup after submit failure failed");
            }
            return Err(anyhow!("build submission failed: {e:#}"));
        }
    };

    // A fast first webhook event may already have advanced the record to
    // `building`; the framework and build handle are recorded either way.
    let updated = routing::update_record(ctx.routing.as_ref(), id, |current| {
        if current.status.is_terminal() {
            return None;
        }
        let mut next = current.clone();
        if current.status.can_advance_to(DeploymentStatus::Building) {
            next.status = DeploymentStatus::Building;
        }
        next.framework = Some(analysis.framework);
        next.build_id = Some(build_id.clone());
        Some(next)
    })
    .await?;
    if let Some(record) = &updated {
        mirror_record(ctx, record).await;
    }
    info!(deployment_id = %id, %build_id, "build submitted");
    Ok(())
}

// ─── Deprovision bundle ───────────────────────────────────────────────────────

/// Tear down everything a deployment owns: runtime service, archive,
/// vault secret, routing entries, relational row. Best-effort; per-step
/// failures are logged and never halt the batch. Always appends a release
/// audit record.
pub async fn deprovision(ctx: &AppContext, row: &DeploymentRow, released_by: &str, reason: &str) {
    let id = &row.id;

    if let Err(e) = ctx.runtime.delete_service(&row.subdomain).await {
        warn!(deployment_id = %id, err = %e, "runtime service delete failed");
    }
    if let Err(e) = ctx.archives.delete_archive(id).await {
        warn!(deployment_id = %id, err = %e, "archive delete failed");
    }
    if let Err(e) = ctx.vault.destroy(id).await {
        warn!(deployment_id = %id, err = %e, "vault secret delete failed");
    }

    // Release the subdomain only while it still points at this deployment;
    // a racing re-claim must not be clobbered.
    match ctx.routing.lookup_subdomain(&row.subdomain).await {
        Ok(Some(holder)) if holder == *id => {
            if let Err(e) = ctx.routing.release_subdomain(&row.subdomain).await {
                warn!(deployment_id = %id, err = %e, "subdomain release failed");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(deployment_id = %id, err = %e, "subdomain lookup failed"),
    }
    if let Err(e) = ctx.routing.delete_record(id).await {
        warn!(deployment_id = %id, err = %e, "routing record delete failed");
    }
    if let Err(e) = ctx.storage.delete_deployment(id).await {
        warn!(deployment_id = %id, err = %e, "deployment row delete failed");
    }

    let audit = ReleaseAudit {
        subdomain: row.subdomain.clone(),
        released_by: released_by.to_string(),
        prior_deployment_id: id.clone(),
        reason: reason.to_string(),
        at: chrono::Utc::now(),
    };
    if let Err(e) = ctx.routing.append_release_audit(&audit).await {
        warn!(deployment_id = %id, err = %e, "release audit append failed");
    }

    info!(deployment_id = %id, subdomain = %row.subdomain, reason, "deployment deprovisioned");
}
