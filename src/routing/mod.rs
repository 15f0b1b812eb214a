// routing/mod.rs — the routing ledger.
//
// Two mappings back every hot-path read: deployment-id → routing record and
// subdomain → deployment-id. The store must provide create-if-absent on the
// secondary key and a versioned compare-and-update on the primary key;
// state transitions are linearized through those primitives, never through
// in-process locks.

pub mod memory;
pub mod redis;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::Framework;
use crate::deploy::state::DeploymentStatus;

/// Routing records and the subdomain index live 30 days past their last
/// write; live deployments are refreshed on every transition.
pub const RECORD_TTL_SECS: i64 = 30 * 24 * 3600;
/// Release audit retention.
pub const AUDIT_TTL_SECS: i64 = 90 * 24 * 3600;

// ─── Records ──────────────────────────────────────────────────────────────────

/// The minimal shadow of a deployment the proxy needs on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRecord {
    pub deployment_id: String,
    pub subdomain: String,
    pub status: DeploymentStatus,
    /// Upstream origin URL; set exactly once, when the service goes live.
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub framework: Option<Framework>,
    #[serde(default)]
    pub build_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotone counter backing compare-and-update.
    #[serde(default)]
    pub version: u64,
}

impl RoutingRecord {
    pub fn new(deployment_id: &str, subdomain: &str) -> Self {
        let now = Utc::now();
        Self {
            deployment_id: deployment_id.to_string(),
            subdomain: subdomain.to_string(),
            status: DeploymentStatus::Pending,
            origin: None,
            error: None,
            framework: None,
            build_id: None,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }
}

/// Append-only release audit entry, keyed by (subdomain, timestamp).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseAudit {
    pub subdomain: String,
    /// Releasing user id, or "anonymous"/"system".
    pub released_by: String,
    pub prior_deployment_id: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// Rate counter state after an increment.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub count: i64,
    /// Unix seconds when the window resets.
    pub reset_at: i64,
}

// ─── Store trait ──────────────────────────────────────────────────────────────

#[async_trait]
pub trait RoutingStore: Send + Sync {
    async fn get_record(&self, deployment_id: &str) -> Result<Option<RoutingRecord>>;

    /// Unconditional write of a fresh record (the caller holds the
    /// subdomain claim, which serializes creation).
    async fn create_record(&self, record: &RoutingRecord) -> Result<()>;

    /// Write `record` iff the stored version equals `record.version - 1`.
    /// Returns false on contention.
    async fn compare_and_update(&self, record: &RoutingRecord) -> Result<bool>;

    async fn delete_record(&self, deployment_id: &str) -> Result<()>;

    /// Create-if-absent on the secondary key. Returns true when this caller
    /// won the claim.
    async fn claim_subdomain(&self, label: &str, deployment_id: &str) -> Result<bool>;

    async fn lookup_subdomain(&self, label: &str) -> Result<Option<String>>;

    async fn release_subdomain(&self, label: &str) -> Result<()>;

    async fn append_release_audit(&self, audit: &ReleaseAudit) -> Result<()>;

    /// Increment a rate counter, arming a TTL slightly past the window on
    /// first increment.
    async fn incr_rate_counter(&self, key: &str, window_secs: i64) -> Result<RateWindow>;

    /// Cheap reachability probe for /health.
    async fn probe(&self) -> Result<()>;
}

// ─── Read-modify-write helper ─────────────────────────────────────────────────

const CAS_ATTEMPTS: usize = 4;

/// Apply `f` to the current record under the store's version check,
/// retrying on contention. `f` returning `None` declines the update (the
/// transition was a no-op); the current record is returned unchanged.
/// Returns `Ok(None)` when the record does not exist.
pub async fn update_record<F>(
    store: &dyn RoutingStore,
    deployment_id: &str,
    mut f: F,
) -> Result<Option<RoutingRecord>>
where
    F: FnMut(&RoutingRecord) -> Option<RoutingRecord>,
{
    for _ in 0..CAS_ATTEMPTS {
        let Some(current) = store.get_record(deployment_id).await? else {
            return Ok(None);
        };
        let Some(mut next) = f(&current) else {
            return Ok(Some(current));
        };
        next.version = current.version + 1;
        next.updated_at = Utc::now();
        if store.compare_and_update(&next).await? {
            return Ok(Some(next));
        }
    }
    bail!("routing record contention for deployment {deployment_id}");
}
