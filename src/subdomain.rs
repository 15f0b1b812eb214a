// subdomain.rs — the subdomain ledger.
//
// Claim protocol: normalize → reserved check → secondary-key lookup →
// classify the current holder (healing dangling secondaries) → atomic
// SET-NX claim, retrying the whole classification on contention.
//
// Release protocol: owner release is always permitted unless the
// deployment is actively transitioning; third-party release requires the
// holder to be classifiably stale plus a cooldown. Every release writes an
// audit record.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::deploy::state::DeploymentStatus;
use crate::routing::{RoutingRecord, RoutingStore};

const MIN_LABEL_LEN: usize = 3;
const MAX_LABEL_LEN: usize = 63;
/// A deployment stuck in `pending` longer than this is releasable.
const PENDING_STALE_MINUTES: i64 = 30;
/// A deployment transitioning without progress longer than this is releasable.
const TRANSITION_STALE_MINUTES: i64 = 60;
/// Cooldown before a non-owner may release a stale deployment.
const THIRD_PARTY_COOLDOWN_HOURS: i64 = 24;
/// Cooldown before an authenticated caller may release an anonymous legacy
/// deployment that has failed or expired.
const ANONYMOUS_COOLDOWN_HOURS: i64 = 1;

static LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("label regex"));

/// Labels that are never claimable; lookups against this set short-circuit
/// all ownership logic.
static RESERVED: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "www", "api", "app", "admin", "berth", "mail", "smtp", "ftp", "dev", "staging", "status",
        "docs", "blog", "cdn", "assets", "internal", "root",
    ]
    .into_iter()
    .collect()
});

// ─── Normalization ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    TooShort,
    TooLong,
    InvalidCharacters,
}

impl std::fmt::Display for LabelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort => write!(f, "subdomain must be at least {MIN_LABEL_LEN} characters"),
            Self::TooLong => write!(f, "subdomain must be at most {MAX_LABEL_LEN} characters"),
            Self::InvalidCharacters => write!(
                f,
                "subdomain may only contain lowercase letters, digits and inner hyphens"
            ),
        }
    }
}

/// Lowercase and validate a requested label.
pub fn normalize(raw: &str) -> Result<String, LabelError> {
    let label = raw.trim().to_lowercase();
    if label.len() < MIN_LABEL_LEN {
        return Err(LabelError::TooShort);
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(LabelError::TooLong);
    }
    if !LABEL_RE.is_match(&label) {
        return Err(LabelError::InvalidCharacters);
    }
    Ok(label)
}

pub fn is_reserved(label: &str) -> bool {
    RESERVED.contains(label)
}

// ─── Classification ───────────────────────────────────────────────────────────

/// What a lookup of a normalized label means for a would-be claimant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Reserved,
    /// Held by a live deployment.
    InUse { deployment_id: String },
    /// Held by a deployment that failed, expired, or stalled; releasable
    /// under the release protocol.
    StaleFailed { deployment_id: String },
}

/// True when a holder in `status` with the given timestamps no longer
/// defends its claim.
pub fn is_stale(
    status: DeploymentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match status {
        DeploymentStatus::Failed | DeploymentStatus::Expired => true,
        DeploymentStatus::Pending => now - created_at > Duration::minutes(PENDING_STALE_MINUTES),
        DeploymentStatus::Uploading | DeploymentStatus::Analyzing | DeploymentStatus::Building => {
            now - updated_at > Duration::minutes(TRANSITION_STALE_MINUTES)
        }
        DeploymentStatus::Deploying | DeploymentStatus::Active => false,
    }
}

/// Classify a normalized label, self-healing a dangling secondary key.
pub async fn classify(store: &dyn RoutingStore, label: &str) -> Result<Availability> {
    if is_reserved(label) {
        return Ok(Availability::Reserved);
    }
    let Some(deployment_id) = store.lookup_subdomain(label).await? else {
        return Ok(Availability::Available);
    };
    match store.get_record(&deployment_id).await? {
        None => {
            // Dangling secondary: the primary is gone. Heal and report the
            // label claimable.
            tracing::warn!(label, %deployment_id, "healing dangling subdomain index entry");
            store.release_subdomain(label).await?;
            Ok(Availability::Available)
        }
        Some(record) => Ok(classify_record(&record, Utc::now())),
    }
}

fn classify_record(record: &RoutingRecord, now: DateTime<Utc>) -> Availability {
    if is_stale(record.status, record.created_at, record.updated_at, now) {
        Availability::StaleFailed {
            deployment_id: record.deployment_id.clone(),
        }
    } else {
        Availability::InUse {
            deployment_id: record.deployment_id.clone(),
        }
    }
}

// ─── Claim ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimRejection {
    Reserved,
    InUse,
    /// Taken, but releasable via the release protocol.
    StaleFailed,
}

impl ClaimRejection {
    pub fn message(&self, label: &str) -> String {
        match self {
            Self::Reserved => format!("'{label}' is a reserved subdomain"),
            Self::InUse => format!("subdomain '{label}' is already in use"),
            Self::StaleFailed => format!(
                "subdomain '{label}' is held by a stale deployment; release it first"
            ),
        }
    }
}

const CLAIM_ATTEMPTS: usize = 3;

/// Claim a normalized label for a deployment. First writer wins; a
/// contending writer retries the classification from the top.
pub async fn claim(
    store: &dyn RoutingStore,
    label: &str,
    deployment_id: &str,
) -> Result<Result<(), ClaimRejection>> {
    for _ in 0..CLAIM_ATTEMPTS {
        match classify(store, label).await? {
            Availability::Reserved => return Ok(Err(ClaimRejection::Reserved)),
            Availability::InUse { .. } => return Ok(Err(ClaimRejection::InUse)),
            Availability::StaleFailed { .. } => return Ok(Err(ClaimRejection::StaleFailed)),
            Availability::Available => {
                if store.claim_subdomain(label, deployment_id).await? {
                    return Ok(Ok(()));
                }
                // Lost the race; reclassify against the new holder.
            }
        }
    }
    Ok(Err(ClaimRejection::InUse))
}

// ─── Release authorization ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseDecision {
    Allow,
    Deny(String),
}

/// Decide whether `caller_user_id` may release the deployment holding a
/// label. Pure so the cooldown matrix is testable.
///
/// `owner` is the holding deployment's owner (None for anonymous legacy
/// rows). Unauthenticated release is rejected before this point.
pub fn authorize_release(
    caller_user_id: &str,
    owner: Option<&str>,
    status: DeploymentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ReleaseDecision {
    if owner == Some(caller_user_id) {
        // Owner release: blocked only while the deployment is actively
        // transitioning with recent progress.
        let transitioning = matches!(
            status,
            DeploymentStatus::Uploading | DeploymentStatus::Building | DeploymentStatus::Deploying
        );
        if transitioning && now - updated_at < Duration::minutes(TRANSITION_STALE_MINUTES) {
            return ReleaseDecision::Deny(
                "deployment is still in progress; wait for it to settle before releasing".into(),
            );
        }
        return ReleaseDecision::Allow;
    }

    match owner {
        None => {
            // Anonymous legacy holder: any authenticated caller, short cooldown,
            // terminal states only.
            if !matches!(
                status,
                DeploymentStatus::Failed | DeploymentStatus::Expired
            ) {
                return ReleaseDecision::Deny(
                    "this deployment is not in a releasable state".into(),
                );
            }
            deny_until(updated_at, Duration::hours(ANONYMOUS_COOLDOWN_HOURS), now)
        }
        Some(_) => {
            if !is_stale(status, created_at, updated_at, now) {
                return ReleaseDecision::Deny(
                    "this subdomain belongs to an active deployment".into(),
                );
            }
            deny_until(updated_at, Duration::hours(THIRD_PARTY_COOLDOWN_HOURS), now)
        }
    }
}

fn deny_until(updated_at: DateTime<Utc>, cooldown: Duration, now: DateTime<Utc>) -> ReleaseDecision {
    let elapsed = now - updated_at;
    if elapsed >= cooldown {
        ReleaseDecision::Allow
    } else {
        let remaining = cooldown - elapsed;
        let minutes = remaining.num_minutes().max(1);
        ReleaseDecision::Deny(format!(
            "release cooldown active; try again in {}h{:02}m",
            minutes / 60,
            minutes % 60
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_validates() {
        assert_eq!(normalize("Hello").unwrap(), "hello");
        assert_eq!(normalize("my-app-42").unwrap(), "my-app-42");
        assert_eq!(normalize("ab"), Err(LabelError::TooShort));
        assert_eq!(normalize(&"a".repeat(64)), Err(LabelError::TooLong));
        assert_eq!(normalize("-abc"), Err(LabelError::InvalidCharacters));
        assert_eq!(normalize("abc-"), Err(LabelError::InvalidCharacters));
        assert_eq!(normalize("a_b_c"), Err(LabelError::InvalidCharacters));
        assert_eq!(normalize("héllo"), Err(LabelError::InvalidCharacters));
    }

    #[test]
    fn reserved_labels_short_circuit() {
        for label in ["www", "api", "app", "admin", "berth"] {
            assert!(is_reserved(label));
        }
        assert!(!is_reserved("hello"));
    }

    #[test]
    fn staleness_matrix() {
        let now = Utc::now();
        let recent = now - Duration::minutes(5);
        let old = now - Duration::hours(2);

        assert!(is_stale(DeploymentStatus::Failed, recent, recent, now));
        assert!(is_stale(DeploymentStatus::Expired, recent, recent, now));
        assert!(!is_stale(DeploymentStatus::Pending, recent, recent, now));
        assert!(is_stale(DeploymentStatus::Pending, old, recent, now));
        assert!(!is_stale(DeploymentStatus::Building, old, recent, now));
        assert!(is_stale(DeploymentStatus::Building, old, old, now));
        assert!(!is_stale(DeploymentStatus::Active, old, old, now));
        assert!(!is_stale(DeploymentStatus::Deploying, old, old, now));
    }

    #[test]
    fn owner_release_blocked_mid_transition() {
        let now = Utc::now();
        let recent = now - Duration::minutes(10);
        let decision = authorize_release(
            "u1",
            Some("u1"),
            DeploymentStatus::Building,
            recent,
            recent,
            now,
        );
        assert!(matches!(decision, ReleaseDecision::Deny(_)));

        let settled = authorize_release(
            "u1",
            Some("u1"),
            DeploymentStatus::Active,
            recent,
            recent,
            now,
        );
        assert_eq!(settled, ReleaseDecision::Allow);
    }

    #[test]
    fn third_party_release_respects_cooldown() {
        let now = Utc::now();
        let failed_23h = now - Duration::hours(23);
        let failed_25h = now - Duration::hours(25);

        let early = authorize_release(
            "u2",
            Some("u1"),
            DeploymentStatus::Failed,
            failed_23h,
            failed_23h,
            now,
        );
        match early {
            ReleaseDecision::Deny(msg) => assert!(msg.contains("cooldown")),
            ReleaseDecision::Allow => panic!("release allowed before cooldown"),
        }

        let late = authorize_release(
            "u2",
            Some("u1"),
            DeploymentStatus::Failed,
            failed_25h,
            failed_25h,
            now,
        );
        assert_eq!(late, ReleaseDecision::Allow);
    }

    #[test]
    fn third_party_cannot_release_live_deployment() {
        let now = Utc::now();
        let old = now - Duration::days(30);
        let decision = authorize_release(
            "u2",
            Some("u1"),
            DeploymentStatus::Active,
            old,
            old,
            now,
        );
        assert!(matches!(decision, ReleaseDecision::Deny(_)));
    }

    #[test]
    fn anonymous_legacy_release_after_short_cooldown() {
        let now = Utc::now();
        let failed_30m = now - Duration::minutes(30);
        let failed_2h = now - Duration::hours(2);

        assert!(matches!(
            authorize_release("u2", None, DeploymentStatus::Failed, failed_30m, failed_30m, now),
            ReleaseDecision::Deny(_)
        ));
        assert_eq!(
            authorize_release("u2", None, DeploymentStatus::Failed, failed_2h, failed_2h, now),
            ReleaseDecision::Allow
        );
        // Non-terminal anonymous deployments are not releasable at all.
        assert!(matches!(
            authorize_release("u2", None, DeploymentStatus::Active, failed_2h, failed_2h, now),
            ReleaseDecision::Deny(_)
        ));
    }
}
