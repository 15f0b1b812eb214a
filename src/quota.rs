// quota.rs — per-user deployment quotas and TTL policy.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::QuotaConfig;
use crate::store::UserRow;

/// A user's effective service level once tier status is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveTier {
    Free,
    Pro,
}

/// Pro requires an active subscription; canceled or past-due billing falls
/// back to the free policy for new deployments.
pub fn effective_tier(user: &UserRow) -> EffectiveTier {
    if user.tier == "pro" && user.tier_status == "active" {
        EffectiveTier::Pro
    } else {
        EffectiveTier::Free
    }
}

/// Effective max deployments = base for tier + add-on packs × per-pack.
/// Free tier carries no add-ons.
pub fn max_deployments(user: &UserRow, config: &QuotaConfig) -> u32 {
    match effective_tier(user) {
        EffectiveTier::Free => config.free_max_deployments,
        EffectiveTier::Pro => {
            config.pro_max_deployments
                + (user.addon_packs.max(0) as u32) * config.deployments_per_pack
        }
    }
}

/// TTL assignment at create time: free (and anonymous legacy) deployments
/// expire; pro deployments do not.
pub fn ttl_for(user: Option<&UserRow>, config: &QuotaConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match user.map(effective_tier) {
        Some(EffectiveTier::Pro) => None,
        _ => Some(now + Duration::hours(config.free_ttl_hours)),
    }
}

/// Quota summary for /auth/me.
#[derive(Debug, Serialize)]
pub struct QuotaSummary {
    pub tier: EffectiveTier,
    pub used: i64,
    pub max: u32,
    /// Hours of TTL newly created deployments receive; absent for pro.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_hours: Option<i64>,
}

pub fn summarize(user: &UserRow, used: i64, config: &QuotaConfig) -> QuotaSummary {
    let tier = effective_tier(user);
    QuotaSummary {
        tier,
        used,
        max: max_deployments(user, config),
        ttl_hours: match tier {
            EffectiveTier::Free => Some(config.free_ttl_hours),
            EffectiveTier::Pro => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(tier: &str, tier_status: &str, packs: i64) -> UserRow {
        UserRow {
            id: "u1".into(),
            email: "u1@example.com".into(),
            display_name: None,
            avatar_url: None,
            role: "user".into(),
            tier: tier.into(),
            tier_status: tier_status.into(),
            billing_customer_id: None,
            billing_subscription_id: None,
            addon_packs: packs,
            custom_apex: None,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    fn config() -> QuotaConfig {
        QuotaConfig {
            free_max_deployments: 3,
            pro_max_deployments: 10,
            deployments_per_pack: 5,
            free_ttl_hours: 72,
        }
    }

    #[test]
    fn free_tier_has_fixed_cap_and_no_addons() {
        let u = user("free", "active", 4);
        assert_eq!(effective_tier(&u), EffectiveTier::Free);
        assert_eq!(max_deployments(&u, &config()), 3);
    }

    #[test]
    fn pro_tier_adds_packs() {
        let u = user("pro", "active", 2);
        assert_eq!(max_deployments(&u, &config()), 20);
    }

    #[test]
    fn lapsed_pro_falls_back_to_free_policy() {
        for status in ["canceled", "past_due"] {
            let u = user("pro", status, 2);
            assert_eq!(effective_tier(&u), EffectiveTier::Free);
            assert_eq!(max_deployments(&u, &config()), 3);
        }
    }

    #[test]
    fn ttl_only_for_free_and_anonymous() {
        let now = Utc::now();
        let cfg = config();

        let free = user("free", "active", 0);
        let expiry = ttl_for(Some(&free), &cfg, now).expect("free gets a ttl");
        assert_eq!(expiry, now + Duration::hours(72));

        let pro = user("pro", "active", 0);
        assert!(ttl_for(Some(&pro), &cfg, now).is_none());

        assert!(ttl_for(None, &cfg, now).is_some());
    }
}
