// Relational store behavior: deployment metadata, quota counting, TTL
// queries, and the pro-upgrade TTL wipe.

use berthd::store::Storage;
use chrono::{Duration, Utc};
use tempfile::TempDir;

async fn fixture() -> (Storage, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path()).await.unwrap();
    (storage, dir)
}

#[tokio::test]
async fn deployment_round_trip() {
    let (storage, _dir) = fixture().await;
    let user = storage
        .upsert_user_on_login("a@example.com", None, None, "user")
        .await
        .unwrap();

    let expires = Utc::now() + Duration::hours(72);
    let row = storage
        .insert_deployment("dep1", Some(&user.id), "hello", Some(3), Some(expires))
        .await
        .unwrap();
    assert_eq!(row.status, "pending");
    assert_eq!(row.subdomain, "hello");
    assert_eq!(row.character_id, Some(3));
    assert!(row.expires_at.is_some());

    storage
        .update_deployment("dep1", "building", None, Some("build-9"), Some("streamlit"), Some("python"), None)
        .await
        .unwrap();
    let row = storage.get_deployment("dep1").await.unwrap().unwrap();
    assert_eq!(row.status, "building");
    assert_eq!(row.build_id.as_deref(), Some("build-9"));
    assert_eq!(row.framework.as_deref(), Some("streamlit"));

    // Optional fields only ever fill in; a later status write keeps them.
    storage
        .update_deployment("dep1", "active", Some("https://x.run.app"), None, None, None, None)
        .await
        .unwrap();
    let row = storage.get_deployment("dep1").await.unwrap().unwrap();
    assert_eq!(row.build_id.as_deref(), Some("build-9"));
    assert_eq!(row.origin.as_deref(), Some("https://x.run.app"));

    storage.delete_deployment("dep1").await.unwrap();
    assert!(storage.get_deployment("dep1").await.unwrap().is_none());
}

#[tokio::test]
async fn quota_counts_every_extant_row() {
    let (storage, _dir) = fixture().await;
    let user = storage
        .upsert_user_on_login("b@example.com", None, None, "user")
        .await
        .unwrap();

    for (i, status) in ["active", "failed", "pending"].iter().enumerate() {
        let id = format!("dep{i}");
        storage
            .insert_deployment(&id, Some(&user.id), &format!("app{i}"), None, None)
            .await
            .unwrap();
        storage
            .update_deployment(&id, status, None, None, None, None, None)
            .await
            .unwrap();
    }

    assert_eq!(storage.count_deployments_for_user(&user.id).await.unwrap(), 3);
    storage.delete_deployment("dep1").await.unwrap();
    assert_eq!(storage.count_deployments_for_user(&user.id).await.unwrap(), 2);
}

#[tokio::test]
async fn expired_listing_only_returns_past_ttls() {
    let (storage, _dir) = fixture().await;
    let now = Utc::now();

    storage
        .insert_deployment("past", None, "old-app", None, Some(now - Duration::seconds(1)))
        .await
        .unwrap();
    storage
        .insert_deployment("future", None, "new-app", None, Some(now + Duration::hours(1)))
        .await
        .unwrap();
    storage
        .insert_deployment("no-ttl", None, "pro-app", None, None)
        .await
        .unwrap();

    let expired = storage.list_expired_deployments(now).await.unwrap();
    let ids: Vec<&str> = expired.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["past"]);
}

#[tokio::test]
async fn upgrade_clears_ttls_except_failed() {
    let (storage, _dir) = fixture().await;
    let user = storage
        .upsert_user_on_login("c@example.com", None, None, "user")
        .await
        .unwrap();
    let ttl = Some(Utc::now() + Duration::hours(72));

    storage
        .insert_deployment("live", Some(&user.id), "live-app", None, ttl)
        .await
        .unwrap();
    storage
        .insert_deployment("broken", Some(&user.id), "broken-app", None, ttl)
        .await
        .unwrap();
    storage
        .update_deployment("broken", "failed", None, None, None, None, Some("boom"))
        .await
        .unwrap();

    let cleared = storage.clear_user_deployment_ttls(&user.id).await.unwrap();
    assert_eq!(cleared, 1);
    assert!(storage.get_deployment("live").await.unwrap().unwrap().expires_at.is_none());
    assert!(storage.get_deployment("broken").await.unwrap().unwrap().expires_at.is_some());
}

#[tokio::test]
async fn user_upsert_is_keyed_by_email() {
    let (storage, _dir) = fixture().await;
    let first = storage
        .upsert_user_on_login("d@example.com", Some("Old Name"), None, "user")
        .await
        .unwrap();
    let second = storage
        .upsert_user_on_login("d@example.com", Some("New Name"), Some("https://pic"), "super_admin")
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.display_name.as_deref(), Some("New Name"));
    assert!(second.is_super_admin());
}

#[tokio::test]
async fn billing_lookups_and_tier_updates() {
    let (storage, _dir) = fixture().await;
    let user = storage
        .upsert_user_on_login("e@example.com", None, None, "user")
        .await
        .unwrap();

    storage
        .set_user_billing_refs(&user.id, Some("cus_123"), Some("sub_456"))
        .await
        .unwrap();
    let found = storage
        .get_user_by_billing_customer("cus_123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user.id);

    storage.set_user_tier(&user.id, "pro", "active").await.unwrap();
    storage.add_addon_packs(&user.id, 2).await.unwrap();
    let user = storage.get_user(&user.id).await.unwrap().unwrap();
    assert_eq!(user.tier, "pro");
    assert_eq!(user.addon_packs, 2);
}

#[tokio::test]
async fn stats_count_by_status() {
    let (storage, _dir) = fixture().await;
    for (id, status) in [("s1", "active"), ("s2", "active"), ("s3", "failed")] {
        storage
            .insert_deployment(id, None, &format!("{id}-app"), None, None)
            .await
            .unwrap();
        storage
            .update_deployment(id, status, None, None, None, None, None)
            .await
            .unwrap();
    }
    let stats = storage.deployment_stats().await.unwrap();
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["by_status"]["active"], 2);
    assert_eq!(stats["by_status"]["failed"], 1);
    assert_eq!(stats["by_tier"]["anonymous"], 3);
}
