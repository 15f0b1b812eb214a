// Session lifecycle against a real SQLite store: creation, rotation,
// the absolute ceiling, logout, and cleanup.

use std::sync::Arc;

use berthd::config::SessionPolicy;
use berthd::session::{SessionManager, SESSION_COOKIE};
use berthd::store::Storage;

async fn fixture(policy: SessionPolicy) -> (SessionManager, Arc<Storage>, String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
    let user = storage
        .upsert_user_on_login("tester@example.com", Some("Tester"), None, "user")
        .await
        .unwrap();
    let manager = SessionManager::new(storage.clone(), policy, false);
    (manager, storage, user.id, dir)
}

fn default_policy() -> SessionPolicy {
    SessionPolicy {
        duration_hours: 168,
        rotation_interval_hours: 24,
        absolute_ceiling_hours: 720,
    }
}

fn cookie_session_id(cookie: &str) -> String {
    let prefix = format!("{SESSION_COOKIE}=");
    cookie
        .strip_prefix(&prefix)
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn create_then_authenticate() {
    let (manager, _storage, user_id, _dir) = fixture(default_policy()).await;

    let cookie = manager.create(&user_id).await.unwrap();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/"));

    let session_id = cookie_session_id(&cookie);
    let (auth, rotated) = manager
        .authenticate(&session_id)
        .await
        .unwrap()
        .expect("fresh session authenticates");
    assert_eq!(auth.user.id, user_id);
    assert!(rotated.is_none(), "no rotation inside the interval");
}

#[tokio::test]
async fn unknown_session_does_not_authenticate() {
    let (manager, _storage, _user_id, _dir) = fixture(default_policy()).await;
    assert!(manager.authenticate("deadbeef").await.unwrap().is_none());
}

#[tokio::test]
async fn rotation_mints_a_new_id_and_invalidates_the_old() {
    let policy = SessionPolicy {
        rotation_interval_hours: 0,
        ..default_policy()
    };
    let (manager, _storage, user_id, _dir) = fixture(policy).await;

    let cookie = manager.create(&user_id).await.unwrap();
    let old_id = cookie_session_id(&cookie);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let (auth, rotated) = manager
        .authenticate(&old_id)
        .await
        .unwrap()
        .expect("session authenticates and rotates");
    let new_cookie = rotated.expect("rotation emits a replacement cookie");
    let new_id = cookie_session_id(&new_cookie);

    assert_ne!(new_id, old_id);
    assert_eq!(auth.session_id, new_id);
    // The replaced id is gone; the new one works.
    assert!(manager.authenticate(&old_id).await.unwrap().is_none());
    assert!(manager.authenticate(&new_id).await.unwrap().is_some());
}

#[tokio::test]
async fn absolute_ceiling_invalidates_regardless_of_rotation() {
    let policy = SessionPolicy {
        rotation_interval_hours: 0,
        absolute_ceiling_hours: 0,
        ..default_policy()
    };
    let (manager, _storage, user_id, _dir) = fixture(policy).await;

    let cookie = manager.create(&user_id).await.unwrap();
    let session_id = cookie_session_id(&cookie);

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    // Older than the (zero-hour) ceiling: never authenticates, even though
    // rotation would otherwise be due.
    assert!(manager.authenticate(&session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn logout_deletes_and_clears() {
    let (manager, _storage, user_id, _dir) = fixture(default_policy()).await;

    let cookie = manager.create(&user_id).await.unwrap();
    let session_id = cookie_session_id(&cookie);

    let clearing = manager.logout(&session_id).await.unwrap();
    assert!(clearing.contains("Max-Age=0"));
    assert!(manager.authenticate(&session_id).await.unwrap().is_none());
}

#[tokio::test]
async fn cleanup_removes_only_expired_rows() {
    let (manager, storage, user_id, _dir) = fixture(default_policy()).await;

    let cookie = manager.create(&user_id).await.unwrap();
    let live_id = cookie_session_id(&cookie);
    storage
        .create_session("expired-row", &user_id, chrono::Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();

    let removed = manager.cleanup_expired().await.unwrap();
    assert_eq!(removed, 1);
    assert!(manager.authenticate(&live_id).await.unwrap().is_some());
}
