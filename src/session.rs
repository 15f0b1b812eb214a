// session.rs — cookie sessions: creation, validation, rotation, cleanup.
//
// Session ids are opaque 256-bit random tokens. Rotation mints a new id on
// an interval while preserving the original `created_at`; a session whose
// absolute age passes the ceiling never authenticates again, regardless of
// rotation.

use anyhow::Result;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::config::SessionPolicy;
use crate::ids;
use crate::store::{Storage, UserRow};

pub const SESSION_COOKIE: &str = "berth_session";

/// An authenticated caller, attached to the request by the session
/// middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: UserRow,
    pub session_id: String,
}

pub struct SessionManager {
    storage: Arc<Storage>,
    policy: SessionPolicy,
    secure_cookies: bool,
}

impl SessionManager {
    pub fn new(storage: Arc<Storage>, policy: SessionPolicy, secure_cookies: bool) -> Self {
        Self {
            storage,
            policy,
            secure_cookies,
        }
    }

    /// Create a session for a user; returns the Set-Cookie value.
    pub async fn create(&self, user_id: &str) -> Result<String> {
        let session_id = ids::session_id();
        let expires_at = Utc::now() + Duration::hours(self.policy.duration_hours);
        self.storage
            .create_session(&session_id, user_id, expires_at)
            .await?;
        Ok(self.build_cookie(&session_id))
    }

    /// Validate a session id. Returns the user plus, when rotation fired,
    /// the replacement Set-Cookie value to attach to the response.
    pub async fn authenticate(&self, session_id: &str) -> Result<Option<(AuthUser, Option<String>)>> {
        let Some(session) = self.storage.get_live_session(session_id).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let created_at = match session.created_at_utc() {
            Some(t) => t,
            None => {
                // Unparseable row: treat as invalid and drop it.
                self.storage.delete_session(session_id).await?;
                return Ok(None);
            }
        };

        // Absolute ceiling: age out regardless of rotation history.
        if now - created_at > Duration::hours(self.policy.absolute_ceiling_hours) {
            debug!(session_id, "session passed absolute ceiling; invalidating");
            self.storage.delete_session(session_id).await?;
            return Ok(None);
        }

        let mut effective_id = session.id.clone();
        let mut rotated_cookie = None;
        let rotation_due = session
            .last_rotated_at_utc()
            .map(|t| now - t > Duration::hours(self.policy.rotation_interval_hours))
            .unwrap_or(true);
        if rotation_due {
            let new_id = ids::session_id();
            let expires_at = now + Duration::hours(self.policy.duration_hours);
            self.storage
                .rotate_session(&session, &new_id, expires_at)
                .await?;
            rotated_cookie = Some(self.build_cookie(&new_id));
            effective_id = new_id;
        }

        let Some(user) = self.storage.get_user(&session.user_id).await? else {
            self.storage.delete_session(&effective_id).await?;
            return Ok(None);
        };

        Ok(Some((
            AuthUser {
                user,
                session_id: effective_id,
            },
            rotated_cookie,
        )))
    }

    /// Delete the session; returns the clearing Set-Cookie value.
    pub async fn logout(&self, session_id: &str) -> Result<String> {
        self.storage.delete_session(session_id).await?;
        Ok(self.clearing_cookie())
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        self.storage.delete_expired_sessions().await
    }

    fn build_cookie(&self, session_id: &str) -> String {
        let max_age = self.policy.duration_hours * 3600;
        let secure = if self.secure_cookies { "; Secure" } else { "" };
        format!(
            "{SESSION_COOKIE}={session_id}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}{secure}"
        )
    }

    pub fn clearing_cookie(&self) -> String {
        let secure = if self.secure_cookies { "; Secure" } else { "" };
        format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{secure}")
    }
}

/// Pull the session id out of the Cookie header, if any.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        if name == SESSION_COOKIE && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_parse_handles_multiple_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            "theme=dark; berth_session=abc123; other=x".parse().unwrap(),
        );
        assert_eq!(session_id_from_headers(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn cookie_parse_misses_are_none() {
        let mut headers = HeaderMap::new();
        assert!(session_id_from_headers(&headers).is_none());
        headers.insert(axum::http::header::COOKIE, "theme=dark".parse().unwrap());
        assert!(session_id_from_headers(&headers).is_none());
    }
}
