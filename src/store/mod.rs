// store/mod.rs — the relational store (SQLite, WAL mode).
//
// Source of truth for users, sessions, and deployment metadata. The
// routing ledger shadows the subset the proxy needs; rows here carry
// ownership, quota, and TTL semantics.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};
use uuid::Uuid;

/// Default timeout for individual SQLite queries.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// 'user' | 'super_admin'
    pub role: String,
    /// 'free' | 'pro'
    pub tier: String,
    /// 'active' | 'canceled' | 'past_due'
    pub tier_status: String,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    pub addon_packs: i64,
    pub custom_apex: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub fn is_super_admin(&self) -> bool {
        self.role == "super_admin"
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub created_at: String,
    pub expires_at: String,
    pub last_rotated_at: String,
    pub rotation_count: i64,
}

impl SessionRow {
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn last_rotated_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_rotated_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeploymentRow {
    pub id: String,
    /// NULL for legacy anonymous deployments.
    pub user_id: Option<String>,
    pub subdomain: String,
    pub framework: Option<String>,
    pub language: Option<String>,
    pub status: String,
    pub origin: Option<String>,
    pub build_id: Option<String>,
    pub error: Option<String>,
    pub praise: Option<String>,
    pub character_id: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
    /// NULL ⇔ no TTL (pro tier at creation).
    pub expires_at: Option<String>,
}

// ─── Storage ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("berthd.db");
        let opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        for sql in [include_str!("migrations/001_init.sql")] {
            for stmt in sql.split(';') {
                let stmt = stmt.trim();
                if !stmt.is_empty() {
                    sqlx::query(stmt).execute(pool).await?;
                }
            }
        }
        Ok(())
    }

    pub async fn probe(&self) -> Result<()> {
        let _: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    // ─── Users ──────────────────────────────────────────────────────────────

    /// Create-or-refresh a user on federated login. Email is the natural
    /// key; the role is recomputed on every login so super-admin matching
    /// follows the current configuration.
    pub async fn upsert_user_on_login(
        &self,
        email: &str,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
        role: &str,
    ) -> Result<UserRow> {
        let now = now_rfc3339();
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (id, email, display_name, avatar_url, role, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(email) DO UPDATE SET
               display_name = excluded.display_name,
               avatar_url = excluded.avatar_url,
               role = excluded.role,
               updated_at = excluded.updated_at",
        )
        .bind(&id)
        .bind(email)
        .bind(display_name)
        .bind(avatar_url)
        .bind(role)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_user_by_email(email)
            .await?
            .ok_or_else(|| anyhow::anyhow!("user not found after upsert"))
    }

    pub async fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        Ok(sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn get_user_by_billing_customer(&self, customer_id: &str) -> Result<Option<UserRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM users WHERE billing_customer_id = ?")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    pub async fn set_user_tier(&self, user_id: &str, tier: &str, tier_status: &str) -> Result<()> {
        sqlx::query("UPDATE users SET tier = ?, tier_status = ?, updated_at = ? WHERE id = ?")
            .bind(tier)
            .bind(tier_status)
            .bind(now_rfc3339())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_user_billing_refs(
        &self,
        user_id: &str,
        customer_id: Option<&str>,
        subscription_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET
               billing_customer_id = COALESCE(?, billing_customer_id),
               billing_subscription_id = COALESCE(?, billing_subscription_id),
               updated_at = ?
             WHERE id = ?",
        )
        .bind(customer_id)
        .bind(subscription_id)
        .bind(now_rfc3339())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn add_addon_packs(&self, user_id: &str, packs: i64) -> Result<()> {
        sqlx::query(
            "UPDATE users SET addon_packs = addon_packs + ?, updated_at = ? WHERE id = ?",
        )
        .bind(packs)
        .bind(now_rfc3339())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Upgrade effect: drop the TTL from all of a user's non-failed
    /// deployments.
    pub async fn clear_user_deployment_ttls(&self, user_id: &str) -> Result<u64> {
        let n = sqlx::query(
            "UPDATE deployments SET expires_at = NULL, updated_at = ?
             WHERE user_id = ? AND status != 'failed'",
        )
        .bind(now_rfc3339())
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(n)
    }

    // ─── Sessions ───────────────────────────────────────────────────────────

    pub async fn create_session(
        &self,
        session_id: &str,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, expires_at, last_rotated_at, rotation_count)
             VALUES (?, ?, ?, ?, ?, 0)",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(&now)
        .bind(expires_at.to_rfc3339())
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Single validating read: the session row, only while unexpired.
    pub async fn get_live_session(&self, session_id: &str) -> Result<Option<SessionRow>> {
        Ok(
            sqlx::query_as("SELECT * FROM sessions WHERE id = ? AND expires_at > ?")
                .bind(session_id)
                .bind(now_rfc3339())
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Mint the rotated row, then delete the old one. Preserves
    /// `created_at` so the absolute ceiling keeps counting from the
    /// original login.
    pub async fn rotate_session(
        &self,
        old: &SessionRow,
        new_session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = now_rfc3339();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO sessions (id, user_id, created_at, expires_at, last_rotated_at, rotation_count)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_session_id)
        .bind(&old.user_id)
        .bind(&old.created_at)
        .bind(expires_at.to_rfc3339())
        .bind(&now)
        .bind(old.rotation_count + 1)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(&old.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete_expired_sessions(&self) -> Result<u64> {
        with_timeout(async {
            let n = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                .bind(now_rfc3339())
                .execute(&self.pool)
                .await?
                .rows_affected();
            Ok(n)
        })
        .await
    }

    // ─── Deployments ────────────────────────────────────────────────────────

    pub async fn insert_deployment(
        &self,
        id: &str,
        user_id: Option<&str>,
        subdomain: &str,
        character_id: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<DeploymentRow> {
        let now = now_rfc3339();
        sqlx::query(
            "INSERT INTO deployments (id, user_id, subdomain, status, character_id, created_at, updated_at, expires_at)
             VALUES (?, ?, ?, 'pending', ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(subdomain)
        .bind(character_id)
        .bind(&now)
        .bind(&now)
        .bind(expires_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        self.get_deployment(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("deployment not found after insert"))
    }

    pub async fn get_deployment(&self, id: &str) -> Result<Option<DeploymentRow>> {
        Ok(sqlx::query_as("SELECT * FROM deployments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn list_deployments_for_user(&self, user_id: &str) -> Result<Vec<DeploymentRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM deployments WHERE user_id = ? ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    pub async fn list_all_deployments(&self) -> Result<Vec<DeploymentRow>> {
        with_timeout(async {
            Ok(
                sqlx::query_as("SELECT * FROM deployments ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?,
            )
        })
        .await
    }

    /// Quota check input: every extant row counts until deleted or reaped.
    pub async fn count_deployments_for_user(&self, user_id: &str) -> Result<i64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM deployments WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Mirror routing-record progress into the metadata row. Optional
    /// fields only ever fill in; status and error always win.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_deployment(
        &self,
        id: &str,
        status: &str,
        origin: Option<&str>,
        build_id: Option<&str>,
        framework: Option<&str>,
        language: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE deployments SET
               status = ?,
               origin = COALESCE(?, origin),
               build_id = COALESCE(?, build_id),
               framework = COALESCE(?, framework),
               language = COALESCE(?, language),
               error = COALESCE(?, error),
               updated_at = ?
             WHERE id = ?",
        )
        .bind(status)
        .bind(origin)
        .bind(build_id)
        .bind(framework)
        .bind(language)
        .bind(error)
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_deployment(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM deployments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deployments whose TTL has passed, for the reaper.
    pub async fn list_expired_deployments(&self, now: DateTime<Utc>) -> Result<Vec<DeploymentRow>> {
        with_timeout(async {
            Ok(sqlx::query_as(
                "SELECT * FROM deployments WHERE expires_at IS NOT NULL AND expires_at <= ?",
            )
            .bind(now.to_rfc3339())
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    /// Counts by status and by owner tier, for the admin surface.
    pub async fn deployment_stats(&self) -> Result<serde_json::Value> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM deployments GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let total: i64 = rows.iter().map(|(_, n)| n).sum();
        let mut by_status = serde_json::Map::new();
        for (status, n) in rows {
            by_status.insert(status, serde_json::json!(n));
        }

        let tier_rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT COALESCE(u.tier, 'anonymous'), COUNT(*)
             FROM deployments d LEFT JOIN users u ON u.id = d.user_id
             GROUP BY 1",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut by_tier = serde_json::Map::new();
        for (tier, n) in tier_rows {
            by_tier.insert(tier, serde_json::json!(n));
        }

        Ok(serde_json::json!({
            "total": total,
            "by_status": by_status,
            "by_tier": by_tier,
        }))
    }
}
