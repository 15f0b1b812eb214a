// routing/redis.rs — Redis/Valkey implementation of the routing ledger.
//
// Key layout:
//   app:{deployment_id}          routing record JSON, TTL 30 d
//   subdomain:{label}            deployment_id, TTL 30 d
//   log:release:{label}:{ts}     release audit JSON, TTL 90 d
//   rl:{class}:{caller}          rate counter, TTL = window + buffer
//
// The subdomain claim is a SET NX; record transitions go through a Lua
// compare-and-swap on the embedded version counter. Every operation is
// bounded by a 2 s ceiling.

use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use fred::prelude::*;
use std::time::Duration;

use super::{RateWindow, ReleaseAudit, RoutingRecord, RoutingStore, AUDIT_TTL_SECS, RECORD_TTL_SECS};

const OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Compare-and-swap on the record's version counter.
/// KEYS[1] = record key, ARGV[1] = expected stored version,
/// ARGV[2] = new record JSON, ARGV[3] = TTL seconds.
const CAS_SCRIPT: &str = r#"
local cur = redis.call('GET', KEYS[1])
if not cur then return 0 end
local obj = cjson.decode(cur)
local ver = obj.version or 0
if tostring(ver) ~= ARGV[1] then return 0 end
redis.call('SET', KEYS[1], ARGV[2], 'EX', tonumber(ARGV[3]))
return 1
"#;

/// Counter increment that arms the TTL exactly once.
/// KEYS[1] = counter key, ARGV[1] = TTL seconds. Returns {count, ttl}.
const RATE_SCRIPT: &str = r#"
local n = redis.call('INCR', KEYS[1])
if n == 1 then redis.call('EXPIRE', KEYS[1], tonumber(ARGV[1])) end
local ttl = redis.call('TTL', KEYS[1])
return {n, ttl}
"#;

fn record_key(deployment_id: &str) -> String {
    format!("app:{deployment_id}")
}

fn subdomain_key(label: &str) -> String {
    format!("subdomain:{label}")
}

/// Bound a store operation to the routing-op ceiling.
async fn timed<T, F>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => bail!(
            "routing store operation timed out after {}s",
            OP_TIMEOUT.as_secs()
        ),
    }
}

pub struct RedisRoutingStore {
    client: Client,
}

impl RedisRoutingStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let config = Config::from_url(url).context("invalid redis url")?;
        let client = Builder::from_config(config).build()?;
        client.init().await.context("redis connection failed")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RoutingStore for RedisRoutingStore {
    async fn get_record(&self, deployment_id: &str) -> Result<Option<RoutingRecord>> {
        let raw: Option<String> = timed(self.client.get(record_key(deployment_id))).await?;
        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("corrupt routing record")?,
            )),
            None => Ok(None),
        }
    }

    async fn create_record(&self, record: &RoutingRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let _: () = timed(self.client.set(
            record_key(&record.deployment_id),
            json,
            Some(Expiration::EX(RECORD_TTL_SECS)),
            None,
            false,
        ))
        .await?;
        Ok(())
    }

    async fn compare_and_update(&self, record: &RoutingRecord) -> Result<bool> {
        let json = serde_json::to_string(record)?;
        let expected = record.version.saturating_sub(1);
        let applied: i64 = timed(self.client.eval(
            CAS_SCRIPT,
            vec![record_key(&record.deployment_id)],
            vec![expected.to_string(), json, RECORD_TTL_SECS.to_string()],
        ))
        .await?;
        Ok(applied == 1)
    }

    async fn delete_record(&self, deployment_id: &str) -> Result<()> {
        let _: i64 = timed(self.client.del(record_key(deployment_id))).await?;
        Ok(())
    }

    async fn claim_subdomain(&self, label: &str, deployment_id: &str) -> Result<bool> {
        // First writer wins; contenders see nil back from SET NX.
        let set: Option<String> = timed(self.client.set(
            subdomain_key(label),
            deployment_id,
            Some(Expiration::EX(RECORD_TTL_SECS)),
            Some(SetOptions::NX),
            false,
        ))
        .await?;
        Ok(set.is_some())
    }

    async fn lookup_subdomain(&self, label: &str) -> Result<Option<String>> {
        timed(self.client.get(subdomain_key(label))).await
    }

    async fn release_subdomain(&self, label: &str) -> Result<()> {
        let _: i64 = timed(self.client.del(subdomain_key(label))).await?;
        Ok(())
    }

    async fn append_release_audit(&self, audit: &ReleaseAudit) -> Result<()> {
        let key = format!("log:release:{}:{}", audit.subdomain, audit.at.timestamp());
        let json = serde_json::to_string(audit)?;
        let _: () = timed(self.client.set(
            key,
            json,
            Some(Expiration::EX(AUDIT_TTL_SECS)),
            None,
            false,
        ))
        .await?;
        Ok(())
    }

    async fn incr_rate_counter(&self, key: &str, window_secs: i64) -> Result<RateWindow> {
        // TTL slightly exceeds the window so a reset never races the check.
        let ttl = window_secs + 5;
        let reply: Vec<i64> = timed(self.client.eval(
            RATE_SCRIPT,
            vec![key.to_string()],
            vec![ttl.to_string()],
        ))
        .await?;
        let count = reply.first().copied().unwrap_or(0);
        let remaining = reply.get(1).copied().unwrap_or(window_secs).max(0);
        Ok(RateWindow {
            count,
            reset_at: chrono::Utc::now().timestamp() + remaining,
        })
    }

    async fn probe(&self) -> Result<()> {
        let _: Option<String> = timed(self.client.get("routing:probe")).await?;
        Ok(())
    }
}
