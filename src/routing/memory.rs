// routing/memory.rs — in-memory routing ledger for tests and local dev.
//
// Same semantics as the Redis backend: first-writer-wins subdomain claims
// and version-checked record updates, serialized by a single mutex.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{RateWindow, ReleaseAudit, RoutingRecord, RoutingStore};

#[derive(Default)]
struct Inner {
    records: HashMap<String, RoutingRecord>,
    subdomains: HashMap<String, String>,
    audits: Vec<ReleaseAudit>,
    counters: HashMap<String, (i64, i64)>,
}

#[derive(Default)]
pub struct MemoryRoutingStore {
    inner: Mutex<Inner>,
}

impl MemoryRoutingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test accessor: audits appended so far, oldest first.
    pub fn release_audits(&self) -> Vec<ReleaseAudit> {
        self.inner.lock().expect("routing store poisoned").audits.clone()
    }
}

#[async_trait]
impl RoutingStore for MemoryRoutingStore {
    async fn get_record(&self, deployment_id: &str) -> Result<Option<RoutingRecord>> {
        let inner = self.inner.lock().expect("routing store poisoned");
        Ok(inner.records.get(deployment_id).cloned())
    }

    async fn create_record(&self, record: &RoutingRecord) -> Result<()> {
        let mut inner = self.inner.lock().expect("routing store poisoned");
        inner
            .records
            .insert(record.deployment_id.clone(), record.clone());
        Ok(())
    }

    async fn compare_and_update(&self, record: &RoutingRecord) -> Result<bool> {
        let mut inner = self.inner.lock().expect("routing store poisoned");
        match inner.records.get_mut(&record.deployment_id) {
            Some(stored) if stored.version == record.version.saturating_sub(1) => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_record(&self, deployment_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("routing store poisoned");
        inner.records.remove(deployment_id);
        Ok(())
    }

    async fn claim_subdomain(&self, label: &str, deployment_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().expect("routing store poisoned");
        if inner.subdomains.contains_key(label) {
            return Ok(false);
        }
        inner
            .subdomains
            .insert(label.to_string(), deployment_id.to_string());
        Ok(true)
    }

    async fn lookup_subdomain(&self, label: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().expect("routing store poisoned");
        Ok(inner.subdomains.get(label).cloned())
    }

    async fn release_subdomain(&self, label: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("routing store poisoned");
        inner.subdomains.remove(label);
        Ok(())
    }

    async fn append_release_audit(&self, audit: &ReleaseAudit) -> Result<()> {
        let mut inner = self.inner.lock().expect("routing store poisoned");
        inner.audits.push(audit.clone());
        Ok(())
    }

    async fn incr_rate_counter(&self, key: &str, window_secs: i64) -> Result<RateWindow> {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock().expect("routing store poisoned");
        let entry = inner.counters.entry(key.to_string()).or_insert((0, 0));
        if entry.1 <= now {
            *entry = (0, now + window_secs);
        }
        entry.0 += 1;
        Ok(RateWindow {
            count: entry.0,
            reset_at: entry.1,
        })
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_is_first_writer_wins() {
        let store = MemoryRoutingStore::new();
        assert!(store.claim_subdomain("hello", "d1").await.unwrap());
        assert!(!store.claim_subdomain("hello", "d2").await.unwrap());
        assert_eq!(
            store.lookup_subdomain("hello").await.unwrap().as_deref(),
            Some("d1")
        );
    }

    #[tokio::test]
    async fn compare_and_update_rejects_stale_writers() {
        let store = MemoryRoutingStore::new();
        let record = RoutingRecord::new("d1", "hello");
        store.create_record(&record).await.unwrap();

        let mut a = record.clone();
        a.version = 2;
        let mut b = record.clone();
        b.version = 2;

        assert!(store.compare_and_update(&a).await.unwrap());
        assert!(!store.compare_and_update(&b).await.unwrap());
    }

    #[tokio::test]
    async fn rate_counter_resets_after_window() {
        let store = MemoryRoutingStore::new();
        let w1 = store.incr_rate_counter("rl:test:k", 60).await.unwrap();
        let w2 = store.incr_rate_counter("rl:test:k", 60).await.unwrap();
        assert_eq!(w1.count, 1);
        assert_eq!(w2.count, 2);
        assert!(w2.reset_at > Utc::now().timestamp());
    }
}
