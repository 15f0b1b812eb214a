// gcp/storage.rs — the archive store adapter (GCS JSON API).
//
// Uploaded archives land at uploads/{deployment_id}/source.zip in the
// upload bucket; deploy-time the object is mirrored (server-side rewrite)
// to {deployment_id}/source.zip in the build executor's source bucket.

use anyhow::{bail, Context as _, Result};
use std::sync::Arc;
use std::time::Duration;

use super::auth::TokenProvider;
use crate::config::GcpConfig;

const OP_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ArchiveStore {
    http: reqwest::Client,
    auth: Arc<TokenProvider>,
    upload_bucket: String,
    build_source_bucket: String,
}

fn encode_object(name: &str) -> String {
    // Only '/' needs escaping in our object names (lowercase alnum ids).
    name.replace('/', "%2F")
}

impl ArchiveStore {
    pub fn new(config: &GcpConfig, http: reqwest::Client, auth: Arc<TokenProvider>) -> Self {
        Self {
            http,
            auth,
            upload_bucket: config.upload_bucket.clone(),
            build_source_bucket: config.build_source_bucket.clone(),
        }
    }

    fn upload_object(deployment_id: &str) -> String {
        format!("uploads/{deployment_id}/source.zip")
    }

    fn mirror_object(deployment_id: &str) -> String {
        format!("{deployment_id}/source.zip")
    }

    /// Store the uploaded archive bytes (overwrites any prior upload).
    pub async fn put_archive(&self, deployment_id: &str, bytes: Vec<u8>) -> Result<()> {
        let token = self.auth.token().await?;
        let url = format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.upload_bucket,
            encode_object(&Self::upload_object(deployment_id)),
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .timeout(OP_TIMEOUT)
            .body(bytes)
            .send()
            .await
            .context("archive upload request failed")?;
        if !resp.status().is_success() {
            bail!("archive upload failed ({})", resp.status());
        }
        Ok(())
    }

    /// Fetch the uploaded archive for analysis.
    pub async fn fetch_archive(&self, deployment_id: &str) -> Result<Vec<u8>> {
        let token = self.auth.token().await?;
        let url = format!(
            "https://storage.googleapis.com/storage/v1/b/{}/o/{}?alt=media",
            self.upload_bucket,
            encode_object(&Self::upload_object(deployment_id)),
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .timeout(OP_TIMEOUT)
            .send()
            .await
            .context("archive fetch request failed")?;
        if !resp.status().is_success() {
            bail!("archive fetch failed ({})", resp.status());
        }
        Ok(resp.bytes().await?.to_vec())
    }

    /// True when the caller has uploaded an archive for this deployment.
    pub async fn archive_exists(&self, deployment_id: &str) -> Result<bool> {
        let token = self.auth.token().await?;
        let url = format!(
            "https://storage.googleapis.com/storage/v1/b/{}/o/{}",
            self.upload_bucket,
            encode_object(&Self::upload_object(deployment_id)),
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .timeout(OP_TIMEOUT)
            .send()
            .await
            .context("archive stat request failed")?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            s => bail!("archive stat failed ({s})"),
        }
    }

    /// Server-side copy into the build executor's expected source location.
    pub async fn mirror_to_build_source(&self, deployment_id: &str) -> Result<()> {
        let token = self.auth.token().await?;
        let url = format!(
            "https://storage.googleapis.com/storage/v1/b/{}/o/{}/rewriteTo/b/{}/o/{}",
            self.upload_bucket,
            encode_object(&Self::upload_object(deployment_id)),
            self.build_source_bucket,
            encode_object(&Self::mirror_object(deployment_id)),
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .timeout(OP_TIMEOUT)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .context("archive mirror request failed")?;
        if !resp.status().is_success() {
            bail!("archive mirror failed ({})", resp.status());
        }
        // A single rewrite round-trip covers our size bound; rewrites only
        // paginate for multi-GB objects.
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        if body.get("done").and_then(|d| d.as_bool()) == Some(false) {
            bail!("archive mirror did not complete in one pass");
        }
        Ok(())
    }

    /// Delete both copies of the archive. 404s are non-fatal.
    pub async fn delete_archive(&self, deployment_id: &str) -> Result<()> {
        let token = self.auth.token().await?;
        for (bucket, object) in [
            (&self.upload_bucket, Self::upload_object(deployment_id)),
            (&self.build_source_bucket, Self::mirror_object(deployment_id)),
        ] {
            let url = format!(
                "https://storage.googleapis.com/storage/v1/b/{}/o/{}",
                bucket,
                encode_object(&object),
            );
            let resp = self
                .http
                .delete(&url)
                .bearer_auth(&token)
                .timeout(OP_TIMEOUT)
                .send()
                .await
                .context("archive delete request failed")?;
            if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
                bail!("archive delete failed ({})", resp.status());
            }
        }
        Ok(())
    }

    /// Bucket reachability probe for /health.
    pub async fn probe(&self) -> Result<()> {
        let token = self.auth.token().await?;
        let url = format!(
            "https://storage.googleapis.com/storage/v1/b/{}",
            self.upload_bucket
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .context("archive store unreachable")?;
        if !resp.status().is_success() {
            bail!("archive store probe failed ({})", resp.status());
        }
        Ok(())
    }
}
