// gcp/cloudrun.rs — the serverless runtime adapter.
//
// The deploy step itself runs inside the build pipeline; this adapter
// covers the control plane's own runtime interactions: discovering the
// origin URL once a service exists, and deleting services on
// deletion/TTL reap.

use anyhow::{bail, Context as _, Result};
use std::sync::Arc;
use std::time::Duration;

use super::auth::TokenProvider;
use crate::config::GcpConfig;

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RuntimeClient {
    http: reqwest::Client,
    auth: Arc<TokenProvider>,
    project: String,
    region: String,
}

impl RuntimeClient {
    pub fn new(config: &GcpConfig, http: reqwest::Client, auth: Arc<TokenProvider>) -> Self {
        Self {
            http,
            auth,
            project: config.project.clone(),
            region: config.region.clone(),
        }
    }

    fn service_url(&self, subdomain: &str) -> String {
        format!(
            "https://run.googleapis.com/v2/projects/{}/locations/{}/services/{}",
            self.project, self.region, subdomain
        )
    }

    /// The service's origin URL, or None while it does not exist yet.
    pub async fn service_origin(&self, subdomain: &str) -> Result<Option<String>> {
        let token = self.auth.token().await?;
        let resp = self
            .http
            .get(self.service_url(subdomain))
            .bearer_auth(&token)
            .timeout(QUERY_TIMEOUT)
            .send()
            .await
            .context("runtime query failed")?;
        match resp.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body: serde_json::Value = resp.json().await?;
                Ok(body
                    .get("uri")
                    .and_then(|u| u.as_str())
                    .filter(|u| !u.is_empty())
                    .map(str::to_string))
            }
            s => bail!("runtime query failed ({s})"),
        }
    }

    /// Delete the runtime service. A 404 (already gone, or a deployment
    /// that never reached the deploy step) is non-fatal.
    pub async fn delete_service(&self, subdomain: &str) -> Result<()> {
        let token = self.auth.token().await?;
        let resp = self
            .http
            .delete(self.service_url(subdomain))
            .bearer_auth(&token)
            .timeout(QUERY_TIMEOUT)
            .send()
            .await
            .context("runtime delete failed")?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            bail!("runtime delete failed ({})", resp.status());
        }
        Ok(())
    }
}
