// gcp/cloudbuild.rs — the build orchestrator adapter.
//
// Submits a build+deploy pipeline over the mirrored archive: fetch,
// extract, inject the container recipe (and the default python manifest
// when the archive carried none), build, push, deploy. The deployment id,
// subdomain, and secret reference ride along as substitutions so the
// webhook reconciler can resolve events back to a deployment.

use anyhow::{anyhow, bail, Context as _, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::auth::TokenProvider;
use crate::config::GcpConfig;
use crate::deploy::state::BuildEventStatus;
use crate::recipe::{Recipe, LISTEN_PORT};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-pipeline ceiling on the executor side.
const PIPELINE_TIMEOUT_SECS: u32 = 600;

pub struct BuildExecutor {
    http: reqwest::Client,
    auth: Arc<TokenProvider>,
    project: String,
    region: String,
    registry: String,
    build_source_bucket: String,
    runtime_service_account: String,
}

impl BuildExecutor {
    pub fn new(config: &GcpConfig, http: reqwest::Client, auth: Arc<TokenProvider>) -> Self {
        Self {
            http,
            auth,
            project: config.project.clone(),
            region: config.region.clone(),
            registry: config.registry.clone(),
            build_source_bucket: config.build_source_bucket.clone(),
            runtime_service_account: config.runtime_service_account.clone(),
        }
    }

    pub fn image_for(&self, subdomain: &str) -> String {
        format!("{}/{}:latest", self.registry, subdomain)
    }

    /// Submit the pipeline; returns the opaque build handle.
    pub async fn submit(
        &self,
        deployment_id: &str,
        subdomain: &str,
        secret_binding: &str,
        recipe: &Recipe,
    ) -> Result<String> {
        let token = self.auth.token().await?;
        let image = self.image_for(subdomain);
        let port = LISTEN_PORT.to_string();

        // Recipe injection overwrites any Dockerfile the archive shipped.
        let mut inject_script = format!(
            "mkdir -p /workspace/app && cat > /workspace/app/Dockerfile <<'BERTH_RECIPE_EOF'\n{}\nBERTH_RECIPE_EOF\n",
            recipe.dockerfile.trim_end()
        );
        if let Some(manifest) = recipe.default_dependency_manifest {
            inject_script.push_str(&format!(
                "if [ ! -f /workspace/app/requirements.txt ]; then cat > /workspace/app/requirements.txt <<'BERTH_REQS_EOF'\n{}\nBERTH_REQS_EOF\nfi\n",
                manifest.trim_end()
            ));
        }

        let body = json!({
            "steps": [
                {
                    "name": "gcr.io/cloud-builders/gsutil",
                    "args": ["cp", format!("gs://{}/{}/source.zip", self.build_source_bucket, deployment_id), "/workspace/source.zip"]
                },
                {
                    "name": "python:3.11-slim",
                    "entrypoint": "python",
                    "args": ["-m", "zipfile", "-e", "/workspace/source.zip", "/workspace/app"]
                },
                {
                    "name": "ubuntu",
                    "entrypoint": "bash",
                    "args": ["-c", inject_script]
                },
                {
                    "name": "gcr.io/cloud-builders/docker",
                    "args": ["build", "-t", image.as_str(), "/workspace/app"]
                },
                {
                    "name": "gcr.io/cloud-builders/docker",
                    "args": ["push", image.as_str()]
                },
                {
                    "name": "gcr.io/google.com/cloudsdktool/cloud-sdk:slim",
                    "entrypoint": "gcloud",
                    "args": [
                        "run", "deploy", subdomain,
                        "--image", image.as_str(),
                        "--region", self.region.as_str(),
                        "--platform", "managed",
                        "--memory", "512Mi",
                        "--cpu", "1",
                        "--min-instances", "0",
                        "--max-instances", "3",
                        "--timeout", "300",
                        "--port", port,
                        "--set-secrets", format!("GOOGLE_API_KEY={secret_binding}"),
                        "--service-account", self.runtime_service_account.as_str(),
                        // The proxy terminates auth; the service itself is
                        // world-invocable.
                        "--allow-unauthenticated"
                    ]
                }
            ],
            "images": [image.as_str()],
            "timeout": format!("{PIPELINE_TIMEOUT_SECS}s"),
            "substitutions": {
                "_DEPLOYMENT_ID": deployment_id,
                "_SUBDOMAIN": subdomain,
                "_SECRET_REF": secret_binding
            }
        });

        let url = format!(
            "https://cloudbuild.googleapis.com/v1/projects/{}/builds",
            self.project
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .timeout(SUBMIT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("build submit request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("build submit failed ({status}): {text}");
        }

        let operation: serde_json::Value = resp.json().await?;
        operation
            .pointer("/metadata/build/id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("build submit response carried no build id"))
    }

    /// Ground-truth build status for the convergent poller.
    pub async fn get_status(&self, build_id: &str) -> Result<Option<BuildEventStatus>> {
        let token = self.auth.token().await?;
        let url = format!(
            "https://cloudbuild.googleapis.com/v1/projects/{}/builds/{}",
            self.project, build_id
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .timeout(QUERY_TIMEOUT)
            .send()
            .await
            .context("build status request failed")?;
        if !resp.status().is_success() {
            bail!("build status query failed ({})", resp.status());
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body
            .get("status")
            .and_then(|s| s.as_str())
            .and_then(BuildEventStatus::parse))
    }
}
