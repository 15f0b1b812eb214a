// gcp/secrets.rs — the credential vault adapter (Secret Manager).
//
// One secret per deployment, named gemini-api-key-{deployment_id}. Store
// is idempotent on the secret resource and always adds a fresh version;
// the control plane never reads the value back after store.

use anyhow::{bail, Context as _, Result};
use base64::Engine as _;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::auth::TokenProvider;
use crate::config::GcpConfig;

const OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Minimum / maximum accepted key lengths; a character-class check is the
/// only other validation. A semantically invalid key yields a degraded app
/// at runtime, by contract.
pub const MIN_KEY_LEN: usize = 20;
pub const MAX_KEY_LEN: usize = 100;

/// Validate the shape of a user-provided API key.
pub fn validate_user_key(key: &str) -> Result<(), String> {
    if key.len() < MIN_KEY_LEN || key.len() > MAX_KEY_LEN {
        return Err(format!(
            "api_key must be between {MIN_KEY_LEN} and {MAX_KEY_LEN} characters"
        ));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err("api_key contains invalid characters".to_string());
    }
    Ok(())
}

/// Opaque reference the runtime resolves for its environment binding.
#[derive(Debug, Clone)]
pub struct SecretReference {
    pub secret_name: String,
    pub version: &'static str,
}

impl SecretReference {
    /// `name:version` form consumed by the deploy step.
    pub fn binding(&self) -> String {
        format!("{}:{}", self.secret_name, self.version)
    }
}

pub struct SecretVault {
    http: reqwest::Client,
    auth: Arc<TokenProvider>,
    project: String,
}

fn secret_name(deployment_id: &str) -> String {
    format!("gemini-api-key-{deployment_id}")
}

impl SecretVault {
    pub fn new(config: &GcpConfig, http: reqwest::Client, auth: Arc<TokenProvider>) -> Self {
        Self {
            http,
            auth,
            project: config.project.clone(),
        }
    }

    /// Store the secret for a deployment and return its reference.
    ///
    /// Creating the secret resource is idempotent (409 means it already
    /// exists); a new version is always added.
    pub async fn store(&self, deployment_id: &str, secret_value: &str) -> Result<SecretReference> {
        let token = self.auth.token().await?;
        let name = secret_name(deployment_id);

        let create_url = format!(
            "https://secretmanager.googleapis.com/v1/projects/{}/secrets?secretId={}",
            self.project, name
        );
        let resp = self
            .http
            .post(&create_url)
            .bearer_auth(&token)
            .timeout(OP_TIMEOUT)
            .json(&json!({ "replication": { "automatic": {} } }))
            .send()
            .await
            .context("secret create request failed")?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::CONFLICT {
            bail!("secret create failed ({})", resp.status());
        }

        let add_url = format!(
            "https://secretmanager.googleapis.com/v1/projects/{}/secrets/{}:addVersion",
            self.project, name
        );
        let payload = base64::engine::general_purpose::STANDARD.encode(secret_value.as_bytes());
        let resp = self
            .http
            .post(&add_url)
            .bearer_auth(&token)
            .timeout(OP_TIMEOUT)
            .json(&json!({ "payload": { "data": payload } }))
            .send()
            .await
            .context("secret version request failed")?;
        if !resp.status().is_success() {
            bail!("secret version add failed ({})", resp.status());
        }

        Ok(SecretReference {
            secret_name: name,
            version: "latest",
        })
    }

    /// Remove the secret. Called as the compensating action on deploy
    /// failure and on deletion/TTL reap; a missing secret is not an error.
    pub async fn destroy(&self, deployment_id: &str) -> Result<()> {
        let token = self.auth.token().await?;
        let url = format!(
            "https://secretmanager.googleapis.com/v1/projects/{}/secrets/{}",
            self.project,
            secret_name(deployment_id)
        );
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&token)
            .timeout(OP_TIMEOUT)
            .send()
            .await
            .context("secret delete request failed")?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            bail!("secret delete failed ({})", resp.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation_bounds() {
        assert!(validate_user_key(&"a".repeat(19)).is_err());
        assert!(validate_user_key(&"a".repeat(20)).is_ok());
        assert!(validate_user_key(&"a".repeat(100)).is_ok());
        assert!(validate_user_key(&"a".repeat(101)).is_err());
    }

    #[test]
    fn key_validation_character_class() {
        assert!(validate_user_key("AIzaSyA-valid_key-0123456789012345678").is_ok());
        assert!(validate_user_key("bad key with spaces 12345").is_err());
        assert!(validate_user_key("bad!key@with#symbols12345").is_err());
    }

    #[test]
    fn secret_names_embed_the_deployment_id() {
        assert_eq!(secret_name("abc123"), "gemini-api-key-abc123");
    }

    #[test]
    fn binding_is_name_colon_version() {
        let r = SecretReference {
            secret_name: "gemini-api-key-abc".into(),
            version: "latest",
        };
        assert_eq!(r.binding(), "gemini-api-key-abc:latest");
    }
}
