// upload_token.rs — HMAC-signed upload capability tokens.
//
// Format: "base64url(payload).hex(HMAC-SHA256(payload, secret))" where
// payload is the JSON {deployment_id, filename, exp}. The token is minted
// by /prepare and consumed by PUT /upload/{deployment_id}. Reuse within
// the expiry window is accepted — the archive store overwrites.

use anyhow::{anyhow, bail, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadClaims {
    pub deployment_id: String,
    pub filename: String,
    /// Unix seconds.
    pub exp: i64,
}

fn sign(payload: &[u8], secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("invalid signing secret"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Mint a token for the given deployment, valid for `ttl_secs`.
pub fn mint(deployment_id: &str, filename: &str, ttl_secs: i64, secret: &str) -> Result<String> {
    let claims = UploadClaims {
        deployment_id: deployment_id.to_string(),
        filename: filename.to_string(),
        exp: Utc::now().timestamp() + ttl_secs,
    };
    let payload = serde_json::to_vec(&claims)?;
    let sig = sign(&payload, secret)?;
    Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), sig))
}

/// Verify a token against the current secret and the deployment id from the
/// request path. Returns the claims on success.
pub fn verify(token: &str, expected_deployment_id: &str, secret: &str) -> Result<UploadClaims> {
    let (payload_b64, sig_hex) = token
        .split_once('.')
        .ok_or_else(|| anyhow!("malformed upload token"))?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| anyhow!("malformed upload token payload"))?;

    // Constant-time comparison via the Mac verify path.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("invalid signing secret"))?;
    mac.update(&payload);
    let sig_bytes = hex::decode(sig_hex).map_err(|_| anyhow!("invalid token signature hex"))?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| anyhow!("upload token signature invalid"))?;

    let claims: UploadClaims =
        serde_json::from_slice(&payload).map_err(|_| anyhow!("invalid upload token payload"))?;

    if claims.exp <= Utc::now().timestamp() {
        bail!("upload token expired");
    }
    if claims.deployment_id != expected_deployment_id {
        bail!("upload token does not match deployment");
    }
    Ok(claims)
}
