// oauth.rs — federated login against the Google OAuth 2.0 endpoints.
//
// The login endpoint 302s the browser to the consent screen with an
// HMAC-signed state token (stateless CSRF protection); the callback
// verifies state, exchanges the code, fetches the user info, and hands
// the identity to the session layer.

use anyhow::{anyhow, bail, Context as _, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

use crate::config::Config;
use crate::ids;

type HmacSha256 = Hmac<Sha256>;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const STATE_TTL_SECS: i64 = 10 * 60;
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn redirect_uri(config: &Config) -> String {
    format!("{}/api/v1/auth/callback", config.api_base_url)
}

// ─── State token ──────────────────────────────────────────────────────────────

fn sign_state(payload: &str, secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("invalid signing secret"))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Mint a short-lived signed state value: `base64url(nonce:exp).sig`.
pub fn mint_state(secret: &str) -> Result<String> {
    let payload = format!(
        "{}:{}",
        ids::random_string(16),
        Utc::now().timestamp() + STATE_TTL_SECS
    );
    let sig = sign_state(&payload, secret)?;
    Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), sig))
}

pub fn verify_state(state: &str, secret: &str) -> Result<()> {
    let (payload_b64, sig_hex) = state
        .split_once('.')
        .ok_or_else(|| anyhow!("malformed state"))?;
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| anyhow!("malformed state payload"))?;
    let payload = String::from_utf8(payload_bytes).map_err(|_| anyhow!("malformed state payload"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("invalid signing secret"))?;
    mac.update(payload.as_bytes());
    let sig = hex::decode(sig_hex).map_err(|_| anyhow!("invalid state signature"))?;
    mac.verify_slice(&sig).map_err(|_| anyhow!("state signature mismatch"))?;

    let exp: i64 = payload
        .rsplit(':')
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow!("malformed state payload"))?;
    if exp <= Utc::now().timestamp() {
        bail!("state expired");
    }
    Ok(())
}

// ─── Authorization code flow ──────────────────────────────────────────────────

/// The consent-screen URL the login endpoint redirects to.
pub fn login_url(config: &Config, state: &str) -> String {
    let redirect = redirect_uri(config);
    format!(
        "{AUTH_ENDPOINT}?client_id={}&redirect_uri={}&response_type=code&scope=openid%20email%20profile&state={}&prompt=select_account",
        urlencode(&config.oauth_client_id),
        urlencode(&redirect),
        urlencode(state),
    )
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
}

/// Exchange the authorization code and fetch the federated identity.
pub async fn complete_login(
    http: &reqwest::Client,
    config: &Config,
    code: &str,
) -> Result<UserInfo> {
    let redirect = redirect_uri(config);
    let resp = http
        .post(TOKEN_ENDPOINT)
        .timeout(EXCHANGE_TIMEOUT)
        .form(&[
            ("code", code),
            ("client_id", config.oauth_client_id.as_str()),
            ("client_secret", config.oauth_client_secret.as_str()),
            ("redirect_uri", redirect.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .context("code exchange request failed")?;
    if !resp.status().is_success() {
        bail!("code exchange failed ({})", resp.status());
    }
    let tokens: TokenResponse = resp.json().await.context("malformed token response")?;

    let resp = http
        .get(USERINFO_ENDPOINT)
        .timeout(EXCHANGE_TIMEOUT)
        .bearer_auth(&tokens.access_token)
        .send()
        .await
        .context("userinfo request failed")?;
    if !resp.status().is_success() {
        bail!("userinfo fetch failed ({})", resp.status());
    }
    let info: UserInfo = resp.json().await.context("malformed userinfo response")?;
    if info.email.is_empty() {
        bail!("identity provider returned no email");
    }
    Ok(info)
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
