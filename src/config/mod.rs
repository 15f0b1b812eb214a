// config/mod.rs — process-wide configuration, bound once at startup.
//
// Priority: CLI / env var  >  TOML ({data_dir}/config.toml)  >  built-in default.
// Secrets (signing secret, OAuth client secret, service-account key) come
// from the environment only and never from the TOML file.

use anyhow::{bail, Context as _, Result};
use base64::Engine as _;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_FREE_MAX_DEPLOYMENTS: u32 = 3;
const DEFAULT_PRO_MAX_DEPLOYMENTS: u32 = 10;
const DEFAULT_DEPLOYMENTS_PER_PACK: u32 = 5;
const DEFAULT_FREE_TTL_HOURS: i64 = 72;
const DEFAULT_SESSION_DURATION_HOURS: i64 = 7 * 24;
const DEFAULT_ROTATION_INTERVAL_HOURS: i64 = 24;
const DEFAULT_ABSOLUTE_CEILING_HOURS: i64 = 30 * 24;
const DEFAULT_UPLOAD_URL_TTL_SECS: i64 = 15 * 60;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_PROXY_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TRUSTED_IP_HEADER: &str = "x-forwarded-for";

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
#[derive(Deserialize, Default)]
struct TomlConfig {
    port: Option<u16>,
    log: Option<String>,
    redis_url: Option<String>,
    reaper_interval_secs: Option<u64>,
    upload_url_ttl_secs: Option<i64>,
    proxy_upstream_timeout_secs: Option<u64>,
    trusted_ip_header: Option<String>,
    free_max_deployments: Option<u32>,
    pro_max_deployments: Option<u32>,
    deployments_per_pack: Option<u32>,
    free_ttl_hours: Option<i64>,
    session_duration_hours: Option<i64>,
    session_rotation_interval_hours: Option<i64>,
    session_absolute_ceiling_hours: Option<i64>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── Sub-configs ──────────────────────────────────────────────────────────────

/// Which routing-ledger backend to use. Memory exists for tests and local
/// development; production runs Redis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingBackend {
    Redis,
    Memory,
}

impl std::str::FromStr for RoutingBackend {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown routing backend '{other}' (expected 'redis' or 'memory')"),
        }
    }
}

/// External build/runtime/vault/archive plumbing. All values resolve at
/// startup; the service-account JSON arrives base64-encoded in the
/// environment and is decoded here exactly once.
#[derive(Debug, Clone)]
pub struct GcpConfig {
    /// Decoded service-account key JSON.
    pub service_account_json: String,
    pub project: String,
    pub region: String,
    /// Bucket receiving client uploads (`uploads/{deployment_id}/source.zip`).
    pub upload_bucket: String,
    /// Bucket the build executor reads from (`{deployment_id}/source.zip`).
    pub build_source_bucket: String,
    /// Image registry prefix, e.g. `us-central1-docker.pkg.dev/proj/apps`.
    pub registry: String,
    /// Identity the deployed runtime service runs as.
    pub runtime_service_account: String,
}

#[derive(Debug, Clone)]
pub struct QuotaConfig {
    pub free_max_deployments: u32,
    pub pro_max_deployments: u32,
    pub deployments_per_pack: u32,
    pub free_ttl_hours: i64,
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub duration_hours: i64,
    pub rotation_interval_hours: i64,
    /// Sessions older than this never authenticate, regardless of rotation.
    pub absolute_ceiling_hours: i64,
}

// ─── Config ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log: String,
    /// Environment label: "production" hides error detail and marks cookies
    /// Secure; anything else is treated as non-production.
    pub environment: String,

    /// Registrable domain under which deployments receive subdomains.
    pub apex_domain: String,
    /// Base URL of the API host (upload capability URLs are minted against it).
    pub api_base_url: String,
    /// Where the browser client lives; OAuth callback redirects land here.
    pub frontend_url: String,
    /// Exact-match CORS origin allowlist. The first entry is the fallback
    /// `Access-Control-Allow-Origin` for non-allowlisted origins.
    pub allowed_origins: Vec<String>,

    /// HMAC key for upload capability tokens and OAuth state tokens.
    pub signing_secret: String,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    /// Shared secret for billing webhook signature verification.
    pub billing_webhook_secret: Option<String>,
    pub billing_pro_price_id: Option<String>,
    pub billing_pack_price_id: Option<String>,
    /// Optional shared token required on the build webhook endpoint.
    pub build_webhook_token: Option<String>,
    /// Email granted the super_admin role on login.
    pub super_admin_email: Option<String>,

    pub redis_url: String,
    pub routing_backend: RoutingBackend,
    pub gcp: GcpConfig,
    pub quotas: QuotaConfig,
    pub sessions: SessionPolicy,

    pub upload_url_ttl_secs: i64,
    pub reaper_interval_secs: u64,
    pub proxy_upstream_timeout_secs: u64,
    /// Ingress-provided client IP header (rate-limit keying, X-Real-IP).
    pub trusted_ip_header: String,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn require_env(name: &str) -> Result<String> {
    env_var(name).with_context(|| format!("required environment variable {name} is not set"))
}

impl Config {
    /// Build config from CLI args + environment + optional TOML file.
    pub fn load(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        routing_backend: Option<RoutingBackend>,
    ) -> Result<Self> {
        let data_dir = data_dir
            .or_else(|| env_var("BERTHD_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(".berthd"));

        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port
            .or_else(|| env_var("BERTHD_PORT").and_then(|v| v.parse().ok()))
            .or(toml.port)
            .unwrap_or(DEFAULT_PORT);
        let log = log
            .or_else(|| env_var("BERTHD_LOG"))
            .or(toml.log)
            .unwrap_or_else(|| "info".to_string());
        let environment = env_var("BERTHD_ENV").unwrap_or_else(|| "production".to_string());

        let apex_domain = require_env("APEX_DOMAIN")?;
        let api_base_url =
            env_var("API_BASE_URL").unwrap_or_else(|| format!("https://api.{apex_domain}"));
        let frontend_url =
            env_var("FRONTEND_URL").unwrap_or_else(|| format!("https://{apex_domain}"));

        let allowed_origins: Vec<String> = env_var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().trim_end_matches('/').to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec![frontend_url.clone()]);
        if allowed_origins.is_empty() {
            bail!("ALLOWED_ORIGINS resolved to an empty list");
        }

        let signing_secret = require_env("API_SIGNING_SECRET")?;
        if signing_secret.len() < 32 {
            bail!("API_SIGNING_SECRET must be at least 32 characters");
        }

        let service_account_json = {
            let b64 = require_env("GCP_SERVICE_ACCOUNT")?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64.trim())
                .context("GCP_SERVICE_ACCOUNT is not valid base64")?;
            String::from_utf8(bytes).context("GCP_SERVICE_ACCOUNT did not decode to UTF-8")?
        };
        let project = require_env("GCP_PROJECT")?;
        let region = env_var("GCP_REGION").unwrap_or_else(|| "us-central1".to_string());
        let upload_bucket =
            env_var("UPLOAD_BUCKET").unwrap_or_else(|| format!("{project}-uploads"));
        let build_source_bucket =
            env_var("BUILD_SOURCE_BUCKET").unwrap_or_else(|| format!("{project}-build-sources"));
        let registry = env_var("CONTAINER_REGISTRY")
            .unwrap_or_else(|| format!("{region}-docker.pkg.dev/{project}/apps"));
        let runtime_service_account = env_var("RUNTIME_SERVICE_ACCOUNT")
            .unwrap_or_else(|| format!("berth-runtime@{project}.iam.gserviceaccount.com"));

        let routing_backend = routing_backend
            .or_else(|| env_var("ROUTING_BACKEND").and_then(|v| v.parse().ok()))
            .unwrap_or(RoutingBackend::Redis);

        Ok(Self {
            port,
            data_dir,
            log,
            environment,
            apex_domain,
            api_base_url,
            frontend_url,
            allowed_origins,
            signing_secret,
            oauth_client_id: require_env("OAUTH_CLIENT_ID")?,
            oauth_client_secret: require_env("OAUTH_CLIENT_SECRET")?,
            billing_webhook_secret: env_var("BILLING_WEBHOOK_SECRET"),
            billing_pro_price_id: env_var("BILLING_PRO_PRICE_ID"),
            billing_pack_price_id: env_var("BILLING_PACK_PRICE_ID"),
            build_webhook_token: env_var("BUILD_WEBHOOK_TOKEN"),
            super_admin_email: env_var("SUPER_ADMIN_EMAIL"),
            redis_url: env_var("REDIS_URL")
                .or(toml.redis_url)
                .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            routing_backend,
            gcp: GcpConfig {
                service_account_json,
                project,
                region,
                upload_bucket,
                build_source_bucket,
                registry,
                runtime_service_account,
            },
            quotas: QuotaConfig {
                free_max_deployments: toml
                    .free_max_deployments
                    .unwrap_or(DEFAULT_FREE_MAX_DEPLOYMENTS),
                pro_max_deployments: toml
                    .pro_max_deployments
                    .unwrap_or(DEFAULT_PRO_MAX_DEPLOYMENTS),
                deployments_per_pack: toml
                    .deployments_per_pack
                    .unwrap_or(DEFAULT_DEPLOYMENTS_PER_PACK),
                free_ttl_hours: toml.free_ttl_hours.unwrap_or(DEFAULT_FREE_TTL_HOURS),
            },
            sessions: SessionPolicy {
                duration_hours: toml
                    .session_duration_hours
                    .unwrap_or(DEFAULT_SESSION_DURATION_HOURS),
                rotation_interval_hours: toml
                    .session_rotation_interval_hours
                    .unwrap_or(DEFAULT_ROTATION_INTERVAL_HOURS),
                absolute_ceiling_hours: toml
                    .session_absolute_ceiling_hours
                    .unwrap_or(DEFAULT_ABSOLUTE_CEILING_HOURS),
            },
            upload_url_ttl_secs: toml
                .upload_url_ttl_secs
                .unwrap_or(DEFAULT_UPLOAD_URL_TTL_SECS),
            reaper_interval_secs: toml
                .reaper_interval_secs
                .unwrap_or(DEFAULT_REAPER_INTERVAL_SECS),
            proxy_upstream_timeout_secs: toml
                .proxy_upstream_timeout_secs
                .unwrap_or(DEFAULT_PROXY_UPSTREAM_TIMEOUT_SECS),
            trusted_ip_header: toml
                .trusted_ip_header
                .unwrap_or_else(|| DEFAULT_TRUSTED_IP_HEADER.to_string()),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Hosts that enter the API path rather than the wildcard proxy.
    pub fn is_api_host(&self, host: &str) -> bool {
        host == self.apex_domain
            || host == format!("www.{}", self.apex_domain)
            || host == format!("api.{}", self.apex_domain)
            || host == "localhost"
            || host == "127.0.0.1"
    }
}
