pub mod classifier;
pub mod config;
pub mod deploy;
pub mod error;
pub mod gcp;
pub mod http;
pub mod ids;
pub mod oauth;
pub mod proxy;
pub mod quota;
pub mod ratelimit;
pub mod recipe;
pub mod retry;
pub mod routing;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod subdomain;
pub mod upload_token;

use std::sync::Arc;

use config::Config;
use gcp::cloudbuild::BuildExecutor;
use gcp::cloudrun::RuntimeClient;
use gcp::secrets::SecretVault;
use gcp::storage::ArchiveStore;
use routing::RoutingStore;
use session::SessionManager;
use store::Storage;

/// Shared application state passed to every handler and background task.
///
/// Config is bound once at startup; everything else is an explicit
/// dependency carried here — no implicit singletons.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Relational store: users, sessions, deployment metadata.
    pub storage: Arc<Storage>,
    /// Routing ledger: deployment records + subdomain index, read on every
    /// proxied request.
    pub routing: Arc<dyn RoutingStore>,
    /// Archive store adapter (uploaded zips + build-source mirror).
    pub archives: Arc<ArchiveStore>,
    /// Per-deployment secret vault adapter.
    pub vault: Arc<SecretVault>,
    /// Build executor adapter (image build + deploy pipeline).
    pub builds: Arc<BuildExecutor>,
    /// Serverless runtime adapter (origin discovery, service deletion).
    pub runtime: Arc<RuntimeClient>,
    /// Session manager (cookie auth, rotation, cleanup).
    pub sessions: Arc<SessionManager>,
    /// Shared HTTP client for the proxy path and OAuth exchanges.
    pub http: reqwest::Client,
    pub started_at: std::time::Instant,
}
