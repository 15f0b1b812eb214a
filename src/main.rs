use anyhow::{Context as _, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use berthd::config::{Config, RoutingBackend};
use berthd::gcp::auth::TokenProvider;
use berthd::gcp::cloudbuild::BuildExecutor;
use berthd::gcp::cloudrun::RuntimeClient;
use berthd::gcp::secrets::SecretVault;
use berthd::gcp::storage::ArchiveStore;
use berthd::routing::memory::MemoryRoutingStore;
use berthd::routing::redis::RedisRoutingStore;
use berthd::routing::RoutingStore;
use berthd::session::SessionManager;
use berthd::store::Storage;
use berthd::{error, http, scheduler, AppContext};

#[derive(Parser)]
#[command(name = "berthd", about = "Berth — deployment control plane daemon", version)]
struct Args {
    /// HTTP listen port
    #[arg(long, env = "BERTHD_PORT")]
    port: Option<u16>,

    /// Data directory for the SQLite database and config.toml
    #[arg(long, env = "BERTHD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level filter, e.g. "info" or "debug,berthd=trace"
    #[arg(long, env = "BERTHD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "BERTHD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Routing ledger backend: "redis" (default) or "memory" (dev only)
    #[arg(long, env = "ROUTING_BACKEND")]
    routing: Option<RoutingBackend>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log.clone().unwrap_or_else(|| "info".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref());

    info!(version = env!("CARGO_PKG_VERSION"), "berthd starting");

    let config = Arc::new(
        Config::load(args.port, args.data_dir, args.log, args.routing)
            .context("configuration error")?,
    );
    error::set_production(config.is_production());
    info!(
        apex = %config.apex_domain,
        environment = %config.environment,
        port = config.port,
        data_dir = %config.data_dir.display(),
        "config loaded"
    );

    let storage = Arc::new(Storage::new(&config.data_dir).await?);

    let routing: Arc<dyn RoutingStore> = match config.routing_backend {
        RoutingBackend::Redis => Arc::new(
            RedisRoutingStore::connect(&config.redis_url)
                .await
                .context("routing ledger connection failed")?,
        ),
        RoutingBackend::Memory => {
            warn!("using the in-memory routing ledger; state will not survive a restart");
            Arc::new(MemoryRoutingStore::new())
        }
    };

    // One client for everything outbound. Redirects never follow — the
    // proxy passes them through to the browser untouched.
    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()
        .context("http client construction failed")?;

    let gcp_auth = Arc::new(
        TokenProvider::new(&config.gcp.service_account_json, http_client.clone())
            .context("service account key rejected")?,
    );
    let archives = Arc::new(ArchiveStore::new(
        &config.gcp,
        http_client.clone(),
        gcp_auth.clone(),
    ));
    let vault = Arc::new(SecretVault::new(
        &config.gcp,
        http_client.clone(),
        gcp_auth.clone(),
    ));
    let builds = Arc::new(BuildExecutor::new(
        &config.gcp,
        http_client.clone(),
        gcp_auth.clone(),
    ));
    let runtime = Arc::new(RuntimeClient::new(
        &config.gcp,
        http_client.clone(),
        gcp_auth,
    ));

    let sessions = Arc::new(SessionManager::new(
        storage.clone(),
        config.sessions.clone(),
        config.is_production(),
    ));

    let ctx = AppContext {
        config,
        storage,
        routing,
        archives,
        vault,
        builds,
        runtime,
        sessions,
        http: http_client,
        started_at: std::time::Instant::now(),
    };

    tokio::spawn(scheduler::run(ctx.clone()));

    http::serve(ctx).await
}

/// Initialize the tracing subscriber. If `log_file` is set, logs go to
/// both stdout and a daily-rolling file; the returned guard must stay
/// alive for the process lifetime.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("berthd.log"));

        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            tracing_subscriber::fmt()
                .with_env_filter(log_level)
                .compact()
                .init();
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(log_level))
            .with(tracing_subscriber::fmt::layer().compact())
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .init();

        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .init();
        None
    }
}
