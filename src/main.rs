use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pagecap::auth::AuthState;
use pagecap::cache::ResponseCache;
use pagecap::{build_router, AppState, CompletionRegistry, Dispatcher, HtmlEngine, ServerConfig};

const REALM: &str = concat!("pagecap/", env!("CARGO_PKG_VERSION"));

// Extra time an unconsumed result may outlive the wait deadline before the
// sweep reclaims it.
const RECLAIM_MARGIN: Duration = Duration::from_secs(5);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "pagecap", version, about = "Render web pages to images over HTTP")]
struct Args {
    /// Bind address
    #[arg(long = "bind-addr", default_value = "127.0.0.1:55888")]
    bind_addr: String,

    /// Path to log file, if empty logs to stderr
    #[arg(long = "log-file")]
    log_file: Option<std::path::PathBuf>,

    /// Response cache capacity in entries, 0 disables caching
    #[arg(long = "cache-size", default_value_t = 0)]
    cache_size: usize,

    /// Path to credential file (user:sha256hex per line), if empty auth is disabled
    #[arg(long = "htpasswd-file")]
    htpasswd_file: Option<std::path::PathBuf>,

    /// Cache maximum age (seconds)
    #[arg(long = "max-age", default_value_t = 86400)]
    max_age: u64,

    /// Read timeout (seconds)
    #[arg(long = "read-timeout", default_value_t = 5)]
    read_timeout: u64,

    /// Write timeout (seconds)
    #[arg(long = "write-timeout", default_value_t = 15)]
    write_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Arc::new(ServerConfig {
        bind: args.bind_addr,
        read_timeout_secs: args.read_timeout,
        write_timeout_secs: args.write_timeout,
        max_age_secs: args.max_age,
        cache_entries: args.cache_size,
        htpasswd: args.htpasswd_file,
        log_file: args.log_file,
    });

    init_logging(&config)?;

    let registry = CompletionRegistry::new(config.wait_deadline() + RECLAIM_MARGIN);
    registry.spawn_sweeper(SWEEP_INTERVAL);

    let load_timeout = Duration::from_secs(config.read_timeout_secs);
    let dispatcher = Dispatcher::spawn(move || HtmlEngine::new(load_timeout), registry.clone())
        .await
        .context("failed to start render worker")?;

    let auth = AuthState::disabled();
    auth.reload(config.htpasswd.as_deref(), REALM)
        .context("failed to load credentials")?;
    spawn_auth_reload(auth.clone(), config.clone());

    let cache = config
        .cache_enabled()
        .then(|| ResponseCache::new(config.cache_entries, Duration::from_secs(config.max_age_secs)));

    let state = AppState {
        dispatcher,
        registry,
        config: config.clone(),
        auth,
        cache,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(bind = %config.bind, "listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_logging(config: &ServerConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

// SIGHUP re-reads the credential file without a restart.
#[cfg(unix)]
fn spawn_auth_reload(auth: AuthState, config: Arc<ServerConfig>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, "failed to install SIGHUP handler");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            match auth.reload(config.htpasswd.as_deref(), REALM) {
                Ok(()) => info!("credentials reloaded"),
                Err(err) => error!(error = %err, "credential reload failed"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_auth_reload(_auth: AuthState, _config: Arc<ServerConfig>) {}
