use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio::net::TcpListener;

use chaos_proxy::admin::AdminState;
use chaos_proxy::api;
use chaos_proxy::auth::ApiKeyAuth;
use chaos_proxy::config::Settings;
use chaos_proxy::engine::ChaosEngine;
use chaos_proxy::observer::{LogSink, MemoryLogSink, RequestObserver};
use chaos_proxy::proxy::{NoHijack, ProxyState};
use chaos_proxy::store::ConfigStore;

#[derive(Clone, Debug, Parser)]
#[command(name = "chaos-proxy", about = "Chaos-injecting HTTP reverse proxy")]
pub struct Cli {
    /// Port to listen on; overrides the PORT environment variable.
    #[arg(long, short)]
    port: Option<u16>,
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn memory_backend(settings: &Settings) -> (Arc<dyn ConfigStore>, Arc<dyn LogSink>) {
    (
        Arc::new(chaos_proxy::store::MemoryStore::new()),
        Arc::new(MemoryLogSink::new(settings.log_capacity)),
    )
}

#[cfg(feature = "redis")]
async fn build_backend(
    settings: &Settings,
) -> Result<(Arc<dyn ConfigStore>, Arc<dyn LogSink>), chaos_proxy::StoreError> {
    use chaos_proxy::redis_store::{RedisLogSink, RedisStore};

    match &settings.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url).await?;
            let sink = RedisLogSink::new(store.connection());
            info!("using redis storage at {}", url);
            Ok((Arc::new(store), Arc::new(sink)))
        }
        None => Ok(memory_backend(settings)),
    }
}

#[cfg(not(feature = "redis"))]
async fn build_backend(
    settings: &Settings,
) -> Result<(Arc<dyn ConfigStore>, Arc<dyn LogSink>), chaos_proxy::StoreError> {
    if settings.redis_url.is_some() {
        warn!("REDIS_URL is set but this build lacks the redis feature; using in-memory storage");
    }
    Ok(memory_backend(settings))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    SimpleLogger::new().with_level(cli.log_level).init()?;

    let mut settings = Settings::from_env();
    if let Some(port) = cli.port {
        settings.port = port;
    }
    let settings = Arc::new(settings);

    info!("starting chaos proxy");

    let (store, sink) = build_backend(&settings).await?;

    let auth = ApiKeyAuth::new(settings.api_keys.clone());
    if auth.enabled() {
        info!("authentication enabled for admin API");
    } else {
        warn!("admin API authentication disabled; set CHAOS_API_KEYS to secure it");
    }

    let engine = Arc::new(ChaosEngine::new());
    let observer = RequestObserver::spawn(sink.clone(), settings.observer_queue);
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let proxy = ProxyState {
        store: store.clone(),
        engine,
        client,
        log_tx: observer.sender(),
        hijacker: Arc::new(NoHijack),
        settings: settings.clone(),
    };
    let admin = AdminState { store, sink };

    let app = api::app(proxy, admin, auth);
    let listener = TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!("server listening on port {}", settings.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped gracefully");
    Ok(())
}
