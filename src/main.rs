//! TenantGate server binary.
//!
//! # Environment Variables
//!
//! - `TENANTGATE_LISTEN`: listen address (default `0.0.0.0:3100`)
//! - `TENANTGATE_CONFIG`: optional YAML configuration file
//! - `TENANTGATE_LOG_FORMAT`: `pretty` or `json`
//! - `TENANT_HEADER_NAME` / `ADMIN_TENANT_HEADER_NAME`: isolation settings
//! - `RUST_LOG`: log filter
//!
//! Sending SIGHUP reloads the configuration file.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tenantgate::config::GatewayConfig;
use tenantgate::datasource::{CachingDataSourceService, DataSourceCache, StaticDataSourceStore};
use tenantgate::dispatch::{DispatchGateway, router};
use tenantgate::driver::DriverRegistry;
use tenantgate::locator::DataSourceLocator;
use tenantgate::logging::{LogFormat, init_tracing};
use tenantgate::metrics::GatewayMetrics;
use tenantgate::proxy_service::HttpProxyExecutor;
use tenantgate::reload::Reloader;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Tenant-aware data source proxy.
#[derive(Debug, Parser)]
#[command(name = "tenantgate", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "TENANTGATE_LISTEN", default_value = "0.0.0.0:3100")]
    listen: SocketAddr,

    /// YAML configuration file
    #[arg(long, env = "TENANTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "TENANTGATE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    // Only fails if a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = GatewayConfig::load(cli.config.as_deref()).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;
    info!(
        datasources = config.datasources.len(),
        tenant_header = %config.isolation.tenant_header,
        isolation_enabled = !config.isolation.tenant_header.is_empty(),
        "Configuration loaded"
    );

    let isolation = config.isolation.clone().into_shared();
    let store = Arc::new(StaticDataSourceStore::new(config.datasources.clone()));
    if store.is_empty() {
        warn!("No datasources configured, every datasource lookup will fail");
    }
    let cache = Arc::new(CachingDataSourceService::new(
        Arc::clone(&store),
        config.cache.ttl,
    ));
    let drivers = Arc::new(DriverRegistry::with_builtin_drivers());
    info!(drivers = ?drivers.type_names(), "Datasource drivers registered");
    let locator = DataSourceLocator::new(Arc::clone(&cache) as Arc<dyn DataSourceCache>, drivers);
    let executor = Arc::new(HttpProxyExecutor::new(&config.upstream));

    let mut gateway = DispatchGateway::new(Arc::clone(&isolation), locator, executor);
    if cfg!(feature = "metrics") {
        gateway = gateway.with_metrics(Arc::new(GatewayMetrics::new()?));
    }
    let app = router(Arc::new(gateway), &config.auth);

    let shutdown = CancellationToken::new();

    #[cfg(unix)]
    tokio::spawn(
        Reloader::new(cli.config.clone(), isolation, store, cache).run_on_hangup(shutdown.clone()),
    );
    #[cfg(not(unix))]
    let _ = Reloader::new(cli.config.clone(), isolation, store, cache);

    let listener = TcpListener::bind(cli.listen).await.map_err(|e| {
        error!(listen = %cli.listen, error = %e, "Failed to bind listener");
        e
    })?;
    info!(listen = %cli.listen, "TenantGate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            e
        })?;

    info!("TenantGate stopped");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM, then cancel `token`.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, draining connections");
    token.cancel();
}
