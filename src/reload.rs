//! Live configuration reload.
//!
//! A reload re-reads the configuration file and the environment, then swaps
//! in the new isolation snapshot, replaces the data source set and empties the
//! metadata cache. A configuration that fails to load or validate leaves the
//! running state untouched.
//!
//! Upstream timeouts and the caller header are fixed at startup.
//!
//! The isolation environment variables are re-applied on every reload. The
//! process environment cannot change after start, so while
//! `TENANT_HEADER_NAME` or `ADMIN_TENANT_HEADER_NAME` is set, the matching
//! `isolation:` field of the file has no effect; each reload logs a warning
//! naming the variable that shadows a file value.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigError, GatewayConfig, SharedIsolation};
use crate::datasource::{CachingDataSourceService, StaticDataSourceStore};

/// Metadata cache over the configured data source set.
pub type ConfiguredDataSources = CachingDataSourceService<Arc<StaticDataSourceStore>>;

/// Handles onto the reloadable parts of a running gateway.
#[derive(Clone)]
pub struct Reloader {
    path: Option<PathBuf>,
    isolation: SharedIsolation,
    store: Arc<StaticDataSourceStore>,
    cache: Arc<ConfiguredDataSources>,
}

impl Reloader {
    /// Create a reloader reading from `path` (defaults plus environment when `None`).
    pub fn new(
        path: Option<PathBuf>,
        isolation: SharedIsolation,
        store: Arc<StaticDataSourceStore>,
        cache: Arc<ConfiguredDataSources>,
    ) -> Self {
        Self {
            path,
            isolation,
            store,
            cache,
        }
    }

    /// Load configuration and apply it.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot be loaded; nothing is changed.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let config = GatewayConfig::load(self.path.as_deref())?;
        self.apply(config);
        Ok(())
    }

    /// Publish an already validated configuration.
    pub fn apply(&self, config: GatewayConfig) {
        let GatewayConfig {
            isolation,
            datasources,
            ..
        } = config;

        self.isolation.store(Arc::new(isolation));
        self.store.replace(datasources);
        self.cache.invalidate_all();

        info!(datasources = self.store.len(), "Configuration reloaded");
    }

    /// Reload on every SIGHUP until `shutdown` is cancelled.
    #[cfg(unix)]
    pub async fn run_on_hangup(self, shutdown: CancellationToken) {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGHUP, live reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                }
            }

            if let Err(e) = self.reload() {
                warn!(error = %e, "Configuration reload failed, keeping previous configuration");
            }
        }
    }
}
