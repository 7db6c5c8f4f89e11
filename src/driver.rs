//! Data source drivers.
//!
//! A driver knows how to address one kind of data source: how the forward
//! path maps onto the upstream URL and which headers the upstream expects.
//! Drivers are registered by type name at startup; the registry is read-only
//! afterwards and shared by every request.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Uri};
use tracing::warn;

use crate::datasource::DataSourceMeta;
use crate::error::GatewayError;
use crate::proxy_path::ForwardPath;

/// Type names served by [`HttpApiDriver`] out of the box.
pub const BUILTIN_TYPES: &[&str] = &["prometheus", "loki", "elasticsearch", "influxdb", "tempo"];

/// Protocol-specific handling for one data source type.
pub trait DataSourceDriver: Send + Sync {
    /// Data source type this driver serves.
    fn type_name(&self) -> &str;

    /// Build the upstream URI for a forwarded request.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidUpstreamUri`] if the data source URL
    /// cannot be combined with the forward path.
    fn upstream_uri(
        &self,
        meta: &DataSourceMeta,
        path: &ForwardPath,
        query: Option<&str>,
    ) -> Result<Uri, GatewayError>;

    /// Adjust outgoing request headers for this data source.
    fn prepare_headers(&self, meta: &DataSourceMeta, headers: &mut HeaderMap);
}

/// Driver for data sources exposing a plain HTTP API under a base URL.
#[derive(Debug, Clone)]
pub struct HttpApiDriver {
    type_name: String,
}

impl HttpApiDriver {
    /// Create a driver for `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl DataSourceDriver for HttpApiDriver {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn upstream_uri(
        &self,
        meta: &DataSourceMeta,
        path: &ForwardPath,
        query: Option<&str>,
    ) -> Result<Uri, GatewayError> {
        let mut url = url::Url::parse(&meta.url).map_err(|e| GatewayError::InvalidUpstreamUri {
            details: format!("{}: {e}", meta.url),
        })?;
        if url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUpstreamUri {
                details: format!("{} cannot be used as a base url", meta.url),
            });
        }

        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base}/{}", path.tail()));
        url.set_query(query.filter(|q| !q.is_empty()));

        Uri::try_from(url.as_str()).map_err(|e| GatewayError::InvalidUpstreamUri {
            details: format!("{url}: {e}"),
        })
    }

    fn prepare_headers(&self, meta: &DataSourceMeta, headers: &mut HeaderMap) {
        for (name, value) in &meta.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(
                    datasource_id = meta.id,
                    header = %name,
                    "Skipping invalid datasource header"
                ),
            }
        }
    }
}

/// Read-only map from data source type to driver.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn DataSourceDriver>>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with an [`HttpApiDriver`] for every built-in type.
    pub fn with_builtin_drivers() -> Self {
        BUILTIN_TYPES
            .iter()
            .fold(Self::new(), |registry, type_name| {
                registry.with_driver(Arc::new(HttpApiDriver::new(*type_name)))
            })
    }

    /// Register `driver` under its type name, replacing any previous entry.
    pub fn with_driver(mut self, driver: Arc<dyn DataSourceDriver>) -> Self {
        self.drivers.insert(driver.type_name().to_string(), driver);
        self
    }

    /// Look up the driver for `type_name`.
    pub fn driver_for(&self, type_name: &str) -> Option<Arc<dyn DataSourceDriver>> {
        self.drivers.get(type_name).cloned()
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
