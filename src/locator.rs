//! Data source location.
//!
//! Resolves a data source id to its metadata and driver. Metadata comes from
//! the [`DataSourceCache`]; the driver comes from the [`DriverRegistry`] by the
//! metadata's type name.

use std::sync::Arc;

use tracing::warn;

use crate::datasource::{CallerIdentity, DataSourceCache, DataSourceMeta};
use crate::driver::{DataSourceDriver, DriverRegistry};
use crate::error::GatewayError;

/// A resolved data source and the driver that talks to it.
#[derive(Clone)]
pub struct Located {
    /// Data source metadata
    pub meta: Arc<DataSourceMeta>,
    /// Driver for `meta.type_name`
    pub driver: Arc<dyn DataSourceDriver>,
}

/// Resolves data source ids for the dispatch gateway.
#[derive(Clone)]
pub struct DataSourceLocator {
    cache: Arc<dyn DataSourceCache>,
    drivers: Arc<DriverRegistry>,
}

impl DataSourceLocator {
    /// Create a locator over a metadata cache and driver registry.
    pub fn new(cache: Arc<dyn DataSourceCache>, drivers: Arc<DriverRegistry>) -> Self {
        Self { cache, drivers }
    }

    /// Resolve `id` on behalf of `caller`.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::AccessDenied`] if the caller may not use the data source
    /// - [`GatewayError::DataSourceLookup`] for any other metadata failure
    /// - [`GatewayError::DriverNotFound`] if no driver serves the data source type
    pub async fn locate(
        &self,
        id: i64,
        caller: &CallerIdentity,
        skip_cache: bool,
    ) -> Result<Located, GatewayError> {
        let meta = self
            .cache
            .get_datasource(id, caller, skip_cache)
            .await
            .map_err(|e| {
                warn!(datasource_id = id, caller = %caller, error = %e, "Datasource lookup failed");
                GatewayError::from(e)
            })?;

        let Some(driver) = self.drivers.driver_for(&meta.type_name) else {
            warn!(
                datasource_id = id,
                type_name = %meta.type_name,
                "No driver registered for datasource type"
            );
            return Err(GatewayError::DriverNotFound {
                type_name: meta.type_name.clone(),
            });
        };

        Ok(Located { meta, driver })
    }
}
