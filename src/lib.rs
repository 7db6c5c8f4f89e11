//! TenantGate - tenant-aware data source proxy.
//!
//! Sits in front of time-series data sources (Prometheus, Loki and friends)
//! and forwards `/api/datasources/proxy/{id}/...` requests to them. Before a
//! request leaves the gateway it passes a tenant isolation check that hides
//! other tenants' namespaces from label value listings.
//!
//! # Request Path
//!
//! - **Short-circuit:** a non-admin tenant listing namespace label values gets
//!   a synthetic answer containing only its own tenant id.
//! - **Forward:** everything else is located, path-normalized and streamed to
//!   the data source.
//! - **Reject:** unknown, forbidden or unroutable data sources terminate with
//!   a JSON error body.

pub mod config;
pub mod datasource;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod isolation;
pub mod locator;
pub mod logging;
pub mod metrics;
pub mod proxy_path;
pub mod proxy_service;
pub mod reload;
pub mod tenant;
pub mod timeout;
