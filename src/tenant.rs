//! Tenant resolution.
//!
//! The caller's tenant is read from the request header named by
//! [`IsolationSettings::tenant_header`] and lower-cased. The admin tenant is
//! taken from the settings snapshot exactly as stored.
//!
//! Resolution never fails. Anything that prevents reading a tenant (no header
//! name configured, header name not a valid HTTP token, header missing, value
//! not UTF-8) yields the empty tenant.

use std::fmt;

use axum::http::{HeaderMap, HeaderName};
use tracing::debug;

use crate::config::IsolationSettings;

/// Lower-cased tenant identifier asserted by a caller.
///
/// The empty identifier means no tenant was asserted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    /// Normalize a raw header value into a tenant identifier.
    pub fn from_raw(raw: &str) -> Self {
        Self(raw.to_lowercase())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if no tenant was asserted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume into the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant identifiers resolved for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTenants {
    /// Calling tenant, lower-cased
    pub tenant: TenantId,
    /// Admin tenant, as configured
    pub admin_tenant: String,
}

/// Resolve the calling and admin tenants for a request.
pub fn resolve(headers: &HeaderMap, settings: &IsolationSettings) -> ResolvedTenants {
    let tenant = read_tenant(headers, &settings.tenant_header);
    let admin_tenant = settings.admin_tenant.clone();

    debug!(tenant = %tenant, admin_tenant = %admin_tenant, "Resolved tenant identifiers");

    ResolvedTenants {
        tenant,
        admin_tenant,
    }
}

fn read_tenant(headers: &HeaderMap, header_name: &str) -> TenantId {
    if header_name.is_empty() {
        return TenantId::default();
    }
    let Ok(name) = HeaderName::from_bytes(header_name.as_bytes()) else {
        return TenantId::default();
    };
    headers
        .get(&name)
        .and_then(|value| value.to_str().ok())
        .map(TenantId::from_raw)
        .unwrap_or_default()
}
