//! Tenant isolation policy.
//!
//! A non-admin tenant listing the values of the `namespace` label must not see
//! the upstream listing, which would reveal other tenants' namespaces. The
//! gateway answers such requests itself with a listing that contains only the
//! caller's own tenant, so a UI offers that tenant as the single selectable
//! namespace.
//!
//! # Decision
//!
//! A request is short-circuited when all of these hold:
//!
//! 1. its path targets a [`RestrictedEndpoint`]
//! 2. a tenant was asserted (non-empty)
//! 3. the tenant differs from the admin tenant
//!
//! Everything else passes through. A request with no tenant asserted is not
//! treated as untrusted and is never restricted.
//!
//! The tenant is lower-cased at resolution while the admin tenant is compared
//! exactly as configured, so an admin tenant configured with upper-case
//! letters never matches any caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// Operations subject to tenant isolation.
///
/// Matched on the trailing segments of the path as the data source will
/// interpret it, so the mount prefix does not matter. The path is
/// percent-decoded and dot segments are resolved before matching; empty
/// segments are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictedEndpoint {
    /// `.../label/namespace/values` on Prometheus-compatible APIs
    LabelNamespaceValues,
}

impl RestrictedEndpoint {
    /// Every restricted endpoint.
    pub const ALL: &'static [RestrictedEndpoint] = &[RestrictedEndpoint::LabelNamespaceValues];

    /// Trailing segments identifying this endpoint.
    pub fn segments(self) -> &'static [&'static str] {
        match self {
            RestrictedEndpoint::LabelNamespaceValues => &["label", "namespace", "values"],
        }
    }

    /// Returns `true` if `path` targets this endpoint.
    pub fn matches(self, path: &str) -> bool {
        self.matches_segments(&canonical_segments(path))
    }

    /// The restricted endpoint targeted by `path`, if any.
    pub fn classify(path: &str) -> Option<RestrictedEndpoint> {
        let segments = canonical_segments(path);
        Self::ALL
            .iter()
            .copied()
            .find(|endpoint| endpoint.matches_segments(&segments))
    }

    fn matches_segments(self, actual: &[String]) -> bool {
        let expected = self.segments();
        actual.len() >= expected.len()
            && actual
                .iter()
                .rev()
                .zip(expected.iter().rev())
                .all(|(have, want)| have == want)
    }
}

/// Path segments as an upstream resolves them.
///
/// Percent escapes are decoded once (so `%2F` splits a segment), empty and
/// `.` segments are dropped and `..` removes its parent.
fn canonical_segments(path: &str) -> Vec<String> {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let mut segments: Vec<String> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other.to_string()),
        }
    }
    segments
}

/// Outcome of the isolation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationDecision {
    /// Forward the request to the data source.
    PassThrough,

    /// Answer with a synthesized listing containing only this tenant.
    ShortCircuit(TenantId),
}

/// Apply the isolation policy.
pub fn decide(path: &str, tenant: &TenantId, admin_tenant: &str) -> IsolationDecision {
    if tenant.is_empty() || tenant.as_str() == admin_tenant {
        return IsolationDecision::PassThrough;
    }
    match RestrictedEndpoint::classify(path) {
        Some(_) => IsolationDecision::ShortCircuit(tenant.clone()),
        None => IsolationDecision::PassThrough,
    }
}

/// Synthesized label values listing.
///
/// Mirrors the Prometheus label values response shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValuesResponse {
    /// Always `"success"`
    pub status: String,
    /// Exactly one element: the caller's tenant
    pub data: Vec<String>,
}

impl LabelValuesResponse {
    /// Listing that exposes only `tenant`.
    pub fn only(tenant: TenantId) -> Self {
        Self {
            status: "success".to_string(),
            data: vec![tenant.into_string()],
        }
    }
}

impl IntoResponse for LabelValuesResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
