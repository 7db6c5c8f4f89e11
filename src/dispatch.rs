//! Dispatch gateway.
//!
//! Entry point for data source proxy requests. Each request goes through a
//! fixed sequence with no loops or retries:
//!
//! 1. Start the request timer (recorded on every exit path)
//! 2. Resolve tenants and apply the isolation policy; a short-circuit answers
//!    `200` with the tenant-scoped label listing and stops here
//! 3. Locate the data source and its driver; failures answer with the mapped
//!    error status
//! 4. Normalize the forward path
//! 5. Hand off to the reverse-proxy executor, which owns the response from
//!    then on
//!
//! # Routes
//!
//! - `ANY /api/datasources/proxy/{id}`
//! - `ANY /api/datasources/proxy/{id}/{*path}`
//! - `GET /health`
//! - `GET /metrics`

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::config::{AuthSettings, SharedIsolation};
use crate::datasource::CallerIdentity;
use crate::error::GatewayError;
use crate::isolation::{self, IsolationDecision, LabelValuesResponse};
use crate::locator::DataSourceLocator;
use crate::metrics::{GatewayMetrics, Outcome, RequestTimer};
use crate::proxy_path;
use crate::proxy_service::{DispatchRequest, ProxyExecutor};
use crate::tenant;

/// Mount point of the data source proxy routes.
pub const PROXY_ROUTE_PREFIX: &str = "/api/datasources/proxy";

/// Orchestrates isolation, location and forwarding of proxy requests.
pub struct DispatchGateway {
    isolation: SharedIsolation,
    locator: DataSourceLocator,
    executor: Arc<dyn ProxyExecutor>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl DispatchGateway {
    /// Create a gateway without metrics.
    pub fn new(
        isolation: SharedIsolation,
        locator: DataSourceLocator,
        executor: Arc<dyn ProxyExecutor>,
    ) -> Self {
        Self {
            isolation,
            locator,
            executor,
            metrics: None,
        }
    }

    /// Record request timings and short-circuits in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<GatewayMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Metrics sink, if enabled.
    pub fn metrics(&self) -> Option<&Arc<GatewayMetrics>> {
        self.metrics.as_ref()
    }

    /// Handle one proxy request.
    ///
    /// `id_segment` is the `{id}` route parameter and `wildcard` the router's
    /// capture of the remaining path.
    pub async fn dispatch(&self, id_segment: &str, wildcard: &str, request: Request) -> Response {
        let mut timer = RequestTimer::start(self.metrics.clone());
        let path = request.uri().path().to_string();

        let decision = {
            let settings = self.isolation.load();
            let tenants = tenant::resolve(request.headers(), &settings);
            isolation::decide(&path, &tenants.tenant, &tenants.admin_tenant)
        };
        if let IsolationDecision::ShortCircuit(tenant) = decision {
            info!(tenant = %tenant, path = %path, "Returning tenant-scoped label values");
            if let Some(metrics) = &self.metrics {
                metrics.record_short_circuit();
            }
            timer.set_outcome(Outcome::ShortCircuit);
            return LabelValuesResponse::only(tenant).into_response();
        }

        let id = match parse_datasource_id(id_segment) {
            Ok(id) => id,
            Err(e) => return e.into_response(),
        };
        let caller = request
            .extensions()
            .get::<CallerIdentity>()
            .cloned()
            .unwrap_or_default();
        let skip_cache = wants_fresh_metadata(request.headers());

        let located = match self.locator.locate(id, &caller, skip_cache).await {
            Ok(located) => located,
            Err(e) => return e.into_response(),
        };

        let tail = raw_wildcard(&path).unwrap_or(wildcard);
        let forward_path = proxy_path::normalize(&path, tail);

        timer.set_outcome(Outcome::Forwarded);
        self.executor
            .dispatch(DispatchRequest {
                located,
                forward_path,
                request,
            })
            .await
    }
}

/// Build the HTTP router for the gateway.
pub fn router(gateway: Arc<DispatchGateway>, auth: &AuthSettings) -> Router {
    let user_header = if auth.user_header.is_empty() {
        None
    } else {
        HeaderName::from_bytes(auth.user_header.as_bytes()).ok()
    };

    Router::new()
        .route(PROXY_ROUTE, any(proxy_handler))
        .route(PROXY_WILDCARD_ROUTE, any(proxy_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn_with_state(user_header, identify_caller))
        .with_state(gateway)
}

const PROXY_ROUTE: &str = "/api/datasources/proxy/{id}";
const PROXY_WILDCARD_ROUTE: &str = "/api/datasources/proxy/{id}/{*path}";

async fn proxy_handler(
    State(gateway): State<Arc<DispatchGateway>>,
    Path(params): Path<HashMap<String, String>>,
    request: Request,
) -> Response {
    let id = params.get("id").map(String::as_str).unwrap_or_default();
    let wildcard = params.get("path").map(String::as_str).unwrap_or_default();
    let span = info_span!(
        "dataproxy",
        request_id = %Uuid::new_v4(),
        datasource = %id,
        method = %request.method(),
    );
    gateway.dispatch(id, wildcard, request).instrument(span).await
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn metrics_handler(State(gateway): State<Arc<DispatchGateway>>) -> Response {
    let Some(metrics) = gateway.metrics() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match metrics.encode() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Attach a [`CallerIdentity`] from the authenticating proxy header.
///
/// An identity already present in the request extensions is left alone.
async fn identify_caller(
    State(user_header): State<Option<HeaderName>>,
    mut request: Request,
    next: Next,
) -> Response {
    if request.extensions().get::<CallerIdentity>().is_none() {
        let identity = user_header
            .as_ref()
            .and_then(|name| request.headers().get(name))
            .and_then(|value| value.to_str().ok())
            .filter(|login| !login.is_empty())
            .map(CallerIdentity::user)
            .unwrap_or_default();
        request.extensions_mut().insert(identity);
    }
    next.run(request).await
}

fn parse_datasource_id(raw: &str) -> Result<i64, GatewayError> {
    raw.parse().map_err(|_| GatewayError::InvalidDataSourceId {
        raw: raw.to_string(),
    })
}

/// Percent-encoded wildcard remainder taken straight from the request path.
///
/// The router hands out a decoded capture, which no longer lines up with the
/// raw path; forwarding must use the raw form.
fn raw_wildcard(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(PROXY_ROUTE_PREFIX)?.strip_prefix('/')?;
    Some(rest.split_once('/').map_or("", |(_, tail)| tail))
}

/// Returns `true` if the client asked to bypass the metadata cache.
fn wants_fresh_metadata(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_datasource_id() {
        assert_eq!(parse_datasource_id("7").expect("numeric"), 7);
        assert_eq!(parse_datasource_id("-1").expect("numeric"), -1);
        let err = parse_datasource_id("seven").expect_err("not numeric");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_raw_wildcard() {
        assert_eq!(
            raw_wildcard("/api/datasources/proxy/7/api/v1/query"),
            Some("api/v1/query")
        );
        assert_eq!(
            raw_wildcard("/api/datasources/proxy/7/api/v1/labels/"),
            Some("api/v1/labels/")
        );
        assert_eq!(
            raw_wildcard("/api/datasources/proxy/7/api/v1/series%3Fx"),
            Some("api/v1/series%3Fx")
        );
        assert_eq!(raw_wildcard("/api/datasources/proxy/7"), Some(""));
        assert_eq!(raw_wildcard("/other/7/api"), None);
    }

    #[test]
    fn test_wants_fresh_metadata() {
        let mut headers = HeaderMap::new();
        assert!(!wants_fresh_metadata(&headers));

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        assert!(!wants_fresh_metadata(&headers));

        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("max-age=0, No-Cache"),
        );
        assert!(wants_fresh_metadata(&headers));
    }
}
