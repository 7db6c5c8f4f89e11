//! End-to-end dispatch behaviour through the HTTP router.
//!
//! Metadata lookup and forwarding are replaced by recording mocks so each
//! test can assert which stages a request reached.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use tenantgate::config::{AuthSettings, IsolationSettings, SharedIsolation};
use tenantgate::datasource::{CallerIdentity, DataSourceCache, DataSourceMeta, LookupError};
use tenantgate::dispatch::{DispatchGateway, router};
use tenantgate::driver::DriverRegistry;
use tenantgate::locator::DataSourceLocator;
use tenantgate::metrics::{GatewayMetrics, Outcome};
use tenantgate::proxy_service::{DispatchRequest, ProxyExecutor};

const LABEL_VALUES: &str = "/api/datasources/proxy/7/api/v1/label/namespace/values";

/// Metadata cache answering from a fixed result and recording every call.
struct RecordingCache {
    result: Result<&'static str, LookupError>,
    calls: AtomicUsize,
    callers: Mutex<Vec<CallerIdentity>>,
    skipped: Mutex<Vec<bool>>,
}

impl RecordingCache {
    fn serving(type_name: &'static str) -> Self {
        Self::with_result(Ok(type_name))
    }

    fn failing(error: LookupError) -> Self {
        Self::with_result(Err(error))
    }

    fn with_result(result: Result<&'static str, LookupError>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
            callers: Mutex::new(Vec::new()),
            skipped: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSourceCache for RecordingCache {
    async fn get_datasource(
        &self,
        id: i64,
        caller: &CallerIdentity,
        skip_cache: bool,
    ) -> Result<Arc<DataSourceMeta>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.callers.lock().expect("lock").push(caller.clone());
        self.skipped.lock().expect("lock").push(skip_cache);

        let type_name = self.result.clone()?;
        Ok(Arc::new(DataSourceMeta {
            id,
            name: "metrics".to_string(),
            type_name: type_name.to_string(),
            url: "http://prometheus:9090".to_string(),
            allowed_users: Vec::new(),
            headers: BTreeMap::new(),
        }))
    }
}

/// Executor that records forward paths instead of contacting an upstream.
#[derive(Default)]
struct RecordingExecutor {
    forwarded: Mutex<Vec<(i64, String, String)>>,
}

impl RecordingExecutor {
    fn calls(&self) -> usize {
        self.forwarded.lock().expect("lock").len()
    }

    fn last(&self) -> (i64, String, String) {
        self.forwarded
            .lock()
            .expect("lock")
            .last()
            .cloned()
            .expect("should have forwarded a request")
    }
}

#[async_trait]
impl ProxyExecutor for RecordingExecutor {
    async fn dispatch(&self, request: DispatchRequest) -> Response {
        self.forwarded.lock().expect("lock").push((
            request.located.meta.id,
            request.forward_path.as_str().to_string(),
            request.forward_path.tail().to_string(),
        ));
        (StatusCode::OK, "forwarded").into_response()
    }
}

struct Harness {
    router: Router,
    cache: Arc<RecordingCache>,
    executor: Arc<RecordingExecutor>,
    metrics: Arc<GatewayMetrics>,
}

fn harness(admin_tenant: &str, cache: RecordingCache) -> Harness {
    let isolation: SharedIsolation = IsolationSettings::new("X-Tenant", admin_tenant).into_shared();
    let cache = Arc::new(cache);
    let executor = Arc::new(RecordingExecutor::default());
    let metrics = Arc::new(GatewayMetrics::new().expect("should create metrics"));

    let locator = DataSourceLocator::new(
        Arc::clone(&cache) as Arc<dyn DataSourceCache>,
        Arc::new(DriverRegistry::with_builtin_drivers()),
    );
    let gateway = DispatchGateway::new(
        isolation,
        locator,
        Arc::clone(&executor) as Arc<dyn ProxyExecutor>,
    )
    .with_metrics(Arc::clone(&metrics));

    Harness {
        router: router(Arc::new(gateway), &AuthSettings::default()),
        cache,
        executor,
        metrics,
    }
}

fn get(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::empty()).expect("should build request")
}

async fn json_body(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("should collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("should be JSON")
}

async fn text_body(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("should collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("should be utf8")
}

#[tokio::test]
async fn test_non_admin_tenant_gets_synthetic_namespace_listing() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get(LABEL_VALUES, &[("X-Tenant", "TeamA")]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "status": "success", "data": ["teama"] })
    );
    assert_eq!(h.cache.calls(), 0, "locator must not run");
    assert_eq!(h.executor.calls(), 0, "upstream must not be contacted");
    assert_eq!(h.metrics.short_circuit_count(), 1);
    assert_eq!(h.metrics.request_count(Outcome::ShortCircuit), 1);
}

#[tokio::test]
async fn test_admin_tenant_is_forwarded() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get(LABEL_VALUES, &[("X-Tenant", "admin")]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "forwarded");
    assert_eq!(h.cache.calls(), 1);

    let (id, full, tail) = h.executor.last();
    assert_eq!(id, 7);
    assert_eq!(full, LABEL_VALUES);
    assert_eq!(tail, "api/v1/label/namespace/values");
    assert_eq!(h.metrics.short_circuit_count(), 0);
    assert_eq!(h.metrics.request_count(Outcome::Forwarded), 1);
}

#[tokio::test]
async fn test_request_without_tenant_is_forwarded() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get("/api/datasources/proxy/7/api/v1/query?query=up", &[]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::OK);
    let (_, full, tail) = h.executor.last();
    assert_eq!(full, "/api/datasources/proxy/7/api/v1/query");
    assert_eq!(tail, "api/v1/query");
}

#[tokio::test]
async fn test_tenant_without_header_value_on_label_values_is_forwarded() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get(LABEL_VALUES, &[("X-Tenant", "")]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.executor.calls(), 1);
}

#[tokio::test]
async fn test_other_endpoints_are_never_isolated() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    for uri in [
        "/api/datasources/proxy/7/api/v1/label/job/values",
        "/api/datasources/proxy/7/api/v1/labels",
        "/api/datasources/proxy/7/api/v1/label/namespace/values/extra",
    ] {
        let response = h
            .router
            .clone()
            .oneshot(get(uri, &[("X-Tenant", "teama")]))
            .await
            .expect("should get response");
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(text_body(response).await, "forwarded", "{uri}");
    }
    assert_eq!(h.executor.calls(), 3);
}

#[tokio::test]
async fn test_trailing_separator_is_still_isolated() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let uri = format!("{LABEL_VALUES}/");
    let response = h
        .router
        .clone()
        .oneshot(get(&uri, &[("X-Tenant", "teama")]))
        .await
        .expect("should get response");

    assert_eq!(
        json_body(response).await,
        json!({ "status": "success", "data": ["teama"] })
    );
    assert_eq!(h.executor.calls(), 0);
}

/// Upstreams decode and resolve dot segments, so these all reach the
/// namespace listing there and must be answered here instead.
#[tokio::test]
async fn test_encoded_and_dotted_label_values_are_isolated() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    for uri in [
        "/api/datasources/proxy/7/api/v1/label/namespace/value%73",
        "/api/datasources/proxy/7/api/v1/label/namespace/values/x/..",
        "/api/datasources/proxy/7/api/v1/label/namespace/values/.",
    ] {
        let response = h
            .router
            .clone()
            .oneshot(get(uri, &[("X-Tenant", "acme")]))
            .await
            .expect("should get response");
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert_eq!(
            json_body(response).await,
            json!({ "status": "success", "data": ["acme"] }),
            "{uri}"
        );
    }
    assert_eq!(h.cache.calls(), 0);
    assert_eq!(h.executor.calls(), 0, "upstream must not be contacted");
    assert_eq!(h.metrics.short_circuit_count(), 3);
}

/// The tenant is lower-cased but the admin tenant is compared as configured.
/// With an upper-case admin tenant, even the admin's own header is isolated.
#[tokio::test]
async fn test_mixed_case_admin_tenant_never_matches() {
    let h = harness("Admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get(LABEL_VALUES, &[("X-Tenant", "Admin")]))
        .await
        .expect("should get response");

    assert_eq!(
        json_body(response).await,
        json!({ "status": "success", "data": ["admin"] })
    );
    assert_eq!(h.executor.calls(), 0);
}

#[tokio::test]
async fn test_admin_header_case_is_folded() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get(LABEL_VALUES, &[("X-Tenant", "ADMIN")]))
        .await
        .expect("should get response");

    assert_eq!(text_body(response).await, "forwarded");
}

#[tokio::test]
async fn test_access_denied_maps_to_403() {
    let h = harness("admin", RecordingCache::failing(LookupError::AccessDenied { id: 7 }));

    let response = h
        .router
        .clone()
        .oneshot(get("/api/datasources/proxy/7/api/v1/query", &[]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["message"], "Access denied to datasource");
    assert_eq!(h.executor.calls(), 0);
    assert_eq!(h.metrics.request_count(Outcome::Error), 1);
}

#[tokio::test]
async fn test_lookup_failure_maps_to_500() {
    let h = harness("admin", RecordingCache::failing(LookupError::NotFound { id: 7 }));

    let response = h
        .router
        .clone()
        .oneshot(get("/api/datasources/proxy/7/api/v1/query", &[]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await["message"],
        "Unable to load datasource meta data"
    );
    assert_eq!(h.executor.calls(), 0);
}

#[tokio::test]
async fn test_unknown_driver_maps_to_500() {
    let h = harness("admin", RecordingCache::serving("graphite"));

    let response = h
        .router
        .clone()
        .oneshot(get("/api/datasources/proxy/7/render", &[]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await["message"],
        "Unable to find datasource plugin"
    );
    assert_eq!(h.executor.calls(), 0);
}

#[tokio::test]
async fn test_non_numeric_id_is_400() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get("/api/datasources/proxy/abc/api/v1/query", &[]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "Invalid datasource id");
    assert_eq!(h.cache.calls(), 0);
}

#[tokio::test]
async fn test_isolation_runs_before_id_parsing() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get(
            "/api/datasources/proxy/abc/api/v1/label/namespace/values",
            &[("X-Tenant", "teama")],
        ))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.cache.calls(), 0);
}

#[tokio::test]
async fn test_bare_datasource_route_forwards_prefix() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    let response = h
        .router
        .clone()
        .oneshot(get("/api/datasources/proxy/7", &[]))
        .await
        .expect("should get response");

    assert_eq!(response.status(), StatusCode::OK);
    let (_, full, tail) = h.executor.last();
    assert_eq!(full, "/api/datasources/proxy/7");
    assert_eq!(tail, "");
}

#[tokio::test]
async fn test_caller_identity_and_cache_bypass_reach_lookup() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    h.router
        .clone()
        .oneshot(get(
            "/api/datasources/proxy/7/api/v1/query",
            &[("X-WEBAUTH-USER", "alice"), ("Cache-Control", "no-cache")],
        ))
        .await
        .expect("should get response");
    h.router
        .clone()
        .oneshot(get("/api/datasources/proxy/7/api/v1/query", &[]))
        .await
        .expect("should get response");

    let callers = h.cache.callers.lock().expect("lock").clone();
    assert_eq!(callers, vec![CallerIdentity::user("alice"), CallerIdentity::anonymous()]);
    let skipped = h.cache.skipped.lock().expect("lock").clone();
    assert_eq!(skipped, vec![true, false]);
}

#[tokio::test]
async fn test_isolation_settings_swap_takes_effect() {
    let isolation = IsolationSettings::new("X-Tenant", "admin").into_shared();
    let executor = Arc::new(RecordingExecutor::default());
    let locator = DataSourceLocator::new(
        Arc::new(RecordingCache::serving("prometheus")) as Arc<dyn DataSourceCache>,
        Arc::new(DriverRegistry::with_builtin_drivers()),
    );
    let gateway = DispatchGateway::new(
        Arc::clone(&isolation),
        locator,
        Arc::clone(&executor) as Arc<dyn ProxyExecutor>,
    );
    let app = router(Arc::new(gateway), &AuthSettings::default());

    let response = app
        .clone()
        .oneshot(get(LABEL_VALUES, &[("X-Org", "teama")]))
        .await
        .expect("should get response");
    assert_eq!(text_body(response).await, "forwarded");

    isolation.store(Arc::new(IsolationSettings::new("X-Org", "admin")));

    let response = app
        .oneshot(get(LABEL_VALUES, &[("X-Org", "teama")]))
        .await
        .expect("should get response");
    assert_eq!(
        json_body(response).await,
        json!({ "status": "success", "data": ["teama"] })
    );
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let h = harness("admin", RecordingCache::serving("prometheus"));

    h.router
        .clone()
        .oneshot(get(LABEL_VALUES, &[("X-Tenant", "teama")]))
        .await
        .expect("should get response");

    let health = h
        .router
        .clone()
        .oneshot(get("/health", &[]))
        .await
        .expect("should get response");
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(text_body(health).await, "OK");

    let metrics = h
        .router
        .clone()
        .oneshot(get("/metrics", &[]))
        .await
        .expect("should get response");
    assert_eq!(metrics.status(), StatusCode::OK);
    let text = text_body(metrics).await;
    assert!(text.contains("tenantgate_isolation_short_circuits_total 1"));
    assert!(text.contains("outcome=\"short_circuit\""));
}
