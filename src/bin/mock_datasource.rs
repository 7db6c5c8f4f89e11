//! Fake Prometheus-compatible data source for local testing.
//!
//! Serves label value listings for several namespaces, so the effect of the
//! isolation policy is visible when a tenant header is sent through the
//! gateway.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    extract::{Path, RawQuery},
    http::HeaderMap,
    routing::get,
};
use serde_json::{Value, json};

const NAMESPACES: &[&str] = &["team-a", "team-b", "team-c", "kube-system"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .route("/api/v1/label/{name}/values", get(label_values))
        .route("/api/v1/query", get(query).post(query))
        .route("/api/v1/status/buildinfo", get(build_info));

    let addr = SocketAddr::from(([0, 0, 0, 0], 9090));
    tracing::info!(%addr, "Mock datasource listening");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(%addr, error = %e, "Failed to bind");
        e
    })?;

    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!(error = %e, "Server error");
        e
    })?;

    Ok(())
}

async fn label_values(Path(name): Path<String>) -> Json<Value> {
    tracing::info!(label = %name, "Label values requested");
    let data: Vec<&str> = match name.as_str() {
        "namespace" => NAMESPACES.to_vec(),
        "job" => vec!["node", "apiserver"],
        _ => Vec::new(),
    };
    Json(json!({ "status": "success", "data": data }))
}

async fn query(headers: HeaderMap, RawQuery(raw): RawQuery) -> Json<Value> {
    let tenant = headers
        .get("x-scope-orgid")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    tracing::info!(query = raw.as_deref().unwrap_or(""), tenant, "Query received");
    Json(json!({
        "status": "success",
        "data": { "resultType": "vector", "result": [] }
    }))
}

async fn build_info() -> Json<Value> {
    Json(json!({ "status": "success", "data": { "version": "mock" } }))
}
