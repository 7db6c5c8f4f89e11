//! Reverse-proxy executor.
//!
//! Takes a request the dispatch gateway has decided to forward, rewrites it
//! for the data source, sends it upstream and streams the response back.
//!
//! # Request Flow
//!
//! 1. Driver builds the upstream URI from the data source URL, the forward
//!    path tail and the original query string
//! 2. Hop-by-hop headers, `Host` and `Cookie` are removed
//! 3. Driver adds data source specific headers
//! 4. Response head must arrive within `request_timeout` (504 otherwise)
//! 5. Response body is streamed through [`TimeoutBody`]
//!
//! Connection failures map to 502. Nothing is retried.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Request, Version, header};
use axum::response::{IntoResponse, Response};
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, error, warn};

use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use crate::locator::Located;
use crate::proxy_path::ForwardPath;
use crate::timeout::{BodyTimeouts, TimeoutBody};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Everything the executor needs to forward one request.
pub struct DispatchRequest {
    /// Target data source and its driver
    pub located: Located,
    /// Canonical forward path
    pub forward_path: ForwardPath,
    /// Original inbound request
    pub request: Request<Body>,
}

/// Forwards dispatched requests to data sources.
///
/// The executor owns the response from here on, including reporting
/// upstream failures to the client.
#[async_trait]
pub trait ProxyExecutor: Send + Sync {
    /// Forward `request` and produce the client response.
    async fn dispatch(&self, request: DispatchRequest) -> Response;
}

/// HTTP/HTTPS executor backed by a pooled hyper client.
pub struct HttpProxyExecutor {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    request_timeout: Duration,
    body_timeouts: BodyTimeouts,
}

impl HttpProxyExecutor {
    /// Create an executor with the given upstream deadlines.
    pub fn new(config: &UpstreamConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(https_connector());
        Self {
            client,
            request_timeout: config.request_timeout,
            body_timeouts: BodyTimeouts::from(config),
        }
    }

    async fn forward(&self, dispatch: DispatchRequest) -> Result<Response, GatewayError> {
        let DispatchRequest {
            located,
            forward_path,
            request,
        } = dispatch;
        let (mut parts, body) = request.into_parts();

        let uri = located
            .driver
            .upstream_uri(&located.meta, &forward_path, parts.uri.query())?;

        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(header::HOST);
        parts.headers.remove(header::COOKIE);
        located.driver.prepare_headers(&located.meta, &mut parts.headers);

        debug!(
            datasource_id = located.meta.id,
            method = %parts.method,
            upstream = %uri,
            "Forwarding request to datasource"
        );

        parts.uri = uri.clone();
        parts.version = Version::HTTP_11;
        let upstream_request = Request::from_parts(parts, body);

        let response: Response<Incoming> =
            tokio::time::timeout(self.request_timeout, self.client.request(upstream_request))
                .await
                .map_err(|_| {
                    warn!(datasource_id = located.meta.id, upstream = %uri, "Upstream request timed out");
                    GatewayError::UpstreamTimeout {
                        timeout: self.request_timeout,
                    }
                })?
                .map_err(|e| {
                    let details = match std::error::Error::source(&e) {
                        Some(source) => format!("{e}: {source}"),
                        None => e.to_string(),
                    };
                    error!(
                        datasource_id = located.meta.id,
                        upstream = %uri,
                        error = %details,
                        "Upstream request failed"
                    );
                    GatewayError::Upstream { details }
                })?;

        let (mut parts, incoming) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(header::SET_COOKIE);

        let body = Body::new(TimeoutBody::new(incoming, self.body_timeouts));
        Ok(Response::from_parts(parts, body))
    }
}

#[async_trait]
impl ProxyExecutor for HttpProxyExecutor {
    async fn dispatch(&self, request: DispatchRequest) -> Response {
        match self.forward(request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }
}

fn https_connector() -> HttpsConnector<HttpConnector> {
    let builder = match HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => builder,
        Err(e) => {
            warn!(error = %e, "No native root certificates available, HTTPS datasources will fail verification");
            let tls = rustls::ClientConfig::builder()
                .with_root_certificates(rustls::RootCertStore::empty())
                .with_no_client_auth();
            HttpsConnectorBuilder::new().with_tls_config(tls)
        }
    };
    builder.https_or_http().enable_http1().enable_http2().build()
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP) {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}
