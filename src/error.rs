//! Error types for the TenantGate gateway.
//!
//! Every request-scoped failure is a [`GatewayError`]. Each variant maps to a
//! fixed HTTP status and a fixed human-readable message; the underlying cause
//! is carried alongside for diagnostics and rendered in the `error` field of
//! the JSON body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::datasource::LookupError;

/// Request-scoped gateway failures.
///
/// None of these are fatal to the process; each terminates only the request
/// that produced it.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The `{id}` route segment is not a valid data source identifier.
    #[error("Invalid datasource id: {raw}")]
    InvalidDataSourceId {
        /// Raw route segment as received
        raw: String,
    },

    /// The caller is not entitled to use the data source.
    #[error("Access denied to datasource")]
    AccessDenied {
        /// Lookup failure reported by the cache/store
        #[source]
        source: LookupError,
    },

    /// Metadata could not be loaded from the cache/store.
    #[error("Unable to load datasource meta data")]
    DataSourceLookup {
        /// Lookup failure reported by the cache/store
        #[source]
        source: LookupError,
    },

    /// No driver is registered for the data source type.
    ///
    /// Reported as 500 rather than 404: the data source exists, the server is
    /// missing the plugin to talk to it.
    #[error("Unable to find datasource plugin: {type_name}")]
    DriverNotFound {
        /// Data source type that has no registered driver
        type_name: String,
    },

    /// The data source URL could not be combined with the forward path.
    #[error("Invalid datasource url: {details}")]
    InvalidUpstreamUri {
        /// Error details
        details: String,
    },

    /// The upstream connection or exchange failed.
    #[error("Upstream request failed: {details}")]
    Upstream {
        /// Error details
        details: String,
    },

    /// The upstream did not answer within the configured deadline.
    #[error("Upstream timed out after {timeout:?}")]
    UpstreamTimeout {
        /// Deadline that elapsed
        timeout: std::time::Duration,
    },
}

/// JSON body of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Fixed, client-facing message
    pub message: &'static str,
    /// Underlying cause, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidDataSourceId { .. } => StatusCode::BAD_REQUEST,
            GatewayError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            GatewayError::DataSourceLookup { .. }
            | GatewayError::DriverNotFound { .. }
            | GatewayError::InvalidUpstreamUri { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Fixed message returned to the client.
    pub fn message(&self) -> &'static str {
        match self {
            GatewayError::InvalidDataSourceId { .. } => "Invalid datasource id",
            GatewayError::AccessDenied { .. } => "Access denied to datasource",
            GatewayError::DataSourceLookup { .. } => "Unable to load datasource meta data",
            GatewayError::DriverNotFound { .. } => "Unable to find datasource plugin",
            GatewayError::InvalidUpstreamUri { .. } => "Invalid datasource url",
            GatewayError::Upstream { .. } => "Bad gateway",
            GatewayError::UpstreamTimeout { .. } => "Gateway timeout",
        }
    }

    /// Underlying cause rendered for diagnostics.
    fn cause(&self) -> Option<String> {
        match self {
            GatewayError::InvalidDataSourceId { raw } => Some(format!("not a number: {raw:?}")),
            GatewayError::AccessDenied { source } | GatewayError::DataSourceLookup { source } => {
                Some(source.to_string())
            }
            GatewayError::DriverNotFound { type_name } => {
                Some(format!("no driver registered for type {type_name:?}"))
            }
            GatewayError::InvalidUpstreamUri { details } | GatewayError::Upstream { details } => {
                Some(details.clone())
            }
            GatewayError::UpstreamTimeout { timeout } => {
                Some(format!("no response within {}", humantime::format_duration(*timeout)))
            }
        }
    }

    /// Build the JSON body for this error.
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            message: self.message(),
            error: self.cause(),
        }
    }
}

impl From<LookupError> for GatewayError {
    fn from(source: LookupError) -> Self {
        match source {
            LookupError::AccessDenied { .. } => GatewayError::AccessDenied { source },
            other => GatewayError::DataSourceLookup { source: other },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
