//! Gateway configuration.
//!
//! Configuration is layered:
//!
//! 1. Built-in defaults
//! 2. Optional YAML file (`--config` / `TENANTGATE_CONFIG`)
//! 3. Environment overrides for the isolation settings
//!
//! The isolation settings are published as an immutable snapshot behind an
//! [`ArcSwap`]. Request handlers load the current snapshot without locking;
//! a reload (SIGHUP) builds a fresh snapshot and swaps it in atomically.
//!
//! # Environment Variables
//!
//! - `TENANT_HEADER_NAME`: name of the request header carrying the caller's tenant
//! - `ADMIN_TENANT_HEADER_NAME`: the admin tenant identifier itself (not a header name)
//!
//! The `GRAFANA_`-prefixed spellings of both variables are honored when the
//! unprefixed variable is not set.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::http::HeaderName;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::warn;

use crate::datasource::DataSourceMeta;

/// Environment variable naming the tenant header.
pub const TENANT_HEADER_ENV: &str = "TENANT_HEADER_NAME";
/// Environment variable holding the admin tenant identifier.
pub const ADMIN_TENANT_ENV: &str = "ADMIN_TENANT_HEADER_NAME";

const LEGACY_TENANT_HEADER_ENV: &str = "GRAFANA_TENANT_HEADER_NAME";
const LEGACY_ADMIN_TENANT_ENV: &str = "GRAFANA_ADMIN_TENANT_HEADER_NAME";

fn first_set(
    lookup: &impl Fn(&str) -> Option<String>,
    primary: &'static str,
    legacy: &'static str,
) -> Option<(&'static str, String)> {
    lookup(primary)
        .map(|value| (primary, value))
        .or_else(|| lookup(legacy).map(|value| (legacy, value)))
}

/// Isolation settings shared by every request.
pub type SharedIsolation = Arc<ArcSwap<IsolationSettings>>;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the expected schema
    #[error("Failed to parse config file {path}: {details}")]
    Parse {
        /// Path that was parsed
        path: PathBuf,
        /// Parser error details
        details: String,
    },

    /// Configuration parsed but failed validation
    #[error("Invalid configuration: {details}")]
    Invalid {
        /// Validation error details
        details: String,
    },
}

/// Tenant isolation parameters.
///
/// Both fields may be empty. An empty `tenant_header` means no tenant is ever
/// resolved, so every request passes through. An empty `admin_tenant` means no
/// tenant can match it, so every asserted tenant is isolated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsolationSettings {
    /// Name of the request header carrying the caller's tenant
    pub tenant_header: String,
    /// Admin tenant identifier, compared exactly as stored
    pub admin_tenant: String,
}

impl IsolationSettings {
    /// Create settings from explicit values.
    pub fn new(tenant_header: impl Into<String>, admin_tenant: impl Into<String>) -> Self {
        Self {
            tenant_header: tenant_header.into(),
            admin_tenant: admin_tenant.into(),
        }
    }

    /// Override fields with values found through `lookup`.
    ///
    /// A variable that is present overrides the current value even when it
    /// is empty. Returns the variables that replaced a different, non-empty
    /// value.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
        let mut shadowed = Vec::new();
        if let Some((var, header)) = first_set(&lookup, TENANT_HEADER_ENV, LEGACY_TENANT_HEADER_ENV)
        {
            if !self.tenant_header.is_empty() && header != self.tenant_header {
                shadowed.push(var);
            }
            self.tenant_header = header;
        }
        if let Some((var, admin)) = first_set(&lookup, ADMIN_TENANT_ENV, LEGACY_ADMIN_TENANT_ENV) {
            if !self.admin_tenant.is_empty() && admin != self.admin_tenant {
                shadowed.push(var);
            }
            self.admin_tenant = admin;
        }
        shadowed
    }

    /// Wrap into a shared, swappable snapshot.
    pub fn into_shared(self) -> SharedIsolation {
        Arc::new(ArcSwap::from_pointee(self))
    }
}

/// Caller identification settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSettings {
    /// Header set by the authenticating proxy in front of the gateway
    pub user_header: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            user_header: "X-WEBAUTH-USER".to_string(),
        }
    }
}

/// Upstream transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Deadline for the upstream response head
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    /// Deadline for each response body chunk
    #[serde(deserialize_with = "deserialize_duration")]
    pub chunk_timeout: Duration,
    /// Deadline for the whole response body
    #[serde(deserialize_with = "deserialize_duration")]
    pub total_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            chunk_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(300),
        }
    }
}

/// Data source metadata cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// How long a resolved data source stays cached (0 disables caching)
    #[serde(deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Tenant isolation parameters
    pub isolation: IsolationSettings,
    /// Caller identification
    pub auth: AuthSettings,
    /// Upstream transport
    pub upstream: UpstreamConfig,
    /// Metadata cache
    pub cache: CacheConfig,
    /// Configured data sources
    pub datasources: Vec<DataSourceMeta>,
}

impl GatewayConfig {
    /// Load configuration from an optional file plus the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or if the result
    /// fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let shadowed = config.isolation.apply_env(|key| std::env::var(key).ok());
        if let Some(path) = path {
            for variable in shadowed {
                warn!(
                    variable,
                    path = %path.display(),
                    "Environment variable overrides isolation setting from config file"
                );
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration file without applying the environment.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|details| ConfigError::Parse {
            path: path.to_path_buf(),
            details,
        })
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns the parser message on failure.
    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |details: String| ConfigError::Invalid { details };

        if !self.isolation.tenant_header.is_empty()
            && HeaderName::from_bytes(self.isolation.tenant_header.as_bytes()).is_err()
        {
            return Err(invalid(format!(
                "tenant header {:?} is not a valid HTTP header name",
                self.isolation.tenant_header
            )));
        }
        if !self.auth.user_header.is_empty()
            && HeaderName::from_bytes(self.auth.user_header.as_bytes()).is_err()
        {
            return Err(invalid(format!(
                "user header {:?} is not a valid HTTP header name",
                self.auth.user_header
            )));
        }
        if self.upstream.request_timeout.is_zero()
            || self.upstream.chunk_timeout.is_zero()
            || self.upstream.total_timeout.is_zero()
        {
            return Err(invalid("upstream timeouts must be non-zero".to_string()));
        }

        let mut seen = HashSet::new();
        for ds in &self.datasources {
            if !seen.insert(ds.id) {
                return Err(invalid(format!("duplicate datasource id {}", ds.id)));
            }
            if ds.type_name.is_empty() {
                return Err(invalid(format!("datasource {} has no type", ds.id)));
            }
            let url = url::Url::parse(&ds.url)
                .map_err(|e| invalid(format!("datasource {} has invalid url: {e}", ds.id)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(format!(
                    "datasource {} url must be http or https, got {}",
                    ds.id,
                    url.scheme()
                )));
            }
        }
        Ok(())
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}
