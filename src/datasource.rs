//! Data source metadata, backing store and metadata cache.
//!
//! # Overview
//!
//! - [`DataSourceStore`] is the source of truth for data source definitions.
//!   [`StaticDataSourceStore`] serves definitions from configuration and can
//!   be replaced wholesale on reload.
//! - [`DataSourceCache`] is what the locator talks to. It resolves an id for a
//!   given caller, optionally bypassing the cache, and enforces the per-data
//!   source access list. [`CachingDataSourceService`] is the TTL-cached
//!   implementation over any store.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Metadata lookup failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// No data source exists with this id
    #[error("datasource {id} not found")]
    NotFound {
        /// Requested data source id
        id: i64,
    },

    /// The caller may not use this data source
    #[error("caller is not permitted to use datasource {id}")]
    AccessDenied {
        /// Requested data source id
        id: i64,
    },

    /// The store itself failed
    #[error("datasource store failure: {details}")]
    Backend {
        /// Error details
        details: String,
    },
}

/// Configured data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSourceMeta {
    /// Numeric identifier used in proxy routes
    pub id: i64,
    /// Display name
    pub name: String,
    /// Driver type (e.g. "prometheus", "loki")
    #[serde(rename = "type")]
    pub type_name: String,
    /// Base URL of the upstream API
    pub url: String,
    /// Logins allowed to use this data source; empty allows everyone
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Static headers added to every forwarded request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl DataSourceMeta {
    /// Returns `true` if `caller` may use this data source.
    pub fn permits(&self, caller: &CallerIdentity) -> bool {
        if self.allowed_users.is_empty() {
            return true;
        }
        caller
            .login()
            .is_some_and(|login| self.allowed_users.iter().any(|u| u == login))
    }
}

/// Identity of the user on whose behalf a request is made.
///
/// Inserted into request extensions by the identification middleware;
/// anonymous when no authenticating proxy header was present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallerIdentity {
    login: Option<String>,
}

impl CallerIdentity {
    /// An unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// A caller authenticated as `login`.
    pub fn user(login: impl Into<String>) -> Self {
        Self {
            login: Some(login.into()),
        }
    }

    /// Login name, if authenticated.
    pub fn login(&self) -> Option<&str> {
        self.login.as_deref()
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.login {
            Some(login) => f.write_str(login),
            None => f.write_str("anonymous"),
        }
    }
}

/// Source of truth for data source definitions.
#[async_trait]
pub trait DataSourceStore: Send + Sync {
    /// Load the definition for `id`.
    async fn load(&self, id: i64) -> Result<DataSourceMeta, LookupError>;
}

#[async_trait]
impl<T: DataSourceStore + ?Sized> DataSourceStore for Arc<T> {
    async fn load(&self, id: i64) -> Result<DataSourceMeta, LookupError> {
        (**self).load(id).await
    }
}

/// Caller-aware, cacheable metadata lookup.
#[async_trait]
pub trait DataSourceCache: Send + Sync {
    /// Resolve `id` on behalf of `caller`.
    ///
    /// With `skip_cache` set the store is consulted even if a fresh entry
    /// exists.
    async fn get_datasource(
        &self,
        id: i64,
        caller: &CallerIdentity,
        skip_cache: bool,
    ) -> Result<Arc<DataSourceMeta>, LookupError>;
}

/// Data sources defined in configuration.
pub struct StaticDataSourceStore {
    entries: ArcSwap<HashMap<i64, DataSourceMeta>>,
}

impl StaticDataSourceStore {
    /// Build a store from a list of definitions.
    pub fn new(datasources: Vec<DataSourceMeta>) -> Self {
        Self {
            entries: ArcSwap::from_pointee(index(datasources)),
        }
    }

    /// Atomically replace every definition.
    pub fn replace(&self, datasources: Vec<DataSourceMeta>) {
        self.entries.store(Arc::new(index(datasources)));
    }

    /// Number of configured data sources.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Returns `true` if no data sources are configured.
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

fn index(datasources: Vec<DataSourceMeta>) -> HashMap<i64, DataSourceMeta> {
    datasources.into_iter().map(|ds| (ds.id, ds)).collect()
}

#[async_trait]
impl DataSourceStore for StaticDataSourceStore {
    async fn load(&self, id: i64) -> Result<DataSourceMeta, LookupError> {
        self.entries
            .load()
            .get(&id)
            .cloned()
            .ok_or(LookupError::NotFound { id })
    }
}

struct CachedEntry {
    meta: Arc<DataSourceMeta>,
    cached_at: Instant,
    generation: u64,
}

/// TTL cache in front of a [`DataSourceStore`].
///
/// Access checks run on every lookup, cached or not, so a cached entry
/// never widens what a caller may see.
///
/// Entries are tagged with the generation current when their load started.
/// [`invalidate_all`](Self::invalidate_all) bumps the generation, so a load
/// that was in flight across an invalidation is returned to its caller but
/// never served from the cache afterwards.
pub struct CachingDataSourceService<S> {
    store: S,
    ttl: Duration,
    generation: AtomicU64,
    entries: DashMap<i64, CachedEntry>,
}

impl<S: DataSourceStore> CachingDataSourceService<S> {
    /// Create a cache over `store`. A zero `ttl` disables caching.
    pub fn new(store: S, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            generation: AtomicU64::new(0),
            entries: DashMap::new(),
        }
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    fn cached(&self, id: i64) -> Option<Arc<DataSourceMeta>> {
        let entry = self.entries.get(&id)?;
        let current = self.generation.load(Ordering::Acquire);
        if entry.generation == current && entry.cached_at.elapsed() < self.ttl {
            Some(Arc::clone(&entry.meta))
        } else {
            None
        }
    }

    fn authorize(
        meta: Arc<DataSourceMeta>,
        caller: &CallerIdentity,
    ) -> Result<Arc<DataSourceMeta>, LookupError> {
        if meta.permits(caller) {
            Ok(meta)
        } else {
            Err(LookupError::AccessDenied { id: meta.id })
        }
    }
}

#[async_trait]
impl<S: DataSourceStore> DataSourceCache for CachingDataSourceService<S> {
    async fn get_datasource(
        &self,
        id: i64,
        caller: &CallerIdentity,
        skip_cache: bool,
    ) -> Result<Arc<DataSourceMeta>, LookupError> {
        let caching = !self.ttl.is_zero();

        if caching && !skip_cache {
            if let Some(meta) = self.cached(id) {
                debug!(datasource_id = id, "Datasource cache hit");
                return Self::authorize(meta, caller);
            }
        }

        debug!(datasource_id = id, skip_cache, "Loading datasource from store");
        let generation = self.generation.load(Ordering::Acquire);
        let meta = Arc::new(self.store.load(id).await?);
        if caching {
            if generation == self.generation.load(Ordering::Acquire) {
                self.entries.insert(
                    id,
                    CachedEntry {
                        meta: Arc::clone(&meta),
                        cached_at: Instant::now(),
                        generation,
                    },
                );
            } else {
                debug!(datasource_id = id, "Datasources reloaded during lookup, not caching");
            }
        }
        Self::authorize(meta, caller)
    }
}
