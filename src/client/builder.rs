//! Builder for configuring sync clients

use std::sync::Arc;

use super::SyncClient;
use crate::backend::{DataService, MemoryBackend, RealtimeService, RoleProvider};
use crate::cache::{CacheConfig, CacheStore};
use crate::config::TuileConfig;
use crate::mutation::MutationCoordinator;
use crate::query::QueryExecutor;
use crate::realtime::{RealtimeBridge, RealtimeConfig};
use crate::retry::RetryConfig;
use crate::{Result, SyncError};

/// Main entry point for creating sync clients.
pub struct Tuile;

impl Tuile {
    /// Create a new builder for configuring the client.
    pub fn builder() -> SyncClientBuilder {
        SyncClientBuilder::new()
    }
}

/// Builder for configuring sync clients.
pub struct SyncClientBuilder {
    data: Option<Arc<dyn DataService>>,
    roles: Option<Arc<dyn RoleProvider>>,
    realtime: Option<Arc<dyn RealtimeService>>,
    cache: CacheConfig,
    retry: RetryConfig,
    realtime_config: RealtimeConfig,
    user_id: Option<String>,
}

impl SyncClientBuilder {
    pub fn new() -> Self {
        Self {
            data: None,
            roles: None,
            realtime: None,
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            realtime_config: RealtimeConfig::default(),
            user_id: None,
        }
    }

    /// Use an in-memory backend for data, roles and realtime.
    pub fn memory(mut self, backend: Arc<MemoryBackend>) -> Self {
        self.data = Some(backend.clone());
        self.roles = Some(backend.clone());
        self.realtime = Some(backend);
        self
    }

    /// Use a PostgREST backend for data and roles.
    #[cfg(feature = "rest")]
    pub fn rest(mut self, backend: crate::backend::RestBackend) -> Self {
        let backend = Arc::new(backend);
        self.data = Some(backend.clone());
        self.roles = Some(backend);
        self
    }

    /// Configure the table data service.
    pub fn data_service(mut self, service: Arc<dyn DataService>) -> Self {
        self.data = Some(service);
        self
    }

    /// Configure the role lookup. Without one, every user is a viewer.
    pub fn role_provider(mut self, provider: Arc<dyn RoleProvider>) -> Self {
        self.roles = Some(provider);
        self
    }

    /// Configure the change feed. Without one, realtime channels cannot be
    /// opened.
    pub fn realtime_service(mut self, service: Arc<dyn RealtimeService>) -> Self {
        self.realtime = Some(service);
        self
    }

    /// Set stale and retention windows.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Set retry behaviour for reads.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Set reconnection behaviour for realtime channels.
    pub fn realtime_config(mut self, config: RealtimeConfig) -> Self {
        self.realtime_config = config;
        self
    }

    /// Signed-in user, part of the role query's fingerprint.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Apply the cache, retry and realtime sections of a config file.
    pub fn config(mut self, config: &TuileConfig) -> Self {
        self.cache = config.cache_config();
        self.retry = config.retry_config();
        self.realtime_config = config.realtime_config();
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<SyncClient> {
        let data = self.data.ok_or_else(|| {
            SyncError::Configuration("no data service configured".to_string())
        })?;

        let store = Arc::new(CacheStore::new(self.cache));
        let executor = QueryExecutor::new(Arc::clone(&store), self.retry);
        let mutations = MutationCoordinator::new(executor.clone());
        let bridge = self
            .realtime
            .map(|service| RealtimeBridge::new(service, executor.clone(), self.realtime_config));

        Ok(SyncClient {
            store,
            executor,
            mutations,
            bridge,
            data,
            roles: self.roles,
            user_id: self.user_id.unwrap_or_else(|| "anonymous".to_string()),
        })
    }
}

impl Default for SyncClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
