// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Storage client construction.
//!
//! Controllers ask the provider for a client per resource type. Clients are
//! built once and cached, and every client of a provider shares the same
//! backing object API so cross-type queries see each other's records.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::info;

use crate::client::StorageClient;
use crate::config::{Config, StorageBackend};
use crate::error::Result;
use crate::objectstore::{InMemoryObjectApi, ObjectApi, ObjectStoreClient, SqliteObjectApi};

/// Builds and caches storage clients.
pub struct StorageProvider {
    config: Config,
    api: OnceCell<Arc<dyn ObjectApi>>,
    clients: Mutex<HashMap<String, Arc<dyn StorageClient>>>,
}

impl StorageProvider {
    /// Create a provider that opens its backend lazily from `config`.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            api: OnceCell::new(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// An in-memory provider with default settings.
    pub fn in_memory() -> Self {
        Self::new(Config::default())
    }

    /// Use an already constructed object API instead of `config.backend`.
    pub fn with_object_api(config: Config, api: Arc<dyn ObjectApi>) -> Self {
        Self {
            config,
            api: OnceCell::new_with(Some(api)),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The storage configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn object_api(&self) -> Result<Arc<dyn ObjectApi>> {
        let api = self
            .api
            .get_or_try_init(|| async {
                let api: Arc<dyn ObjectApi> = match &self.config.backend {
                    StorageBackend::InMemory => Arc::new(InMemoryObjectApi::new()),
                    StorageBackend::Sqlite { path } => Arc::new(
                        SqliteObjectApi::from_path(path, self.config.namespace.clone()).await?,
                    ),
                };
                info!(backend = ?self.config.backend, namespace = %self.config.namespace, "Storage backend initialized");
                Ok::<_, crate::error::StoreError>(api)
            })
            .await?;
        Ok(api.clone())
    }

    /// Get the storage client for a resource type.
    pub async fn get_storage_client(&self, resource_type: &str) -> Result<Arc<dyn StorageClient>> {
        let key = resource_type.to_lowercase();
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let api = self.object_api().await?;
        let client: Arc<dyn StorageClient> =
            Arc::new(ObjectStoreClient::new(api).with_retry_count(self.config.retry_count));
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{GetOptions, SaveOptions};
    use crate::object::Object;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_clients_are_cached_per_type() {
        let provider = StorageProvider::in_memory();
        let a = provider
            .get_storage_client("Applications.Core/containers")
            .await
            .unwrap();
        let b = provider
            .get_storage_client("applications.core/CONTAINERS")
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_clients_share_backend() {
        let provider = StorageProvider::in_memory();
        let cancel = CancellationToken::new();
        let id = "/planes/radius/local/resourceGroups/rg/providers/Applications.Core/containers/c";

        let containers = provider
            .get_storage_client("Applications.Core/containers")
            .await
            .unwrap();
        let mut obj = Object::new(id, json!({"v": 1}));
        containers
            .save(&cancel, &mut obj, SaveOptions::default())
            .await
            .unwrap();

        let other = provider
            .get_storage_client("Applications.Core/gateways")
            .await
            .unwrap();
        let read = other.get(&cancel, id, GetOptions::default()).await.unwrap();
        assert_eq!(read.etag(), obj.etag());
    }

    #[tokio::test]
    async fn test_sqlite_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StorageProvider::new(Config {
            backend: StorageBackend::Sqlite {
                path: dir.path().join("nested").join("ucp.db"),
            },
            ..Default::default()
        });

        let client = provider
            .get_storage_client("Applications.Core/containers")
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let mut obj = Object::new(
            "/planes/radius/local/resourceGroups/rg/providers/Applications.Core/containers/c",
            json!({"v": 1}),
        );
        client
            .save(&cancel, &mut obj, SaveOptions::default())
            .await
            .unwrap();
        assert!(dir.path().join("nested").join("ucp.db").exists());
    }
}
