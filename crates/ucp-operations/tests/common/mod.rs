// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for ucp-operations integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ucp_operations::provisioning::provisioning_state;
use ucp_operations::{
    AsyncOperationStatus, AsyncRequestProcessWorker, ControllerRegistry, DefaultStatusManager,
    InMemoryQueue, ProvisioningState, StatusManager, WorkerConfig,
};
use ucp_store::config::Config;
use ucp_store::objectstore::InMemoryObjectApi;
use ucp_store::{GetOptions, Object, ResourceId, SaveOptions, StorageProvider};
use uuid::Uuid;

pub const GROUP: &str = "/planes/radius/local/resourceGroups/rg";

pub fn container_id(name: &str) -> ResourceId {
    format!("{}/providers/Applications.Core/containers/{}", GROUP, name)
        .parse()
        .unwrap()
}

pub fn cache_id(name: &str) -> ResourceId {
    format!("{}/providers/Applications.Datastores/redisCaches/{}", GROUP, name)
        .parse()
        .unwrap()
}

/// A container body in `state`, connected to each of `sources`.
pub fn container_body(state: Option<&str>, sources: &[&ResourceId]) -> Value {
    let connections: serde_json::Map<String, Value> = sources
        .iter()
        .enumerate()
        .map(|(i, id)| (format!("conn{}", i), json!({"source": id.to_string()})))
        .collect();
    let mut body = json!({"properties": {"connections": connections, "image": "nginx"}});
    if let Some(state) = state {
        body["properties"]["provisioningState"] = json!(state);
    }
    body
}

/// Storage, queue and status manager wired together in memory.
pub struct Harness {
    pub api: Arc<InMemoryObjectApi>,
    pub storage: Arc<StorageProvider>,
    pub queue: Arc<InMemoryQueue>,
    pub status: Arc<DefaultStatusManager>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_queue(InMemoryQueue::new())
    }

    pub fn with_queue(queue: InMemoryQueue) -> Self {
        let api = Arc::new(InMemoryObjectApi::new());
        let storage = Arc::new(StorageProvider::with_object_api(Config::default(), api.clone()));
        let queue = Arc::new(queue);
        let status = Arc::new(DefaultStatusManager::new(
            storage.clone(),
            queue.clone(),
            "global",
        ));
        Self {
            api,
            storage,
            queue,
            status,
        }
    }

    pub async fn seed(&self, id: &ResourceId, data: Value) -> Object {
        let client = self.storage.get_storage_client(&id.type_name()).await.unwrap();
        let mut obj = Object::new(id.as_str(), data);
        client
            .save(&CancellationToken::new(), &mut obj, SaveOptions::default())
            .await
            .unwrap();
        obj
    }

    pub async fn resource(&self, id: &ResourceId) -> Option<Object> {
        let client = self.storage.get_storage_client(&id.type_name()).await.unwrap();
        match client
            .get(&CancellationToken::new(), id.as_str(), GetOptions::default())
            .await
        {
            Ok(obj) => Some(obj),
            Err(e) if e.is_not_found() => None,
            Err(e) => panic!("unexpected storage error: {}", e),
        }
    }

    pub async fn state(&self, id: &ResourceId) -> ProvisioningState {
        let obj = self.resource(id).await.expect("resource exists");
        provisioning_state(&obj.data).unwrap()
    }

    pub fn worker(&self, registry: ControllerRegistry, config: WorkerConfig) -> AsyncRequestProcessWorker {
        AsyncRequestProcessWorker::new(
            config,
            self.status.clone(),
            self.storage.clone(),
            self.queue.clone(),
            registry,
        )
    }

    /// Run a worker in the background until the returned token is cancelled.
    pub fn spawn_worker(
        &self,
        registry: ControllerRegistry,
        config: WorkerConfig,
    ) -> (CancellationToken, JoinHandle<()>) {
        let worker = self.worker(registry, config);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move { worker.run(token).await });
        (shutdown, handle)
    }

    /// Poll until the operation reaches a terminal state.
    pub async fn wait_for_terminal(
        &self,
        resource_id: &ResourceId,
        operation_id: Uuid,
    ) -> AsyncOperationStatus {
        let cancel = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(status) = self.status.get(&cancel, resource_id, operation_id).await
                    && status.status.is_terminal()
                {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("operation did not complete in time")
    }

    /// Poll until the queue is empty.
    pub async fn wait_for_drain(&self) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !self.queue.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue did not drain in time")
    }
}

pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        max_concurrency: 4,
        max_dequeue_count: 5,
        poll_interval: Duration::from_millis(10),
    }
}
