// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Re-provision resources whose connections point at a changed resource.
//!
//! A dependent resource declares its edges in its body:
//!
//! ```json
//! { "properties": { "connections": { "cache": { "source": "/planes/.../redisCaches/cache" } } } }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ucp_store::{GetOptions, Query, QueryOptions, ResourceId, StorageProvider};

use super::{Notification, NotificationFilter};
use crate::context::{OperationMethod, RequestContext};
use crate::error::{OperationError, Result};
use crate::provisioning::{ProvisioningState, provisioning_state};
use crate::statusmanager::{QueueOperationOptions, StatusManager};

/// Resource type of containers.
pub const CONTAINERS_TYPE: &str = "Applications.Core/containers";

/// Root scope watched by default.
pub const DEFAULT_ROOT_SCOPE: &str = "/planes/radius/local";

/// Re-queues resources of one type that are connected to a changed resource.
pub struct ConnectionsFilter {
    storage: Arc<StorageProvider>,
    status: Arc<dyn StatusManager>,
    resource_type: String,
    root_scope: String,
    options: QueueOperationOptions,
}

impl ConnectionsFilter {
    /// Watch resources of `resource_type` anywhere under `root_scope`.
    pub fn new(
        storage: Arc<StorageProvider>,
        status: Arc<dyn StatusManager>,
        resource_type: impl Into<String>,
        root_scope: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            status,
            resource_type: resource_type.into(),
            root_scope: root_scope.into(),
            options: QueueOperationOptions {
                target_state: Some(ProvisioningState::Updating),
                ..Default::default()
            },
        }
    }

    /// Watch containers in the default local plane.
    pub fn containers(storage: Arc<StorageProvider>, status: Arc<dyn StatusManager>) -> Self {
        Self::new(storage, status, CONTAINERS_TYPE, DEFAULT_ROOT_SCOPE)
    }

    /// Override the queue options. The target state is always `Updating`.
    pub fn with_options(mut self, options: QueueOperationOptions) -> Self {
        self.options = QueueOperationOptions {
            target_state: Some(ProvisioningState::Updating),
            ..options
        };
        self
    }

    /// IDs of watched resources with a connection to `id`, each listed once.
    pub async fn impacted_resources(
        &self,
        cancel: &CancellationToken,
        id: &ResourceId,
    ) -> Result<Vec<ResourceId>> {
        let client = self.storage.get_storage_client(&self.resource_type).await?;
        let query = Query::resources(self.root_scope.clone())
            .recursive()
            .with_resource_type(self.resource_type.clone());
        let result = client.query(cancel, &query, QueryOptions::default()).await?;

        let mut impacted: Vec<ResourceId> = Vec::new();
        for obj in &result.items {
            if !connections(&obj.data).iter().any(|source| source == id) {
                continue;
            }
            let dependent = ResourceId::parse(obj.id())?;
            if !impacted.contains(&dependent) {
                impacted.push(dependent);
            }
        }

        debug!(id = %id, candidates = result.items.len(), impacted = impacted.len(), "Resolved connected resources");
        Ok(impacted)
    }

    /// Re-queue one dependent resource.
    async fn notify(&self, cancel: &CancellationToken, id: &ResourceId) -> Result<()> {
        let client = self.storage.get_storage_client(&id.type_name()).await?;
        let resource = client.get(cancel, id.as_str(), GetOptions::default()).await?;

        let state = provisioning_state(&resource.data)?;
        if !state.is_terminal() {
            return Err(OperationError::NotTerminal {
                id: id.to_string(),
                state,
            });
        }

        let ctx = RequestContext::new(id.clone(), OperationMethod::Put);
        self.status
            .queue_async_operation(cancel, &ctx, self.options.clone())
            .await?;
        info!(id = %id, operation_id = %ctx.operation_id, "Queued update of connected resource");
        Ok(())
    }
}

/// Sources of `properties.connections.*.source`. Unparsable sources are skipped.
pub fn connections(data: &Value) -> Vec<ResourceId> {
    let Some(connections) = data
        .get("properties")
        .and_then(|p| p.get("connections"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    connections
        .iter()
        .filter_map(|(name, connection)| {
            let source = connection.get("source")?.as_str()?;
            match ResourceId::parse(source) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(connection = %name, source, error = %e, "Ignoring connection with an invalid source");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl NotificationFilter for ConnectionsFilter {
    async fn send(&self, cancel: &CancellationToken, notification: &Notification) -> Result<()> {
        let impacted = self.impacted_resources(cancel, &notification.id).await?;
        for id in &impacted {
            self.notify(cancel, id).await?;
        }
        Ok(())
    }
}
