// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Async operation status tracking and queueing.
//!
//! A mutation is accepted in three writes: the resource moves into a
//! non-terminal provisioning state (guarded by the ETag it was read with), an
//! `Accepted` status record is created, and a request message is enqueued.
//! Status records live next to the resources they track:
//!
//! ```text
//! {rootScope}/providers/{namespace}/locations/{location}/operationStatuses/{operationId}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use ucp_store::{
    DeleteOptions, GetOptions, Object, ResourceId, SaveOptions, StorageClient, StorageProvider,
};
use uuid::Uuid;

use crate::context::{OperationRequest, OperationType, RequestContext};
use crate::error::{OperationError, Result};
use crate::provisioning::{ProvisioningState, provisioning_state, set_provisioning_state};
use crate::queue::{Message, QueueClient};

/// Default time an operation may run.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default poll interval advertised to clients.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Upper bound on each rollback write, which cannot rely on the request's token.
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(30);

const OPERATION_STATUSES: &str = "operationStatuses";
const LOCATIONS: &str = "locations";

/// Options for [`StatusManager::queue_async_operation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOperationOptions {
    /// How long the operation may run before it is canceled.
    pub operation_timeout: Duration,
    /// Poll interval advertised to clients.
    pub retry_after: Duration,
    /// State the resource moves into; defaults to the method's target state.
    pub target_state: Option<ProvisioningState>,
}

impl Default for QueueOperationOptions {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            retry_after: DEFAULT_RETRY_AFTER,
            target_state: None,
        }
    }
}

/// Error recorded on a failed or canceled operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorDetails {
    /// Create error details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&OperationError> for ErrorDetails {
    fn from(err: &OperationError) -> Self {
        Self::new(err.error_code(), err.to_string())
    }
}

/// Stored status of one async operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperationStatus {
    /// Status record ID.
    pub id: String,
    /// Operation ID.
    pub name: String,
    /// Resource the operation acts on.
    pub resource_id: String,
    /// Resource type and method.
    pub operation_type: OperationType,
    /// Current state.
    pub status: ProvisioningState,
    /// When the operation was accepted.
    pub start_time: DateTime<Utc>,
    /// When the operation reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Error of a failed or canceled operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    /// Poll interval advertised to clients, in seconds.
    pub retry_after_secs: u64,
}

/// Build the status record ID for an operation on `resource_id`.
pub fn operation_status_id(
    resource_id: &ResourceId,
    location: &str,
    operation_id: Uuid,
) -> Result<ResourceId> {
    let namespace = resource_id.provider_namespace().ok_or_else(|| {
        OperationError::InvalidRequest(format!(
            "resource {} has no provider namespace",
            resource_id
        ))
    })?;
    let id = format!(
        "{}/providers/{}/{}/{}/{}/{}",
        resource_id.root_scope(),
        namespace,
        LOCATIONS,
        location,
        OPERATION_STATUSES,
        operation_id
    );
    Ok(ResourceId::parse(&id)?)
}

/// Tracks async operation statuses and hands operations to workers.
#[async_trait]
pub trait StatusManager: Send + Sync {
    /// Read the status of an operation on `resource_id`.
    async fn get(
        &self,
        cancel: &CancellationToken,
        resource_id: &ResourceId,
        operation_id: Uuid,
    ) -> Result<AsyncOperationStatus>;

    /// Move an operation to `state`. Terminal statuses are immutable.
    async fn update(
        &self,
        cancel: &CancellationToken,
        resource_id: &ResourceId,
        operation_id: Uuid,
        state: ProvisioningState,
        error: Option<ErrorDetails>,
    ) -> Result<()>;

    /// Remove a status record.
    async fn delete(
        &self,
        cancel: &CancellationToken,
        resource_id: &ResourceId,
        operation_id: Uuid,
    ) -> Result<()>;

    /// Accept a mutation of `ctx.resource_id` and queue it for a worker.
    ///
    /// Fails with [`OperationError::Conflict`] while the resource is mid-operation.
    async fn queue_async_operation(
        &self,
        cancel: &CancellationToken,
        ctx: &RequestContext,
        options: QueueOperationOptions,
    ) -> Result<()>;
}

/// [`StatusManager`] over a storage provider and a queue.
pub struct DefaultStatusManager {
    storage: Arc<StorageProvider>,
    queue: Arc<dyn QueueClient>,
    location: String,
}

impl DefaultStatusManager {
    /// Create a status manager writing status records under `location`.
    pub fn new(
        storage: Arc<StorageProvider>,
        queue: Arc<dyn QueueClient>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            queue,
            location: location.into(),
        }
    }

    async fn status_client(
        &self,
        status_id: &ResourceId,
    ) -> Result<Arc<dyn StorageClient>> {
        Ok(self.storage.get_storage_client(&status_id.type_name()).await?)
    }

    async fn read_status(
        &self,
        cancel: &CancellationToken,
        resource_id: &ResourceId,
        operation_id: Uuid,
    ) -> Result<(Arc<dyn StorageClient>, Object, AsyncOperationStatus)> {
        let status_id = operation_status_id(resource_id, &self.location, operation_id)?;
        let client = self.status_client(&status_id).await?;
        let obj = client
            .get(cancel, status_id.as_str(), GetOptions::default())
            .await?;
        let status: AsyncOperationStatus = serde_json::from_value(obj.data.clone())?;
        Ok((client, obj, status))
    }

    /// Write the `Accepted` record and enqueue the request.
    async fn accept(
        &self,
        cancel: &CancellationToken,
        ctx: &RequestContext,
        options: &QueueOperationOptions,
    ) -> Result<()> {
        let status_id = operation_status_id(&ctx.resource_id, &self.location, ctx.operation_id)?;
        let status = AsyncOperationStatus {
            id: status_id.to_string(),
            name: ctx.operation_id.to_string(),
            resource_id: ctx.resource_id.to_string(),
            operation_type: ctx.operation_type.clone(),
            status: ProvisioningState::Accepted,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            retry_after_secs: options.retry_after.as_secs(),
        };
        let mut obj = Object::new(status_id.as_str(), serde_json::to_value(&status)?)
            .with_api_version(ctx.api_version.clone());
        self.status_client(&status_id)
            .await?
            .save(cancel, &mut obj, SaveOptions::default())
            .await?;

        let request = OperationRequest::new(ctx, options);
        let message = Message::new(serde_json::to_value(&request)?);
        self.queue.enqueue(cancel, message).await?;
        Ok(())
    }

    /// Put the resource back into a terminal state after a failed accept.
    /// Put the resource back into `Failed` and drop the status of an operation
    /// that never reached the queue.
    ///
    /// Runs on its own token: the request's token may already be cancelled,
    /// which is often why queuing failed.
    async fn rollback(
        &self,
        ctx: &RequestContext,
        client: &Arc<dyn StorageClient>,
        mut resource: Object,
        cause: OperationError,
    ) -> OperationError {
        warn!(
            resource_id = %ctx.resource_id,
            operation_id = %ctx.operation_id,
            error = %cause,
            "Failed to queue async operation, rolling back to Failed"
        );

        let detached = CancellationToken::new();
        let saved = match set_provisioning_state(&mut resource.data, ProvisioningState::Failed) {
            Ok(()) => {
                let etag = resource.etag().to_string();
                let save = client.save(&detached, &mut resource, SaveOptions::with_etag(etag));
                match tokio::time::timeout(ROLLBACK_TIMEOUT, save).await {
                    Ok(result) => result.map_err(OperationError::from),
                    Err(_) => Err(OperationError::Timeout(ROLLBACK_TIMEOUT)),
                }
            }
            Err(err) => Err(err),
        };

        if let Err(rollback) = saved {
            error!(
                resource_id = %ctx.resource_id,
                operation_id = %ctx.operation_id,
                error = %rollback,
                "Rollback failed, resource left in a non-terminal state"
            );
            return OperationError::RollbackFailed {
                resource_id: ctx.resource_id.to_string(),
                cause: Box::new(cause),
                rollback: Box::new(rollback),
            };
        }

        let cleanup = self.delete(&detached, &ctx.resource_id, ctx.operation_id);
        let cleaned = match tokio::time::timeout(ROLLBACK_TIMEOUT, cleanup).await {
            Ok(result) => result,
            Err(_) => Err(OperationError::Timeout(ROLLBACK_TIMEOUT)),
        };
        if let Err(err) = cleaned
            && !err.is_not_found()
        {
            warn!(operation_id = %ctx.operation_id, error = %err, "Failed to remove status of rolled back operation");
        }
        cause
    }
}

#[async_trait]
impl StatusManager for DefaultStatusManager {
    async fn get(
        &self,
        cancel: &CancellationToken,
        resource_id: &ResourceId,
        operation_id: Uuid,
    ) -> Result<AsyncOperationStatus> {
        let (_, _, status) = self.read_status(cancel, resource_id, operation_id).await?;
        Ok(status)
    }

    async fn update(
        &self,
        cancel: &CancellationToken,
        resource_id: &ResourceId,
        operation_id: Uuid,
        state: ProvisioningState,
        error: Option<ErrorDetails>,
    ) -> Result<()> {
        let (client, mut obj, mut status) =
            self.read_status(cancel, resource_id, operation_id).await?;
        if status.status.is_terminal() {
            return Err(OperationError::conflict(format!(
                "operation {} already completed with state {}",
                operation_id, status.status
            )));
        }

        status.status = state;
        if state.is_terminal() {
            status.end_time = Some(Utc::now());
        }
        if error.is_some() {
            status.error = error;
        }

        let etag = obj.etag().to_string();
        obj.data = serde_json::to_value(&status)?;
        client
            .save(cancel, &mut obj, SaveOptions::with_etag(etag))
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        cancel: &CancellationToken,
        resource_id: &ResourceId,
        operation_id: Uuid,
    ) -> Result<()> {
        let status_id = operation_status_id(resource_id, &self.location, operation_id)?;
        self.status_client(&status_id)
            .await?
            .delete(cancel, status_id.as_str(), DeleteOptions::default())
            .await?;
        Ok(())
    }

    async fn queue_async_operation(
        &self,
        cancel: &CancellationToken,
        ctx: &RequestContext,
        options: QueueOperationOptions,
    ) -> Result<()> {
        let client = self
            .storage
            .get_storage_client(&ctx.resource_id.type_name())
            .await?;
        let mut resource = client
            .get(cancel, ctx.resource_id.as_str(), GetOptions::default())
            .await?;

        let current = provisioning_state(&resource.data)?;
        if !current.is_terminal() {
            return Err(OperationError::conflict(format!(
                "resource {} is in state {}; wait for the running operation to complete",
                ctx.resource_id, current
            )));
        }

        let target = options
            .target_state
            .unwrap_or_else(|| ctx.operation_type.method.target_state());
        let etag = resource.etag().to_string();
        set_provisioning_state(&mut resource.data, target)?;
        client
            .save(cancel, &mut resource, SaveOptions::with_etag(etag))
            .await?;

        if let Err(cause) = self.accept(cancel, ctx, &options).await {
            return Err(self.rollback(ctx, &client, resource, cause).await);
        }

        info!(
            resource_id = %ctx.resource_id,
            operation_id = %ctx.operation_id,
            operation_type = %ctx.operation_type,
            state = %target,
            "Async operation queued"
        );
        Ok(())
    }
}
