// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Async request processing worker.
//!
//! Pulls operation requests off the queue and runs the controller registered
//! for each operation type, keeping the status record and the resource's
//! provisioning state in step:
//!
//! ```text
//! dequeue ──► status terminal? ──yes──► finish message
//!                  │ no
//!                  ▼
//!        too many deliveries / expired / no controller ──► Failed|Canceled
//!                  │
//!                  ▼
//!        status Provisioning ──► controller.run (timeout) ──► terminal state
//!                                                          ──► finish message
//! ```
//!
//! While a controller runs, the message lease is renewed in the background.
//! On shutdown in-flight controllers are cancelled and their messages are
//! left unfinished so another worker picks them up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ucp_store::{DeleteOptions, GetOptions, SaveOptions, StorageProvider};

use crate::context::{OperationMethod, OperationRequest, OperationType};
use crate::error::{OperationError, Result};
use crate::provisioning::{ProvisioningState, set_provisioning_state};
use crate::queue::{Message, QueueClient, QueueError};
use crate::statusmanager::{ErrorDetails, StatusManager};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Operations run in parallel.
    pub max_concurrency: usize,
    /// Deliveries of one message before its operation is failed.
    pub max_dequeue_count: u32,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_dequeue_count: 5,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Outcome of a controller run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerResult {
    /// Terminal state to record.
    pub state: ProvisioningState,
    /// Error to record with a failed or canceled state.
    pub error: Option<ErrorDetails>,
}

impl ControllerResult {
    /// The operation completed.
    pub fn succeeded() -> Self {
        Self {
            state: ProvisioningState::Succeeded,
            error: None,
        }
    }

    /// The operation failed.
    pub fn failed(error: ErrorDetails) -> Self {
        Self {
            state: ProvisioningState::Failed,
            error: Some(error),
        }
    }

    /// The operation was canceled.
    pub fn canceled(error: ErrorDetails) -> Self {
        Self {
            state: ProvisioningState::Canceled,
            error: Some(error),
        }
    }
}

/// Performs the actual work of one operation type.
#[async_trait]
pub trait AsyncController: Send + Sync {
    /// Run an operation. `cancel` fires on worker shutdown.
    async fn run(
        &self,
        cancel: &CancellationToken,
        request: &OperationRequest,
    ) -> Result<ControllerResult>;
}

/// Controllers keyed by operation type.
#[derive(Default, Clone)]
pub struct ControllerRegistry {
    controllers: HashMap<String, Arc<dyn AsyncController>>,
}

impl ControllerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `controller` for `operation_type`, replacing any previous one.
    pub fn register(&mut self, operation_type: OperationType, controller: Arc<dyn AsyncController>) {
        self.controllers
            .insert(operation_type.to_string(), controller);
    }

    /// Look up the controller for `operation_type`.
    pub fn get(&self, operation_type: &OperationType) -> Option<Arc<dyn AsyncController>> {
        self.controllers.get(&operation_type.to_string()).cloned()
    }
}

/// Worker that drains the operation queue.
#[derive(Clone)]
pub struct AsyncRequestProcessWorker {
    config: WorkerConfig,
    status: Arc<dyn StatusManager>,
    storage: Arc<StorageProvider>,
    queue: Arc<dyn QueueClient>,
    registry: Arc<ControllerRegistry>,
}

impl AsyncRequestProcessWorker {
    /// Create a worker.
    pub fn new(
        config: WorkerConfig,
        status: Arc<dyn StatusManager>,
        storage: Arc<StorageProvider>,
        queue: Arc<dyn QueueClient>,
        registry: ControllerRegistry,
    ) -> Self {
        Self {
            config,
            status,
            storage,
            queue,
            registry: Arc::new(registry),
        }
    }

    /// Run until `shutdown` fires, then wait for in-flight operations.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            max_concurrency = self.config.max_concurrency,
            max_dequeue_count = self.config.max_dequeue_count,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Async request worker started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut in_flight = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let dequeued = tokio::select! {
                _ = shutdown.cancelled() => break,
                dequeued = self.queue.dequeue(&shutdown) => dequeued,
            };

            match dequeued {
                Ok(Some(message)) => {
                    let worker = self.clone();
                    let cancel = shutdown.child_token();
                    in_flight.spawn(async move {
                        worker.process(&cancel, message).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "Failed to dequeue operation request");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }

            // Reap finished tasks so the set does not grow unbounded.
            while in_flight.try_join_next().is_some() {}
        }

        info!(in_flight = in_flight.len(), "Async request worker shutting down");
        while in_flight.join_next().await.is_some() {}
        info!("Async request worker stopped");
    }

    /// Handle one delivered message.
    async fn process(&self, cancel: &CancellationToken, message: Message) {
        let request: OperationRequest = match serde_json::from_value(message.data.clone()) {
            Ok(request) => request,
            Err(e) => {
                // Poison message: it will never parse, so drop it.
                error!(message_id = %message.id, error = %e, "Dropping malformed operation request");
                self.finish(cancel, &message).await;
                return;
            }
        };

        let lease = Arc::new(Mutex::new(message));
        let renew_stop = cancel.child_token();
        let renewer = tokio::spawn(renew_lease(
            self.queue.clone(),
            lease.clone(),
            renew_stop.clone(),
        ));

        let completed = self.handle(cancel, &request, &lease).await;

        stop_renewer(renew_stop, renewer, &request).await;

        match completed {
            Ok(true) => {
                let message = lease.lock().await;
                self.finish(cancel, &message).await;
            }
            Ok(false) => {
                debug!(operation_id = %request.operation_id, "Operation interrupted, leaving message for redelivery");
            }
            Err(e) => {
                error!(
                    operation_id = %request.operation_id,
                    resource_id = %request.resource_id,
                    error = %e,
                    "Failed to process async operation"
                );
            }
        }
    }

    /// Drive one operation to a terminal state.
    ///
    /// Returns `Ok(false)` when the worker was shut down mid-operation.
    async fn handle(
        &self,
        cancel: &CancellationToken,
        request: &OperationRequest,
        lease: &Arc<Mutex<Message>>,
    ) -> Result<bool> {
        let status = match self
            .status
            .get(cancel, &request.resource_id, request.operation_id)
            .await
        {
            Ok(status) => status,
            Err(e) if e.is_not_found() => {
                warn!(operation_id = %request.operation_id, "Operation status not found, dropping request");
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        if status.status.is_terminal() {
            debug!(operation_id = %request.operation_id, state = %status.status, "Operation already completed");
            return Ok(true);
        }

        let dequeue_count = lease.lock().await.dequeue_count;
        if dequeue_count > self.config.max_dequeue_count {
            let details = ErrorDetails::new(
                "DEQUEUE_LIMIT",
                format!(
                    "operation exceeded the maximum of {} deliveries",
                    self.config.max_dequeue_count
                ),
            );
            self.complete(cancel, request, ControllerResult::failed(details))
                .await?;
            return Ok(true);
        }

        if request.is_expired(Utc::now()) {
            let err = OperationError::Timeout(request.operation_timeout());
            self.complete(cancel, request, ControllerResult::canceled((&err).into()))
                .await?;
            return Ok(true);
        }

        let Some(controller) = self.registry.get(&request.operation_type) else {
            let details = ErrorDetails::new(
                "NO_CONTROLLER",
                format!("no controller registered for {}", request.operation_type),
            );
            self.complete(cancel, request, ControllerResult::failed(details))
                .await?;
            return Ok(true);
        };

        if status.status != ProvisioningState::Provisioning {
            self.status
                .update(
                    cancel,
                    &request.resource_id,
                    request.operation_id,
                    ProvisioningState::Provisioning,
                    None,
                )
                .await?;
        }

        debug!(operation_id = %request.operation_id, operation_type = %request.operation_type, dequeue_count, "Running controller");
        let remaining = request.remaining(Utc::now());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(false),
            outcome = tokio::time::timeout(remaining, controller.run(cancel, request)) => outcome,
        };

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ControllerResult::failed((&e).into()),
            Err(_) => {
                let err = OperationError::Timeout(request.operation_timeout());
                warn!(operation_id = %request.operation_id, error = %err, "Controller timed out");
                ControllerResult::canceled((&err).into())
            }
        };

        self.complete(cancel, request, result).await?;
        Ok(true)
    }

    /// Record a terminal result on the resource and the status.
    async fn complete(
        &self,
        cancel: &CancellationToken,
        request: &OperationRequest,
        result: ControllerResult,
    ) -> Result<()> {
        let client = self
            .storage
            .get_storage_client(&request.resource_id.type_name())
            .await?;
        let id = request.resource_id.as_str();

        if request.operation_type.method == OperationMethod::Delete
            && result.state == ProvisioningState::Succeeded
        {
            match client.delete(cancel, id, DeleteOptions::default()).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            match client.get(cancel, id, GetOptions::default()).await {
                Ok(mut resource) => {
                    let etag = resource.etag().to_string();
                    set_provisioning_state(&mut resource.data, result.state)?;
                    client
                        .save(cancel, &mut resource, SaveOptions::with_etag(etag))
                        .await?;
                }
                Err(e) if e.is_not_found() => {
                    warn!(resource_id = %request.resource_id, "Resource disappeared before its operation completed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        match self
            .status
            .update(
                cancel,
                &request.resource_id,
                request.operation_id,
                result.state,
                result.error,
            )
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                warn!(operation_id = %request.operation_id, "Operation status was already terminal");
            }
            Err(e) => return Err(e),
        }

        info!(
            operation_id = %request.operation_id,
            resource_id = %request.resource_id,
            operation_type = %request.operation_type,
            state = %result.state,
            "Async operation completed"
        );
        Ok(())
    }

    async fn finish(&self, cancel: &CancellationToken, message: &Message) {
        match self.queue.finish_message(cancel, message).await {
            Ok(()) => {}
            Err(QueueError::LeaseLost { id }) => {
                warn!(message_id = %id, "Lease lost before the message was finished");
            }
            Err(e) => {
                error!(message_id = %message.id, error = %e, "Failed to finish message");
            }
        }
    }
}

/// Keep extending the lease on `lease` until `stop` fires.
async fn renew_lease(
    queue: Arc<dyn QueueClient>,
    lease: Arc<Mutex<Message>>,
    stop: CancellationToken,
) {
    loop {
        let remaining = {
            let message = lease.lock().await;
            (message.next_visible_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        };

        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(remaining / 2) => {}
        }

        let mut message = lease.lock().await;
        if let Err(e) = queue.extend_message(&stop, &mut message).await {
            if !stop.is_cancelled() {
                warn!(message_id = %message.id, error = %e, "Failed to extend message lease");
            }
            return;
        }
    }
}

/// Stop the lease renewer and wait for it. A renewer that died early is logged,
/// since the operation may have run past its lease.
async fn stop_renewer(stop: CancellationToken, renewer: JoinHandle<()>, request: &OperationRequest) {
    stop.cancel();
    if let Err(e) = renewer.await {
        warn!(
            operation_id = %request.operation_id,
            resource_id = %request.resource_id,
            error = %e,
            "Lease renewer task failed"
        );
    }
}
