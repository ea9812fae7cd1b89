// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Async request worker tests.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use ucp_operations::{
    AsyncController, ControllerRegistry, ControllerResult, ErrorDetails, OperationError,
    OperationMethod, OperationRequest, OperationType, ProvisioningState, QueueClient,
    QueueOperationOptions, RequestContext, StatusManager, WorkerConfig,
};

use common::*;

/// Controller that records calls and returns a fixed outcome after `delay`.
struct TestController {
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    delay: Duration,
    outcome: Outcome,
}

#[derive(Clone)]
enum Outcome {
    Succeed,
    Fail(ErrorDetails),
    Error,
}

impl TestController {
    fn new(delay: Duration, outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            delay,
            outcome,
        })
    }

    fn succeeding() -> Arc<Self> {
        Self::new(Duration::ZERO, Outcome::Succeed)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AsyncController for TestController {
    async fn run(
        &self,
        cancel: &CancellationToken,
        _request: &OperationRequest,
    ) -> ucp_operations::Result<ControllerResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.delay) => {}
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match &self.outcome {
            Outcome::Succeed => Ok(ControllerResult::succeeded()),
            Outcome::Fail(details) => Ok(ControllerResult::failed(details.clone())),
            Outcome::Error => Err(OperationError::InvalidRequest("image pull failed".to_string())),
        }
    }
}

fn registry(method: OperationMethod, controller: Arc<TestController>) -> ControllerRegistry {
    let mut registry = ControllerRegistry::new();
    registry.register(
        OperationType::new("Applications.Core/containers", method),
        controller,
    );
    registry
}

async fn queue_put(h: &Harness, name: &str, options: QueueOperationOptions) -> RequestContext {
    let id = container_id(name);
    h.seed(&id, container_body(Some("Succeeded"), &[])).await;
    let ctx = RequestContext::new(id, OperationMethod::Put);
    h.status
        .queue_async_operation(&CancellationToken::new(), &ctx, options)
        .await
        .unwrap();
    ctx
}

#[tokio::test]
async fn test_put_operation_succeeds() {
    let h = Harness::new();
    let controller = TestController::succeeding();
    let ctx = queue_put(&h, "web", QueueOperationOptions::default()).await;

    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, controller.clone()), fast_worker_config());
    let status = h.wait_for_terminal(&ctx.resource_id, ctx.operation_id).await;
    h.wait_for_drain().await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.status, ProvisioningState::Succeeded);
    assert!(status.end_time.is_some());
    assert!(status.error.is_none());
    assert_eq!(h.state(&ctx.resource_id).await, ProvisioningState::Succeeded);
    assert_eq!(controller.calls(), 1);
}

#[tokio::test]
async fn test_delete_operation_removes_resource() {
    let h = Harness::new();
    let controller = TestController::succeeding();
    let id = container_id("web");
    h.seed(&id, container_body(None, &[])).await;
    let ctx = RequestContext::new(id.clone(), OperationMethod::Delete);
    h.status
        .queue_async_operation(&CancellationToken::new(), &ctx, QueueOperationOptions::default())
        .await
        .unwrap();

    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Delete, controller.clone()), fast_worker_config());
    let status = h.wait_for_terminal(&id, ctx.operation_id).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.status, ProvisioningState::Succeeded);
    assert!(h.resource(&id).await.is_none());
}

#[tokio::test]
async fn test_controller_failures_are_recorded() {
    let h = Harness::new();
    let details = ErrorDetails::new("BadRequest", "invalid port");
    let failing = TestController::new(Duration::ZERO, Outcome::Fail(details.clone()));
    let ctx = queue_put(&h, "web", QueueOperationOptions::default()).await;

    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, failing), fast_worker_config());
    let status = h.wait_for_terminal(&ctx.resource_id, ctx.operation_id).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.status, ProvisioningState::Failed);
    assert_eq!(status.error, Some(details));
    assert_eq!(h.state(&ctx.resource_id).await, ProvisioningState::Failed);
}

#[tokio::test]
async fn test_controller_error_fails_operation() {
    let h = Harness::new();
    let erroring = TestController::new(Duration::ZERO, Outcome::Error);
    let ctx = queue_put(&h, "web", QueueOperationOptions::default()).await;

    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, erroring), fast_worker_config());
    let status = h.wait_for_terminal(&ctx.resource_id, ctx.operation_id).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.status, ProvisioningState::Failed);
    let error = status.error.unwrap();
    assert_eq!(error.code, "INVALID_REQUEST");
    assert!(error.message.contains("image pull failed"));
}

#[tokio::test]
async fn test_timeout_cancels_operation() {
    let h = Harness::new();
    let slow = TestController::new(Duration::from_secs(30), Outcome::Succeed);
    let options = QueueOperationOptions {
        operation_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let ctx = queue_put(&h, "web", options).await;

    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, slow), fast_worker_config());
    let status = h.wait_for_terminal(&ctx.resource_id, ctx.operation_id).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.status, ProvisioningState::Canceled);
    assert_eq!(status.error.unwrap().code, "TIMEOUT");
    assert_eq!(h.state(&ctx.resource_id).await, ProvisioningState::Canceled);
}

#[tokio::test]
async fn test_unknown_operation_type_fails() {
    let h = Harness::new();
    let ctx = queue_put(&h, "web", QueueOperationOptions::default()).await;

    let (shutdown, handle) = h.spawn_worker(ControllerRegistry::new(), fast_worker_config());
    let status = h.wait_for_terminal(&ctx.resource_id, ctx.operation_id).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.status, ProvisioningState::Failed);
    assert_eq!(status.error.unwrap().code, "NO_CONTROLLER");
}

#[tokio::test]
async fn test_redelivery_limit_fails_without_running() {
    let h = Harness::with_queue(ucp_operations::InMemoryQueue::with_visibility_timeout(
        Duration::from_millis(50),
    ));
    let controller = TestController::succeeding();
    let ctx = queue_put(&h, "web", QueueOperationOptions::default()).await;

    // A consumer that crashed after leasing the message.
    let cancel = CancellationToken::new();
    h.queue.dequeue(&cancel).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let config = WorkerConfig {
        max_dequeue_count: 1,
        ..fast_worker_config()
    };
    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, controller.clone()), config);
    let status = h.wait_for_terminal(&ctx.resource_id, ctx.operation_id).await;
    h.wait_for_drain().await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.status, ProvisioningState::Failed);
    assert_eq!(status.error.unwrap().code, "DEQUEUE_LIMIT");
    assert_eq!(controller.calls(), 0);
}

#[tokio::test]
async fn test_terminal_status_is_skipped() {
    let h = Harness::new();
    let controller = TestController::succeeding();
    let ctx = queue_put(&h, "web", QueueOperationOptions::default()).await;

    h.status
        .update(
            &CancellationToken::new(),
            &ctx.resource_id,
            ctx.operation_id,
            ProvisioningState::Canceled,
            None,
        )
        .await
        .unwrap();

    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, controller.clone()), fast_worker_config());
    h.wait_for_drain().await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(controller.calls(), 0);
}

#[tokio::test]
async fn test_lease_is_renewed_for_long_operations() {
    let h = Harness::with_queue(ucp_operations::InMemoryQueue::with_visibility_timeout(
        Duration::from_millis(100),
    ));
    let controller = TestController::new(Duration::from_millis(400), Outcome::Succeed);
    let ctx = queue_put(&h, "web", QueueOperationOptions::default()).await;

    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, controller.clone()), fast_worker_config());
    let status = h.wait_for_terminal(&ctx.resource_id, ctx.operation_id).await;
    h.wait_for_drain().await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(status.status, ProvisioningState::Succeeded);
    // Without renewal the message would have been redelivered mid-run.
    assert_eq!(controller.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_is_bounded() {
    let h = Harness::new();
    let controller = TestController::new(Duration::from_millis(100), Outcome::Succeed);
    let mut operations = Vec::new();
    for i in 0..6 {
        operations.push(queue_put(&h, &format!("c{}", i), QueueOperationOptions::default()).await);
    }

    let config = WorkerConfig {
        max_concurrency: 2,
        ..fast_worker_config()
    };
    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, controller.clone()), config);
    for ctx in &operations {
        let status = h.wait_for_terminal(&ctx.resource_id, ctx.operation_id).await;
        assert_eq!(status.status, ProvisioningState::Succeeded);
    }
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(controller.calls(), 6);
    assert!(controller.max_running.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn test_shutdown_leaves_running_operation_queued() {
    let h = Harness::new();
    let controller = TestController::new(Duration::from_secs(30), Outcome::Succeed);
    let ctx = queue_put(&h, "web", QueueOperationOptions::default()).await;

    let (shutdown, handle) = h.spawn_worker(registry(OperationMethod::Put, controller.clone()), fast_worker_config());
    tokio::time::timeout(Duration::from_secs(5), async {
        while controller.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("worker stops promptly")
        .unwrap();

    let status = h
        .status
        .get(&CancellationToken::new(), &ctx.resource_id, ctx.operation_id)
        .await
        .unwrap();
    assert_eq!(status.status, ProvisioningState::Provisioning);
    assert_eq!(h.queue.len().await, 1);
}
