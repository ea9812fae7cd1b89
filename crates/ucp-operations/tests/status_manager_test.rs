// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status manager tests: accepting, rejecting and rolling back operations.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use ucp_operations::{
    DefaultStatusManager, ErrorDetails, Message, OperationError, OperationMethod,
    OperationRequest, ProvisioningState, QueueClient, QueueError, QueueOperationOptions,
    RequestContext, StatusManager,
};
use ucp_store::objectstore::InMemoryObjectApi;

use common::*;

#[tokio::test]
async fn test_queue_from_succeeded_then_reject_second() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let id = container_id("web");
    h.seed(&id, container_body(Some("Succeeded"), &[])).await;

    let ctx = RequestContext::new(id.clone(), OperationMethod::Put);
    h.status
        .queue_async_operation(&cancel, &ctx, QueueOperationOptions::default())
        .await
        .unwrap();
    assert_eq!(h.state(&id).await, ProvisioningState::Provisioning);

    let status = h.status.get(&cancel, &id, ctx.operation_id).await.unwrap();
    assert_eq!(status.status, ProvisioningState::Accepted);
    assert_eq!(status.name, ctx.operation_id.to_string());
    assert_eq!(status.resource_id, id.to_string());
    assert_eq!(status.retry_after_secs, 60);
    assert!(status.end_time.is_none());

    let messages = h.queue.messages().await;
    assert_eq!(messages.len(), 1);
    let request: OperationRequest = serde_json::from_value(messages[0].data.clone()).unwrap();
    assert_eq!(request.operation_id, ctx.operation_id);
    assert_eq!(request.resource_id, id);
    assert_eq!(request.operation_timeout(), Duration::from_secs(3600));

    let second = RequestContext::new(id.clone(), OperationMethod::Put);
    let err = h
        .status
        .queue_async_operation(&cancel, &second, QueueOperationOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "{:?}", err);
    assert_eq!(h.queue.len().await, 1);
    assert!(
        h.status
            .get(&cancel, &id, second.operation_id)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test]
async fn test_resource_without_state_counts_as_succeeded() {
    let h = Harness::new();
    let id = container_id("web");
    h.seed(&id, json!({"name": "web"})).await;

    let ctx = RequestContext::new(id.clone(), OperationMethod::Patch);
    h.status
        .queue_async_operation(&CancellationToken::new(), &ctx, QueueOperationOptions::default())
        .await
        .unwrap();

    let obj = h.resource(&id).await.unwrap();
    assert_eq!(obj.data["name"], "web");
    assert_eq!(obj.data["properties"]["provisioningState"], "Provisioning");
}

#[tokio::test]
async fn test_delete_moves_to_deleting_and_override_wins() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let a = container_id("a");
    let b = container_id("b");
    h.seed(&a, container_body(Some("Failed"), &[])).await;
    h.seed(&b, container_body(Some("Canceled"), &[])).await;

    let ctx = RequestContext::new(a.clone(), OperationMethod::Delete);
    h.status
        .queue_async_operation(&cancel, &ctx, QueueOperationOptions::default())
        .await
        .unwrap();
    assert_eq!(h.state(&a).await, ProvisioningState::Deleting);

    let ctx = RequestContext::new(b.clone(), OperationMethod::Put);
    let options = QueueOperationOptions {
        target_state: Some(ProvisioningState::Updating),
        ..Default::default()
    };
    h.status.queue_async_operation(&cancel, &ctx, options).await.unwrap();
    assert_eq!(h.state(&b).await, ProvisioningState::Updating);
}

#[tokio::test]
async fn test_queue_missing_resource_is_not_found() {
    let h = Harness::new();
    let ctx = RequestContext::new(container_id("ghost"), OperationMethod::Put);

    let err = h
        .status
        .queue_async_operation(&CancellationToken::new(), &ctx, QueueOperationOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.queue.is_empty().await);
}

#[tokio::test]
async fn test_enqueue_failure_rolls_back_to_failed() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let id = container_id("web");
    h.seed(&id, container_body(Some("Succeeded"), &[])).await;

    h.queue.fail_enqueue(true).await;
    let ctx = RequestContext::new(id.clone(), OperationMethod::Put);
    let err = h
        .status
        .queue_async_operation(&cancel, &ctx, QueueOperationOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, OperationError::Queue(QueueError::Unavailable(_))));
    assert_eq!(h.state(&id).await, ProvisioningState::Failed);
    assert!(
        h.status
            .get(&cancel, &id, ctx.operation_id)
            .await
            .unwrap_err()
            .is_not_found()
    );

    // Failed is terminal, so the caller can try again once the queue recovers.
    h.queue.fail_enqueue(false).await;
    let retry = RequestContext::new(id.clone(), OperationMethod::Put);
    h.status
        .queue_async_operation(&cancel, &retry, QueueOperationOptions::default())
        .await
        .unwrap();
    assert_eq!(h.state(&id).await, ProvisioningState::Provisioning);
}

/// Queue that breaks the object store right before refusing a message, so the
/// rollback write fails too.
struct SabotagingQueue {
    api: Arc<InMemoryObjectApi>,
}

#[async_trait]
impl QueueClient for SabotagingQueue {
    async fn enqueue(&self, _cancel: &CancellationToken, _message: Message) -> Result<(), QueueError> {
        self.api.fail_writes(true).await;
        Err(QueueError::Unavailable("broker down".to_string()))
    }

    async fn dequeue(&self, _cancel: &CancellationToken) -> Result<Option<Message>, QueueError> {
        Ok(None)
    }

    async fn finish_message(&self, _cancel: &CancellationToken, message: &Message) -> Result<(), QueueError> {
        Err(QueueError::LeaseLost {
            id: message.id.clone(),
        })
    }

    async fn extend_message(&self, _cancel: &CancellationToken, message: &mut Message) -> Result<(), QueueError> {
        Err(QueueError::LeaseLost {
            id: message.id.clone(),
        })
    }
}

#[tokio::test]
async fn test_rollback_failure_is_surfaced() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let id = container_id("web");
    h.seed(&id, container_body(Some("Succeeded"), &[])).await;

    let manager = DefaultStatusManager::new(
        h.storage.clone(),
        Arc::new(SabotagingQueue { api: h.api.clone() }),
        "global",
    );
    let ctx = RequestContext::new(id.clone(), OperationMethod::Put);
    let err = manager
        .queue_async_operation(&cancel, &ctx, QueueOperationOptions::default())
        .await
        .unwrap_err();

    match &err {
        OperationError::RollbackFailed {
            resource_id,
            cause,
            rollback,
        } => {
            assert_eq!(resource_id, &id.to_string());
            assert!(matches!(**cause, OperationError::Queue(_)));
            assert_eq!(rollback.error_code(), "INTERNAL");
        }
        other => panic!("expected RollbackFailed, got {:?}", other),
    }

    // The documented gap: the resource stays mid-operation.
    h.api.fail_writes(false).await;
    assert_eq!(h.state(&id).await, ProvisioningState::Provisioning);
}

/// Queue that refuses messages after the caller gives up on the request.
struct CancellingQueue;

#[async_trait]
impl QueueClient for CancellingQueue {
    async fn enqueue(&self, cancel: &CancellationToken, _message: Message) -> Result<(), QueueError> {
        cancel.cancel();
        Err(QueueError::Cancelled)
    }

    async fn dequeue(&self, _cancel: &CancellationToken) -> Result<Option<Message>, QueueError> {
        Ok(None)
    }

    async fn finish_message(&self, _cancel: &CancellationToken, message: &Message) -> Result<(), QueueError> {
        Err(QueueError::LeaseLost {
            id: message.id.clone(),
        })
    }

    async fn extend_message(&self, _cancel: &CancellationToken, message: &mut Message) -> Result<(), QueueError> {
        Err(QueueError::LeaseLost {
            id: message.id.clone(),
        })
    }
}

#[tokio::test]
async fn test_rollback_survives_cancelled_request() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let id = container_id("web");
    h.seed(&id, container_body(Some("Succeeded"), &[])).await;

    let manager = DefaultStatusManager::new(h.storage.clone(), Arc::new(CancellingQueue), "global");
    let ctx = RequestContext::new(id.clone(), OperationMethod::Put);
    let err = manager
        .queue_async_operation(&cancel, &ctx, QueueOperationOptions::default())
        .await
        .unwrap_err();
    assert!(cancel.is_cancelled());
    assert!(
        matches!(err, OperationError::Queue(QueueError::Cancelled)),
        "{:?}",
        err
    );

    // The resource is terminal again and the orphaned status is gone.
    assert_eq!(h.state(&id).await, ProvisioningState::Failed);
    let fresh = CancellationToken::new();
    assert!(
        h.status
            .get(&fresh, &id, ctx.operation_id)
            .await
            .unwrap_err()
            .is_not_found()
    );

    let retry = RequestContext::new(id.clone(), OperationMethod::Put);
    h.status
        .queue_async_operation(&fresh, &retry, QueueOperationOptions::default())
        .await
        .unwrap();
    assert_eq!(h.state(&id).await, ProvisioningState::Provisioning);
}

#[tokio::test]
async fn test_status_update_lifecycle() {
    let h = Harness::new();
    let cancel = CancellationToken::new();
    let id = container_id("web");
    h.seed(&id, container_body(None, &[])).await;

    let ctx = RequestContext::new(id.clone(), OperationMethod::Put);
    h.status
        .queue_async_operation(&cancel, &ctx, QueueOperationOptions::default())
        .await
        .unwrap();

    h.status
        .update(&cancel, &id, ctx.operation_id, ProvisioningState::Provisioning, None)
        .await
        .unwrap();
    let status = h.status.get(&cancel, &id, ctx.operation_id).await.unwrap();
    assert_eq!(status.status, ProvisioningState::Provisioning);
    assert!(status.end_time.is_none());

    let details = ErrorDetails::new("BadImage", "image not found");
    h.status
        .update(
            &cancel,
            &id,
            ctx.operation_id,
            ProvisioningState::Failed,
            Some(details.clone()),
        )
        .await
        .unwrap();
    let status = h.status.get(&cancel, &id, ctx.operation_id).await.unwrap();
    assert_eq!(status.status, ProvisioningState::Failed);
    assert_eq!(status.error, Some(details));
    let end_time = status.end_time.expect("terminal status has an end time");
    assert!(end_time >= status.start_time);

    let err = h
        .status
        .update(&cancel, &id, ctx.operation_id, ProvisioningState::Succeeded, None)
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    h.status.delete(&cancel, &id, ctx.operation_id).await.unwrap();
    assert!(
        h.status
            .get(&cancel, &id, ctx.operation_id)
            .await
            .unwrap_err()
            .is_not_found()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queue_admits_one_operation() {
    let h = Arc::new(Harness::new());
    let id = container_id("web");
    h.seed(&id, container_body(Some("Succeeded"), &[])).await;

    let tasks: Vec<_> = (0..6)
        .map(|_| {
            let h = h.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let ctx = RequestContext::new(id, OperationMethod::Put);
                h.status
                    .queue_async_operation(
                        &CancellationToken::new(),
                        &ctx,
                        QueueOperationOptions::default(),
                    )
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            err.is_conflict() || err.error_code() == "CONCURRENCY",
            "unexpected error {:?}",
            err
        );
    }
    assert_eq!(h.queue.len().await, 1);
}

#[tokio::test]
async fn test_cancelled_request_queues_nothing() {
    let h = Harness::new();
    let id = container_id("web");
    h.seed(&id, container_body(Some("Succeeded"), &[])).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = RequestContext::new(id.clone(), OperationMethod::Put);
    let err = h
        .status
        .queue_async_operation(&cancel, &ctx, QueueOperationOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "CANCELLED");
    assert_eq!(h.state(&id).await, ProvisioningState::Succeeded);
    assert!(h.queue.is_empty().await);
}
