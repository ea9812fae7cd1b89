// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! UCP Operations - async operation lifecycle
//!
//! Mutations of control-plane resources complete asynchronously. This crate
//! accepts them, tracks their status, runs them on workers and re-triggers
//! dependent resources when something they connect to changes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  queue_async_operation   ┌───────────────────────┐
//! │   Frontend   │ ───────────────────────► │  DefaultStatusManager │
//! └──────────────┘                          │  resource state       │
//!        ▲                                  │  status record        │
//!        │ get status                       │  enqueue / rollback   │
//!        │                                  └───────────┬───────────┘
//!        │                                              │ Message
//!        │                                              ▼
//! ┌──────┴───────────────────────┐           ┌───────────────────────┐
//! │ ucp-store (StorageProvider)  │ ◄──────── │ AsyncRequestProcess-  │
//! │ resources + operationStatuses│           │ Worker → controllers  │
//! └──────────────────────────────┘           └───────────────────────┘
//!        ▲
//!        │ query connections, queue dependents
//! ┌──────┴───────────────────────┐
//! │ NotificationDispatcher       │
//! │   └─ ConnectionsFilter       │
//! └──────────────────────────────┘
//! ```
//!
//! # Provisioning States
//!
//! ```text
//! Succeeded|Failed|Canceled ──queue──► Provisioning | Updating | Deleting
//!                                              │
//!                                              ▼
//!                                  Succeeded | Failed | Canceled
//! ```
//!
//! A new operation is only accepted while the resource is in a terminal
//! state; otherwise the caller gets a conflict. This is the only mutual
//! exclusion between operations on one resource.
//!
//! # Failure Handling
//!
//! | Step fails | Effect |
//! |------------|--------|
//! | Resource save (ETag mismatch) | `Store(Concurrency)`, nothing queued |
//! | Status write or enqueue | Resource rolled back to `Failed`, status removed |
//! | Rollback write | `RollbackFailed`, resource left non-terminal |
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `UCP_LOCATION` | `global` | Location segment of status IDs |
//! | `UCP_OPERATION_TIMEOUT_SECS` | `3600` | Operation timeout |
//! | `UCP_RETRY_AFTER_SECS` | `60` | Poll interval for clients |
//! | `UCP_QUEUE_VISIBILITY_TIMEOUT_SECS` | `300` | Message lease |
//! | `UCP_WORKER_MAX_CONCURRENCY` | `10` | Parallel operations per worker |
//! | `UCP_WORKER_MAX_DEQUEUE_COUNT` | `5` | Deliveries before failing |
//! | `UCP_WORKER_POLL_INTERVAL_MS` | `500` | Idle poll interval |

#![deny(missing_docs)]

/// Operations configuration from environment variables.
pub mod config;

/// Request context, operation types and the queued request payload.
pub mod context;

/// Error types.
pub mod error;

/// Change notifications and dependent-resource filters.
pub mod notifications;

/// Provisioning states.
pub mod provisioning;

/// Leased message queue.
pub mod queue;

/// Operation status tracking and queueing.
pub mod statusmanager;

/// Background operation worker.
pub mod worker;

pub use context::{OperationMethod, OperationRequest, OperationType, RequestContext};
pub use error::{OperationError, Result};
pub use notifications::{
    ConnectionsFilter, Notification, NotificationDispatcher, NotificationFilter, NotificationReason,
};
pub use provisioning::ProvisioningState;
pub use queue::{InMemoryQueue, Message, QueueClient, QueueError};
pub use statusmanager::{
    AsyncOperationStatus, DefaultStatusManager, ErrorDetails, QueueOperationOptions, StatusManager,
};
pub use worker::{AsyncController, AsyncRequestProcessWorker, ControllerRegistry, ControllerResult, WorkerConfig};
