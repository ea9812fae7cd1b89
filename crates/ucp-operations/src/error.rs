// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ucp-operations.

use std::time::Duration;

use thiserror::Error;
use ucp_store::StoreError;

use crate::provisioning::ProvisioningState;
use crate::queue::QueueError;

/// Async operation errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OperationError {
    /// Storage operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// The request conflicts with the current state of a resource or status.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A dependent resource is mid-mutation and cannot be re-triggered.
    #[error("resource {id} is not in a terminal state: {state}")]
    NotTerminal {
        /// Resource ID.
        id: String,
        /// State it was found in.
        state: ProvisioningState,
    },

    /// Queueing failed and the resource could not be rolled back to `Failed`.
    ///
    /// The resource is left in its non-terminal state.
    #[error("failed to roll back {resource_id} after '{cause}': {rollback}")]
    RollbackFailed {
        /// Resource ID.
        resource_id: String,
        /// Why the operation was being rolled back.
        cause: Box<OperationError>,
        /// Why the rollback write failed.
        rollback: Box<OperationError>,
    },

    /// A stored provisioning state is not one we know.
    #[error("Invalid provisioning state: {0}")]
    InvalidState(String),

    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// An async operation ran past its timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OperationError {
    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Stable error code recorded on failed operation statuses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.error_code(),
            Self::Queue(_) => "QUEUE",
            Self::Conflict(_) => "CONFLICT",
            Self::NotTerminal { .. } => "NOT_TERMINAL",
            Self::RollbackFailed { .. } => "ROLLBACK_FAILED",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Timeout(_) => "TIMEOUT",
            Self::Json(_) => "INTERNAL",
        }
    }

    /// Whether this is a state conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the underlying storage reported a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

/// Result type using OperationError.
pub type Result<T> = std::result::Result<T, OperationError>;
