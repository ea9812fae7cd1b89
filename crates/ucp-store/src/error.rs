// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for ucp-store.
//!
//! Every storage operation reports one of a small set of error classes. The
//! HTTP layer maps them to status codes via [`StoreError::http_status`].

use thiserror::Error;

/// Result type using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage errors surfaced to callers of a [`crate::StorageClient`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Malformed input. Never retried.
    #[error("invalid argument: {message}")]
    Invalid {
        /// What was wrong with the input.
        message: String,
    },

    /// The addressed resource does not exist.
    #[error("the resource was not found")]
    NotFound,

    /// An ETag precondition failed or the conditional-write retry budget ran out.
    #[error("the operation failed due to a concurrency conflict")]
    Concurrency,

    /// The caller's cancellation token fired before the operation completed.
    #[error("the operation was cancelled")]
    Cancelled,

    /// Backing store or serialization failure.
    #[error("internal storage error during '{operation}': {details}")]
    Internal {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl StoreError {
    /// Build an [`StoreError::Invalid`] from a message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Build an [`StoreError::Internal`] for an operation.
    pub fn internal(operation: impl Into<String>, details: impl ToString) -> Self {
        Self::Internal {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "INVALID",
            Self::NotFound => "NOT_FOUND",
            Self::Concurrency => "CONCURRENCY",
            Self::Cancelled => "CANCELLED",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// HTTP status code the frontend should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Invalid { .. } => 400,
            Self::NotFound => 404,
            Self::Concurrency => 412,
            Self::Cancelled => 499,
            Self::Internal { .. } => 500,
        }
    }

    /// True for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// True for [`StoreError::Concurrency`].
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::internal("json", err)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::internal("query", err)
    }
}
