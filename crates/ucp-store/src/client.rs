// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The storage client contract consumed by controllers.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::object::Object;
use crate::query::{Query, QueryResult};

/// Options for [`StorageClient::get`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {}

/// Options for [`StorageClient::save`].
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Only save if the stored object currently has this ETag.
    pub etag: Option<String>,
}

impl SaveOptions {
    /// Require the stored object to have `etag`. An empty string means no precondition.
    pub fn with_etag(etag: impl Into<String>) -> Self {
        let etag = etag.into();
        Self {
            etag: (!etag.is_empty()).then_some(etag),
        }
    }
}

/// Options for [`StorageClient::delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Only delete if the stored object currently has this ETag.
    pub etag: Option<String>,
}

impl DeleteOptions {
    /// Require the stored object to have `etag`. An empty string means no precondition.
    pub fn with_etag(etag: impl Into<String>) -> Self {
        let etag = etag.into();
        Self {
            etag: (!etag.is_empty()).then_some(etag),
        }
    }
}

/// Options for [`StorageClient::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {}

/// Storage interface for resource bodies.
///
/// Every call takes the caller's cancellation token; implementations must
/// stop promptly once it fires.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Read the object stored under `id`.
    async fn get(&self, cancel: &CancellationToken, id: &str, options: GetOptions)
    -> Result<Object>;

    /// Create or replace `obj`. The computed ETag is written back into `obj`.
    async fn save(
        &self,
        cancel: &CancellationToken,
        obj: &mut Object,
        options: SaveOptions,
    ) -> Result<()>;

    /// Delete the object stored under `id`.
    async fn delete(
        &self,
        cancel: &CancellationToken,
        id: &str,
        options: DeleteOptions,
    ) -> Result<()>;

    /// Return every object matching `query`.
    async fn query(
        &self,
        cancel: &CancellationToken,
        query: &Query,
        options: QueryOptions,
    ) -> Result<QueryResult>;
}
