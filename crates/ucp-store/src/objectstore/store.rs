// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! [`StorageClient`] implementation over an [`ObjectApi`].

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::labels::{self, LabelSelector};
use super::{ObjectApi, ObjectApiError, PhysicalRecord, ResourceEntry};
use crate::client::{DeleteOptions, GetOptions, QueryOptions, SaveOptions, StorageClient};
use crate::error::{Result, StoreError};
use crate::etag;
use crate::object::Object;
use crate::query::{Query, QueryResult};
use crate::resources::{ResourceId, normalize};

/// Number of conditional-write attempts before giving up with
/// [`StoreError::Concurrency`]. Retries only happen on concurrent writes to
/// the same record, so the budget is small.
pub const DEFAULT_RETRY_COUNT: usize = 10;

/// Maps a resource ID to a physical record name.
pub type KeyFn = Arc<dyn Fn(&ResourceId) -> String + Send + Sync>;

const MAX_NAME_SEGMENT_LEN: usize = 63;

/// Physical record name for an ID: `{kind}.{name}.{sha256(lowercase id)}`.
pub fn resource_name(id: &ResourceId) -> String {
    let hash = Sha256::digest(id.as_str().to_lowercase().as_bytes());
    let prefix = if id.is_scope() {
        labels::KIND_SCOPE
    } else {
        labels::KIND_RESOURCE
    };

    let last = id.name();
    let last = last.rsplit('/').next().unwrap_or_default();
    let mut sanitized: String = last
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    sanitized.truncate(MAX_NAME_SEGMENT_LEN);

    format!("{}.{}.{:x}", prefix, sanitized, hash)
}

/// Collision-tolerant storage client.
///
/// Safe for concurrent use. There are no in-process locks: every write is a
/// read, modify and compare-and-swap loop against the backing store.
#[derive(Clone)]
pub struct ObjectStoreClient {
    api: Arc<dyn ObjectApi>,
    retry_count: usize,
    key_fn: KeyFn,
}

impl ObjectStoreClient {
    /// Create a client with the default retry budget and key function.
    pub fn new(api: Arc<dyn ObjectApi>) -> Self {
        Self {
            api,
            retry_count: DEFAULT_RETRY_COUNT,
            key_fn: Arc::new(resource_name),
        }
    }

    /// Override the conditional-write retry budget.
    pub fn with_retry_count(mut self, retry_count: usize) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }

    /// Override how IDs map to record names.
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    /// Run a backing-store call, abandoning it if `cancel` fires first.
    async fn call<T>(
        &self,
        cancel: &CancellationToken,
        fut: impl Future<Output = std::result::Result<T, ObjectApiError>>,
    ) -> Result<std::result::Result<T, ObjectApiError>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            result = fut => Ok(result),
        }
    }

    async fn read_record(
        &self,
        cancel: &CancellationToken,
        name: &str,
    ) -> Result<Option<PhysicalRecord>> {
        match self.call(cancel, self.api.get(name)).await? {
            Ok(record) => Ok(Some(record)),
            Err(ObjectApiError::NotFound) => Ok(None),
            Err(err) => Err(err.into_store("get")),
        }
    }
}

fn parse_key(id: &str) -> Result<ResourceId> {
    let parsed = ResourceId::parse(id)
        .map_err(|_| StoreError::invalid("'id' must be a valid resource id"))?;
    if parsed.is_empty() {
        return Err(StoreError::invalid("'id' must not be empty"));
    }
    if parsed.is_collection() {
        return Err(StoreError::invalid(
            "'id' must refer to a named resource, not a collection",
        ));
    }
    Ok(parsed)
}

fn find_index(record: &PhysicalRecord, id: &ResourceId) -> Option<usize> {
    let wanted = normalize(id.as_str());
    record
        .entries
        .iter()
        .position(|entry| normalize(&entry.id) == wanted)
}

#[async_trait]
impl StorageClient for ObjectStoreClient {
    async fn get(
        &self,
        cancel: &CancellationToken,
        id: &str,
        _options: GetOptions,
    ) -> Result<Object> {
        let parsed = parse_key(id)?;
        let name = (self.key_fn)(&parsed);

        let record = self
            .read_record(cancel, &name)
            .await?
            .ok_or(StoreError::NotFound)?;

        find_index(&record, &parsed)
            .map(|index| record.entries[index].to_object())
            .ok_or(StoreError::NotFound)
    }

    async fn save(
        &self,
        cancel: &CancellationToken,
        obj: &mut Object,
        options: SaveOptions,
    ) -> Result<()> {
        let parsed = parse_key(obj.id())?;
        let name = (self.key_fn)(&parsed);

        // The caller's ETag is a precondition only; the stored one is recomputed.
        let raw = serde_json::to_vec(&obj.data)?;
        let entry = ResourceEntry {
            id: parsed.to_string(),
            etag: etag::new(&raw),
            api_version: obj.metadata.api_version.clone(),
            content_type: obj.metadata.content_type.clone(),
            data: obj.data.clone(),
        };

        for attempt in 1..=self.retry_count {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            let existing = self.read_record(cancel, &name).await?;
            let creating = existing.is_none();
            let mut record = existing.unwrap_or_else(|| PhysicalRecord::new(name.clone()));

            match find_index(&record, &parsed) {
                // A precondition is meaningless without an existing target.
                None if options.etag.is_some() => return Err(StoreError::Concurrency),
                None => record.entries.push(entry.clone()),
                Some(index) => {
                    if let Some(expected) = &options.etag
                        && *expected != record.entries[index].etag
                    {
                        return Err(StoreError::Concurrency);
                    }
                    record.entries[index] = entry.clone();
                }
            }
            record.labels = labels::assign_labels(&record.entries);

            let result = if creating {
                self.call(cancel, self.api.create(&record)).await?
            } else {
                self.call(cancel, self.api.update(&record)).await?
            };

            match result {
                Ok(_) => {
                    obj.metadata.etag = entry.etag;
                    return Ok(());
                }
                // Deleted between our read and write; start over as a create.
                Err(err) if err.is_retryable() || matches!(err, ObjectApiError::NotFound) => {
                    debug!(record = %name, attempt, error = %err, "Conditional save lost a race, retrying");
                }
                Err(err) => return Err(err.into_store("save")),
            }
        }

        warn!(record = %name, id = %parsed, attempts = self.retry_count, "Save exhausted retry budget");
        Err(StoreError::Concurrency)
    }

    async fn delete(
        &self,
        cancel: &CancellationToken,
        id: &str,
        options: DeleteOptions,
    ) -> Result<()> {
        let parsed = parse_key(id)?;
        let name = (self.key_fn)(&parsed);

        for attempt in 1..=self.retry_count {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }

            let missing = || {
                if options.etag.is_some() {
                    StoreError::Concurrency
                } else {
                    StoreError::NotFound
                }
            };
            let Some(mut record) = self.read_record(cancel, &name).await? else {
                return Err(missing());
            };

            let index = find_index(&record, &parsed).ok_or_else(missing)?;
            if let Some(expected) = &options.etag
                && *expected != record.entries[index].etag
            {
                return Err(StoreError::Concurrency);
            }

            let result = if record.entries.len() == 1 {
                // Last entry: remove the record entirely.
                self.call(cancel, self.api.delete(&name, record.resource_version))
                    .await?
            } else {
                record.entries.remove(index);
                record.labels = labels::assign_labels(&record.entries);
                self.call(cancel, self.api.update(&record)).await?.map(|_| ())
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    debug!(record = %name, attempt, error = %err, "Conditional delete lost a race, retrying");
                }
                Err(err) => return Err(err.into_store("delete")),
            }
        }

        warn!(record = %name, id = %parsed, attempts = self.retry_count, "Delete exhausted retry budget");
        Err(StoreError::Concurrency)
    }

    async fn query(
        &self,
        cancel: &CancellationToken,
        query: &Query,
        _options: QueryOptions,
    ) -> Result<QueryResult> {
        let root_scope = query.validate()?;
        let selector = LabelSelector::for_query(query, &root_scope);

        let records = self
            .call(cancel, self.api.list(&selector))
            .await?
            .map_err(|err| err.into_store("list"))?;
        debug!(candidates = records.len(), root_scope = %query.root_scope, "Label pre-filter done");

        let mut result = QueryResult::default();
        for record in &records {
            for entry in &record.entries {
                let id = match ResourceId::parse(&entry.id) {
                    Ok(id) => id,
                    Err(err) => {
                        // One bad entry must not break every query.
                        warn!(record = %record.name, id = %entry.id, error = %err, "Found an invalid resource id as part of a query");
                        continue;
                    }
                };

                // Under collision the kind label may be the sentinel.
                if id.is_scope() != query.is_scope_query || !query.matches_id(&id) {
                    continue;
                }

                let obj = entry.to_object();
                if obj.matches_filters(&query.filters) {
                    result.items.push(obj);
                }
            }
        }

        Ok(result)
    }
}
