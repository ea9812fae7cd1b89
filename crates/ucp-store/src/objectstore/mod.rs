//! Collision-tolerant storage on top of a foreign object API.
//!
//! The backing system (a Kubernetes API server, a SQL table, an in-memory map)
//! only knows about named records with labels and a version token. We map each
//! resource ID onto a record name derived from a hash of the lower-cased ID:
//!
//! ```text
//! resource.frontend.3f1c...e9   (resource)
//! scope.cool-group.a07d...12    (scope)
//! ```
//!
//! Hash collisions are rare but possible, so a record holds a *list* of
//! entries and every write is a compare-and-swap on the record's version. Two
//! writers touching different IDs that collide onto the same record are
//! serialized by that version check.
//!
//! Each record also carries labels derived from its entries (one per scope
//! type, plus kind and resource type). Queries use them as a coarse
//! pre-filter; a label value of [`labels::LABEL_VALUE_MULTIPLE`] marks a
//! record whose entries disagree and must never be excluded.

pub mod labels;
pub mod memory;
pub mod sqlite;
mod store;

pub use self::labels::{LabelSelector, Requirement};
pub use self::memory::InMemoryObjectApi;
pub use self::sqlite::SqliteObjectApi;
pub use self::store::{DEFAULT_RETRY_COUNT, KeyFn, ObjectStoreClient, resource_name};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::StoreError;
use crate::object::{Metadata, Object};

/// One logical object inside a physical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    /// Resource ID.
    pub id: String,
    /// Content hash of `data`.
    pub etag: String,
    /// API version of the body.
    #[serde(default)]
    pub api_version: String,
    /// Media type of the body.
    #[serde(default)]
    pub content_type: String,
    /// Resource body.
    pub data: Value,
}

impl ResourceEntry {
    /// Convert to the public object shape.
    pub fn to_object(&self) -> Object {
        Object {
            metadata: Metadata {
                id: self.id.clone(),
                etag: self.etag.clone(),
                api_version: self.api_version.clone(),
                content_type: self.content_type.clone(),
            },
            data: self.data.clone(),
        }
    }
}

/// A named record in the backing store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalRecord {
    /// Record name, derived from the ID hash.
    pub name: String,
    /// Identity assigned by the backing store on create.
    pub uid: String,
    /// Version token, bumped by the backing store on every write.
    pub resource_version: u64,
    /// Denormalized labels computed from `entries`.
    pub labels: BTreeMap<String, String>,
    /// Logical entries whose IDs map to this record.
    pub entries: Vec<ResourceEntry>,
}

impl PhysicalRecord {
    /// A record that does not exist in the backing store yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Errors reported by an [`ObjectApi`].
#[derive(Debug, Error)]
pub enum ObjectApiError {
    /// No record with that name.
    #[error("record not found")]
    NotFound,

    /// Create raced with another create of the same name.
    #[error("record already exists")]
    AlreadyExists,

    /// The record's version changed since it was read.
    #[error("record version conflict")]
    Conflict,

    /// Any other backing-store failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl ObjectApiError {
    /// Whether the adapter should re-read the record and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::AlreadyExists)
    }

    pub(crate) fn into_store(self, operation: &str) -> StoreError {
        match self {
            Self::NotFound => StoreError::NotFound,
            Self::AlreadyExists | Self::Conflict => StoreError::Concurrency,
            Self::Backend(details) => StoreError::internal(operation, details),
        }
    }
}

impl From<sqlx::Error> for ObjectApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for ObjectApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(format!("json: {}", err))
    }
}

/// The foreign store: named, labelled records with optimistic concurrency.
///
/// Implementations are scoped to a single namespace.
#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// Read a record by name.
    async fn get(&self, name: &str) -> Result<PhysicalRecord, ObjectApiError>;

    /// Create a record. Fails with `AlreadyExists` if the name is taken.
    async fn create(&self, record: &PhysicalRecord) -> Result<PhysicalRecord, ObjectApiError>;

    /// Replace a record if its stored version still equals `record.resource_version`.
    async fn update(&self, record: &PhysicalRecord) -> Result<PhysicalRecord, ObjectApiError>;

    /// Remove a record if its stored version still equals `resource_version`.
    async fn delete(&self, name: &str, resource_version: u64) -> Result<(), ObjectApiError>;

    /// List records whose labels satisfy `selector`.
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<PhysicalRecord>, ObjectApiError>;
}
