// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stored objects and property filters.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Descriptive fields stored next to a resource body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Resource ID in the caller's casing.
    pub id: String,
    /// Content hash computed by the store on every save.
    #[serde(default)]
    pub etag: String,
    /// API version the body was written with.
    #[serde(default)]
    pub api_version: String,
    /// Media type of the body.
    #[serde(default)]
    pub content_type: String,
}

/// The persisted unit: metadata plus an opaque JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    /// Object metadata.
    #[serde(flatten)]
    pub metadata: Metadata,
    /// Resource body.
    pub data: Value,
}

impl Object {
    /// Create an object with JSON content type and no ETag.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            metadata: Metadata {
                id: id.into(),
                content_type: "application/json".to_string(),
                ..Default::default()
            },
            data,
        }
    }

    /// Set the API version.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.metadata.api_version = api_version.into();
        self
    }

    /// Resource ID of this object.
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// ETag of this object as last read or saved.
    pub fn etag(&self) -> &str {
        &self.metadata.etag
    }

    /// Check every filter against the body. All filters must match.
    pub fn matches_filters(&self, filters: &[QueryFilter]) -> bool {
        filters.iter().all(|filter| filter.matches(&self.data))
    }
}

/// A property filter over a dotted path into the body, e.g. `properties.application`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    /// Dotted path of the field to compare.
    pub field: String,
    /// Expected value.
    pub value: String,
}

impl QueryFilter {
    /// Create a filter.
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// String values compare ignoring ASCII case; other scalars by their JSON text.
    /// Objects, arrays and missing paths never match.
    pub fn matches(&self, data: &Value) -> bool {
        let mut current = data;
        for field in self.field.split('.') {
            match current.get(field) {
                Some(next) => current = next,
                None => return false,
            }
        }

        match current {
            Value::String(s) => s.eq_ignore_ascii_case(&self.value),
            Value::Number(_) | Value::Bool(_) => current.to_string() == self.value,
            _ => false,
        }
    }
}
