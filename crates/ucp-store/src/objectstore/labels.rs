// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Denormalized label index for physical records.

use std::collections::BTreeMap;

use tracing::warn;

use super::ResourceEntry;
use crate::query::Query;
use crate::resources::{ResourceId, SEGMENT_SEPARATOR};

/// Whether a record holds scopes or resources.
pub const LABEL_KIND: &str = "ucp.dev/kind";

/// Prefix of per-scope-type labels, e.g. `ucp.dev/scope-resourcegroups`.
pub const LABEL_SCOPE_PREFIX: &str = "ucp.dev/scope-";

/// Resource (or innermost scope) type of the record's entries.
pub const LABEL_RESOURCE_TYPE: &str = "ucp.dev/resource-type";

/// Label value used when a record's entries disagree on a label.
pub const LABEL_VALUE_MULTIPLE: &str = "m_u_l_t_i_p_l_e";

/// `ucp.dev/kind` value for scope records.
pub const KIND_SCOPE: &str = "scope";

/// `ucp.dev/kind` value for resource records.
pub const KIND_RESOURCE: &str = "resource";

/// Label key for a scope type.
pub fn scope_label(scope_type: &str) -> String {
    format!("{}{}", LABEL_SCOPE_PREFIX, scope_type.to_lowercase())
}

/// Label value for a resource type. `/` is not valid in label values.
pub fn resource_type_value(resource_type: &str) -> String {
    resource_type.replace(SEGMENT_SEPARATOR, "_").to_lowercase()
}

/// Recompute a record's labels from scratch from its entries.
pub fn assign_labels(entries: &[ResourceEntry]) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();

    for entry in entries {
        // Entries were validated on save; only tampered data can fail here.
        let id = match ResourceId::parse(&entry.id) {
            Ok(id) => id,
            Err(err) => {
                warn!(id = %entry.id, error = %err, "Skipping invalid entry while labelling");
                continue;
            }
        };

        let kind = if id.is_scope() {
            KIND_SCOPE
        } else {
            KIND_RESOURCE
        };
        merge(&mut labels, LABEL_KIND.to_string(), kind.to_string());

        for scope in id.scope_segments() {
            merge(
                &mut labels,
                scope_label(&scope.scope_type),
                scope.name.to_lowercase(),
            );
        }

        let resource_type = if id.is_scope() {
            id.last_scope_type().unwrap_or_default().to_string()
        } else {
            id.type_name()
        };
        merge(
            &mut labels,
            LABEL_RESOURCE_TYPE.to_string(),
            resource_type_value(&resource_type),
        );
    }

    labels
}

fn merge(labels: &mut BTreeMap<String, String>, key: String, value: String) {
    match labels.get(&key) {
        Some(existing) if *existing != value => {
            labels.insert(key, LABEL_VALUE_MULTIPLE.to_string());
        }
        Some(_) => {}
        None => {
            labels.insert(key, value);
        }
    }
}

/// A label must be present with one of `values`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Label key.
    pub key: String,
    /// Accepted values.
    pub values: Vec<String>,
}

impl Requirement {
    /// Label must equal `value` or the collision sentinel.
    pub fn one_of_or_multiple(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: vec![value.into(), LABEL_VALUE_MULTIPLE.to_string()],
        }
    }

    /// Whether `labels` satisfies this requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels
            .get(&self.key)
            .is_some_and(|value| self.values.contains(value))
    }
}

/// A conjunction of label requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    /// All must match.
    pub requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Whether `labels` satisfies every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Build the pre-filter for a query.
    ///
    /// Every requirement also accepts the collision sentinel, so a record that
    /// might hold a match is never excluded. Candidates still go through the
    /// exact per-entry match afterwards.
    pub fn for_query(query: &Query, root_scope: &ResourceId) -> Self {
        let kind = if query.is_scope_query {
            KIND_SCOPE
        } else {
            KIND_RESOURCE
        };

        let mut requirements = vec![Requirement::one_of_or_multiple(LABEL_KIND, kind)];
        for scope in root_scope.scope_segments() {
            requirements.push(Requirement::one_of_or_multiple(
                scope_label(&scope.scope_type),
                scope.name.to_lowercase(),
            ));
        }
        if !query.resource_type.is_empty() {
            requirements.push(Requirement::one_of_or_multiple(
                LABEL_RESOURCE_TYPE,
                resource_type_value(&query.resource_type),
            ));
        }

        Self { requirements }
    }
}
