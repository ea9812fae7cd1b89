// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scope and type queries.

use crate::error::{Result, StoreError};
use crate::object::{Object, QueryFilter};
use crate::resources::{ResourceId, normalize};

/// A query over stored objects.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Scope to search, e.g. `/planes/radius/local/resourceGroups/cool-group`.
    pub root_scope: String,
    /// Match every scope under `root_scope` instead of only `root_scope` itself.
    pub scope_recursive: bool,
    /// Only match resources whose routing scope starts with this prefix.
    pub routing_scope_prefix: String,
    /// Only match this resource type (or scope type for scope queries).
    pub resource_type: String,
    /// Match scopes instead of provider resources.
    pub is_scope_query: bool,
    /// Property filters evaluated against each candidate body.
    pub filters: Vec<QueryFilter>,
}

impl Query {
    /// Query resources directly under a scope.
    pub fn resources(root_scope: impl Into<String>) -> Self {
        Self {
            root_scope: root_scope.into(),
            ..Default::default()
        }
    }

    /// Query scopes under a scope.
    pub fn scopes(root_scope: impl Into<String>) -> Self {
        Self {
            root_scope: root_scope.into(),
            is_scope_query: true,
            ..Default::default()
        }
    }

    /// Include nested scopes.
    pub fn recursive(mut self) -> Self {
        self.scope_recursive = true;
        self
    }

    /// Restrict to a resource type.
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    /// Restrict to a routing scope prefix.
    pub fn with_routing_scope_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.routing_scope_prefix = prefix.into();
        self
    }

    /// Add a property filter.
    pub fn with_filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Validate the query and return its parsed root scope.
    pub fn validate(&self) -> Result<ResourceId> {
        if self.root_scope.is_empty() {
            return Err(StoreError::invalid("'query.root_scope' is required"));
        }
        if self.is_scope_query && !self.routing_scope_prefix.is_empty() {
            return Err(StoreError::invalid(
                "'query.routing_scope_prefix' is not supported for scope queries",
            ));
        }
        ResourceId::parse(&self.root_scope)
    }

    /// Exact per-entry match of an ID against the query's scope, routing and
    /// type constraints. Property filters are evaluated separately.
    pub fn matches_id(&self, id: &ResourceId) -> bool {
        let id_scope = normalize(&id.root_scope());
        let query_scope = normalize(&self.root_scope);
        if self.scope_recursive && !id_scope.starts_with(&query_scope) {
            return false;
        }
        if !self.scope_recursive && id_scope != query_scope {
            return false;
        }

        if !self.routing_scope_prefix.is_empty()
            && !normalize(&id.routing_scope()).starts_with(&normalize(&self.routing_scope_prefix))
        {
            return false;
        }

        if self.resource_type.is_empty() {
            return true;
        }
        if self.is_scope_query {
            id.last_scope_type()
                .is_some_and(|t| t.eq_ignore_ascii_case(&self.resource_type))
        } else {
            id.type_name().eq_ignore_ascii_case(&self.resource_type)
        }
    }
}

/// Objects returned by a query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Matching objects.
    pub items: Vec<Object>,
}
