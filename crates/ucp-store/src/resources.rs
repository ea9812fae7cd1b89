// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource identifiers.
//!
//! A resource ID is a hierarchical path made of scope segments followed by an
//! optional provider routing path:
//!
//! ```text
//! /planes/radius/local/resourceGroups/cool-group/providers/Applications.Core/containers/frontend
//! └──────────── scope segments ────────────────┘          └namespace──────┘ └type────┘ └name──┘
//! ```
//!
//! IDs keep the caller's casing for display and storage, but comparison,
//! hashing and prefix matching always go through [`normalize`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, StoreError};

/// Separator between path segments.
pub const SEGMENT_SEPARATOR: &str = "/";

/// Marker segment that introduces a UCP plane.
pub const PLANES_SEGMENT: &str = "planes";

/// Marker segment separating scopes from the provider routing path.
pub const PROVIDERS_SEGMENT: &str = "providers";

/// One `type/name` pair of the scope portion of an ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSegment {
    /// Scope type, e.g. `resourceGroups`. For a UCP plane this is the plane type.
    pub scope_type: String,
    /// Scope name, e.g. `cool-group`.
    pub name: String,
}

impl ScopeSegment {
    /// Create a scope segment.
    pub fn new(scope_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope_type: scope_type.into(),
            name: name.into(),
        }
    }
}

/// One `type/name` pair of the routing portion of an ID.
///
/// The first segment's type includes the provider namespace
/// (`Applications.Core/containers`). An empty name marks a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSegment {
    /// Resource type of this segment.
    pub type_name: String,
    /// Resource name, empty for a collection.
    pub name: String,
}

impl TypeSegment {
    /// Create a type segment.
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
        }
    }
}

/// A parsed resource identifier.
#[derive(Debug, Clone)]
pub struct ResourceId {
    /// The `planes` marker as the caller spelled it, for UCP-qualified IDs.
    plane_marker: Option<String>,
    scope_segments: Vec<ScopeSegment>,
    type_segments: Vec<TypeSegment>,
    id: String,
}

impl ResourceId {
    /// Parse a resource path.
    ///
    /// Fails with [`StoreError::Invalid`] when the path does not start with `/`,
    /// has an odd number of scope segments, or contains empty segments.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            StoreError::invalid(format!("'{}' is not a valid resource id: {}", path, reason))
        };

        let Some(rest) = path.strip_prefix(SEGMENT_SEPARATOR) else {
            return Err(invalid("must start with '/'"));
        };
        let rest = rest.strip_suffix(SEGMENT_SEPARATOR).unwrap_or(rest);
        if rest.is_empty() {
            return Ok(Self::build(None, Vec::new(), Vec::new()));
        }

        let parts: Vec<&str> = rest.split(SEGMENT_SEPARATOR).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("segments must not be empty"));
        }

        let plane_marker = parts[0]
            .eq_ignore_ascii_case(PLANES_SEGMENT)
            .then(|| parts[0].to_string());
        let ucp_qualified = plane_marker.is_some();
        let start = usize::from(ucp_qualified);
        // Only a scope type position can hold the marker; a scope may be named `providers`.
        let providers = (start..parts.len())
            .step_by(2)
            .find(|&i| parts[i].eq_ignore_ascii_case(PROVIDERS_SEGMENT));

        let scope_parts = &parts[start..providers.unwrap_or(parts.len())];
        if scope_parts.len() % 2 != 0 {
            return Err(invalid("scope segments must be type/name pairs"));
        }
        if ucp_qualified && scope_parts.is_empty() {
            return Err(invalid("a plane requires a type and a name"));
        }

        let scope_segments = scope_parts
            .chunks(2)
            .map(|pair| ScopeSegment::new(pair[0], pair[1]))
            .collect();

        let mut type_segments = Vec::new();
        if let Some(index) = providers {
            let routing = &parts[index + 1..];
            if routing.len() < 2 {
                return Err(invalid("'providers' must be followed by a namespace and a type"));
            }

            let namespace = routing[0];
            for (i, pair) in routing[1..].chunks(2).enumerate() {
                let type_name = if i == 0 {
                    format!("{}/{}", namespace, pair[0])
                } else {
                    pair[0].to_string()
                };
                let name = pair.get(1).copied().unwrap_or_default();
                type_segments.push(TypeSegment::new(type_name, name));
            }
        }

        Ok(Self::build(plane_marker, scope_segments, type_segments))
    }

    /// Build an ID directly from its segments.
    pub fn from_segments(
        ucp_qualified: bool,
        scope_segments: Vec<ScopeSegment>,
        type_segments: Vec<TypeSegment>,
    ) -> Self {
        Self::build(
            ucp_qualified.then(|| PLANES_SEGMENT.to_string()),
            scope_segments,
            type_segments,
        )
    }

    fn build(
        plane_marker: Option<String>,
        scope_segments: Vec<ScopeSegment>,
        type_segments: Vec<TypeSegment>,
    ) -> Self {
        let mut id = String::new();
        if let Some(marker) = &plane_marker {
            id.push_str(SEGMENT_SEPARATOR);
            id.push_str(marker);
        }
        for scope in &scope_segments {
            id.push_str(SEGMENT_SEPARATOR);
            id.push_str(&scope.scope_type);
            id.push_str(SEGMENT_SEPARATOR);
            id.push_str(&scope.name);
        }
        if !type_segments.is_empty() {
            id.push_str(SEGMENT_SEPARATOR);
            id.push_str(PROVIDERS_SEGMENT);
            id.push_str(&routing_path(&type_segments));
        }
        if id.is_empty() {
            id.push_str(SEGMENT_SEPARATOR);
        }

        Self {
            plane_marker,
            scope_segments,
            type_segments,
            id,
        }
    }

    /// The ID as a string, in the caller's original casing.
    pub fn as_str(&self) -> &str {
        &self.id
    }

    /// Whether the ID starts with `/planes`.
    pub fn is_ucp_qualified(&self) -> bool {
        self.plane_marker.is_some()
    }

    /// The scope portion of the ID, e.g. `/planes/radius/local/resourceGroups/cool-group`.
    pub fn root_scope(&self) -> String {
        Self::build(self.plane_marker.clone(), self.scope_segments.clone(), Vec::new()).id
    }

    /// The routing portion of the ID, e.g. `/Applications.Core/containers/frontend`.
    ///
    /// Empty for scopes.
    pub fn routing_scope(&self) -> String {
        routing_path(&self.type_segments)
    }

    /// Fully-qualified resource type, e.g. `Applications.Core/containers`.
    ///
    /// Nested types are joined with `/`. Empty for scopes.
    pub fn type_name(&self) -> String {
        self.type_segments
            .iter()
            .map(|s| s.type_name.as_str())
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }

    /// Resource or scope name. Nested names are joined with `/`; empty for collections.
    pub fn name(&self) -> String {
        if self.type_segments.is_empty() {
            return self
                .scope_segments
                .last()
                .map(|s| s.name.clone())
                .unwrap_or_default();
        }
        if self.is_collection() {
            return String::new();
        }
        self.type_segments
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }

    /// The provider namespace, e.g. `Applications.Core`.
    pub fn provider_namespace(&self) -> Option<&str> {
        self.type_segments
            .first()
            .and_then(|s| s.type_name.split(SEGMENT_SEPARATOR).next())
    }

    /// Scope segments in order.
    pub fn scope_segments(&self) -> &[ScopeSegment] {
        &self.scope_segments
    }

    /// Routing type segments in order.
    pub fn type_segments(&self) -> &[TypeSegment] {
        &self.type_segments
    }

    /// The type of the innermost scope segment, e.g. `resourceGroups`.
    pub fn last_scope_type(&self) -> Option<&str> {
        self.scope_segments.last().map(|s| s.scope_type.as_str())
    }

    /// True when the ID names a scope rather than a provider resource.
    pub fn is_scope(&self) -> bool {
        !self.scope_segments.is_empty() && self.type_segments.is_empty()
    }

    /// True when the last routing type has no name.
    pub fn is_collection(&self) -> bool {
        self.type_segments
            .last()
            .is_some_and(|s| s.name.is_empty())
    }

    /// True for the root ID `/`.
    pub fn is_empty(&self) -> bool {
        self.scope_segments.is_empty() && self.type_segments.is_empty()
    }

    /// Build the ID of a child resource.
    ///
    /// Appending to a scope starts the routing path, so `type_name` must then be
    /// namespace-qualified (`Applications.Core/containers`).
    pub fn append(&self, type_name: &str, name: &str) -> Result<Self> {
        if self.is_collection() {
            return Err(StoreError::invalid(format!(
                "cannot append to collection id '{}'",
                self.id
            )));
        }
        if self.type_segments.is_empty() && !type_name.contains(SEGMENT_SEPARATOR) {
            return Err(StoreError::invalid(format!(
                "type '{}' must include a provider namespace",
                type_name
            )));
        }

        let mut type_segments = self.type_segments.clone();
        type_segments.push(TypeSegment::new(type_name, name));
        Ok(Self::build(
            self.plane_marker.clone(),
            self.scope_segments.clone(),
            type_segments,
        ))
    }

    fn normalized(&self) -> String {
        normalize(&self.id)
    }
}

fn routing_path(type_segments: &[TypeSegment]) -> String {
    let mut path = String::new();
    for segment in type_segments {
        path.push_str(SEGMENT_SEPARATOR);
        path.push_str(&segment.type_name);
        if !segment.name.is_empty() {
            path.push_str(SEGMENT_SEPARATOR);
            path.push_str(&segment.name);
        }
    }
    path
}

/// Normalize a path for comparison: lower-cased, with exactly one leading and
/// one trailing separator. Empty input stays empty.
pub fn normalize(part: &str) -> String {
    if part.is_empty() {
        return String::new();
    }

    let mut normalized = String::with_capacity(part.len() + 2);
    if !part.starts_with(SEGMENT_SEPARATOR) {
        normalized.push_str(SEGMENT_SEPARATOR);
    }
    normalized.push_str(part);
    if !part.ends_with(SEGMENT_SEPARATOR) {
        normalized.push_str(SEGMENT_SEPARATOR);
    }
    normalized.to_lowercase()
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for ResourceId {}

impl Hash for ResourceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for ResourceId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
