// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request context and the queued form of an async operation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ucp_store::ResourceId;
use uuid::Uuid;

use crate::error::OperationError;
use crate::provisioning::ProvisioningState;
use crate::statusmanager::QueueOperationOptions;

/// Default location segment of operation status IDs.
pub const DEFAULT_LOCATION: &str = "global";

/// The mutation an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationMethod {
    /// Create or replace.
    Put,
    /// Partial update.
    Patch,
    /// Delete.
    Delete,
}

impl OperationMethod {
    /// Upper-case HTTP verb.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// State a resource moves into when an operation of this kind is queued.
    pub fn target_state(self) -> ProvisioningState {
        match self {
            Self::Put | Self::Patch => ProvisioningState::Provisioning,
            Self::Delete => ProvisioningState::Deleting,
        }
    }
}

impl FromStr for OperationMethod {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(OperationError::InvalidRequest(format!(
                "unsupported operation method '{}'",
                s
            ))),
        }
    }
}

/// Resource type plus method, e.g. `APPLICATIONS.CORE/CONTAINERS|PUT`.
///
/// Controllers are registered and looked up by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationType {
    /// Upper-cased resource type.
    pub resource_type: String,
    /// Mutation kind.
    pub method: OperationMethod,
}

impl OperationType {
    /// Create an operation type. The resource type is upper-cased.
    pub fn new(resource_type: &str, method: OperationMethod) -> Self {
        Self {
            resource_type: resource_type.to_uppercase(),
            method,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.resource_type, self.method.as_str())
    }
}

impl FromStr for OperationType {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource_type, method) = s.split_once('|').ok_or_else(|| {
            OperationError::InvalidRequest(format!("invalid operation type '{}'", s))
        })?;
        if resource_type.is_empty() {
            return Err(OperationError::InvalidRequest(format!(
                "invalid operation type '{}'",
                s
            )));
        }
        Ok(Self::new(resource_type, method.parse()?))
    }
}

impl Serialize for OperationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OperationType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What the frontend knows about a mutation request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Target resource.
    pub resource_id: ResourceId,
    /// Operation ID reported to pollers.
    pub operation_id: Uuid,
    /// Resource type and method.
    pub operation_type: OperationType,
    /// Region the request was received in.
    pub location: String,
    /// API version of the request.
    pub api_version: String,
    /// Caller-supplied correlation ID for log stitching.
    pub correlation_id: String,
}

impl RequestContext {
    /// A context for `method` on `resource_id` with a fresh operation ID.
    pub fn new(resource_id: ResourceId, method: OperationMethod) -> Self {
        let operation_type = OperationType::new(&resource_id.type_name(), method);
        Self {
            resource_id,
            operation_id: Uuid::new_v4(),
            operation_type,
            location: DEFAULT_LOCATION.to_string(),
            api_version: String::new(),
            correlation_id: String::new(),
        }
    }

    /// Set the API version.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Set the correlation ID.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// Queue payload for one async operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    /// Operation ID.
    pub operation_id: Uuid,
    /// Resource type and method.
    pub operation_type: OperationType,
    /// Target resource.
    pub resource_id: ResourceId,
    /// Region the request was received in.
    #[serde(default)]
    pub location: String,
    /// API version of the request.
    #[serde(default)]
    pub api_version: String,
    /// Correlation ID.
    #[serde(default)]
    pub correlation_id: String,
    /// Seconds the operation may run before it is canceled.
    pub operation_timeout_secs: u64,
    /// Seconds pollers should wait between status checks.
    pub retry_after_secs: u64,
    /// When the operation was queued.
    pub queued_at: DateTime<Utc>,
}

impl OperationRequest {
    /// Build the queue payload for `ctx`.
    pub fn new(ctx: &RequestContext, options: &QueueOperationOptions) -> Self {
        Self {
            operation_id: ctx.operation_id,
            operation_type: ctx.operation_type.clone(),
            resource_id: ctx.resource_id.clone(),
            location: ctx.location.clone(),
            api_version: ctx.api_version.clone(),
            correlation_id: ctx.correlation_id.clone(),
            operation_timeout_secs: options.operation_timeout.as_secs(),
            retry_after_secs: options.retry_after.as_secs(),
            queued_at: Utc::now(),
        }
    }

    /// Operation timeout as a duration.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// The instant the operation times out.
    pub fn deadline(&self) -> DateTime<Utc> {
        i64::try_from(self.operation_timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|timeout| self.queued_at.checked_add_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Time left before the deadline, zero if it passed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline() - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline()
    }

    /// Rebuild the request context.
    pub fn context(&self) -> RequestContext {
        RequestContext {
            resource_id: self.resource_id.clone(),
            operation_id: self.operation_id,
            operation_type: self.operation_type.clone(),
            location: self.location.clone(),
            api_version: self.api_version.clone(),
            correlation_id: self.correlation_id.clone(),
        }
    }
}
