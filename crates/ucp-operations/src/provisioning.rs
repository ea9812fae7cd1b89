// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning states and the `properties.provisioningState` field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::OperationError;

const PROPERTIES: &str = "properties";
const PROVISIONING_STATE: &str = "provisioningState";

/// Lifecycle status of a resource's most recent mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Queued, not picked up yet.
    Accepted,
    /// A create or replace is running.
    Provisioning,
    /// A dependency changed and the resource is being refreshed.
    Updating,
    /// A delete is running.
    Deleting,
    /// Last operation completed.
    Succeeded,
    /// Last operation failed.
    Failed,
    /// Last operation was cancelled or timed out.
    Canceled,
}

impl ProvisioningState {
    /// Every state, in declaration order.
    pub const ALL: [ProvisioningState; 7] = [
        Self::Accepted,
        Self::Provisioning,
        Self::Updating,
        Self::Deleting,
        Self::Succeeded,
        Self::Failed,
        Self::Canceled,
    ];

    /// Succeeded, Failed and Canceled are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// The serialized name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Provisioning => "Provisioning",
            Self::Updating => "Updating",
            Self::Deleting => "Deleting",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisioningState {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| OperationError::InvalidState(s.to_string()))
    }
}

/// Read `properties.provisioningState` from a resource body.
///
/// A body without the field (or without properties at all) has never been
/// through an async operation and counts as `Succeeded`.
pub fn provisioning_state(data: &Value) -> Result<ProvisioningState, OperationError> {
    match data.get(PROPERTIES).and_then(|p| p.get(PROVISIONING_STATE)) {
        Some(Value::String(state)) => state.parse(),
        Some(Value::Null) | None => Ok(ProvisioningState::Succeeded),
        Some(other) => Err(OperationError::InvalidState(other.to_string())),
    }
}

/// Write `properties.provisioningState` into a resource body, creating the
/// properties object when it is missing.
pub fn set_provisioning_state(
    data: &mut Value,
    state: ProvisioningState,
) -> Result<(), OperationError> {
    if data.is_null() {
        *data = Value::Object(Map::new());
    }
    let body = data
        .as_object_mut()
        .ok_or_else(|| OperationError::InvalidRequest("resource body is not an object".to_string()))?;

    let properties = body
        .entry(PROPERTIES)
        .or_insert_with(|| Value::Object(Map::new()));
    let properties = properties.as_object_mut().ok_or_else(|| {
        OperationError::InvalidRequest("resource properties are not an object".to_string())
    })?;

    properties.insert(
        PROVISIONING_STATE.to_string(),
        Value::String(state.as_str().to_string()),
    );
    Ok(())
}
