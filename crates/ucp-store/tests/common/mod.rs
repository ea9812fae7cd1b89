// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for ucp-store integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use ucp_store::objectstore::{InMemoryObjectApi, KeyFn, ObjectStoreClient};
use ucp_store::Object;

pub const GROUP: &str = "/planes/radius/local/resourceGroups/cool-group";

/// Every ID maps to this one record name.
pub const COLLIDED_NAME: &str = "resource.collided.0000";

/// Build a resource ID under `group` in the local radius plane.
pub fn resource_id(group: &str, resource_type: &str, name: &str) -> String {
    format!(
        "/planes/radius/local/resourceGroups/{}/providers/{}/{}",
        group, resource_type, name
    )
}

pub fn object(id: &str, data: Value) -> Object {
    Object::new(id, data)
}

/// Key function forcing every ID onto the same physical record.
pub fn colliding_keys() -> KeyFn {
    Arc::new(|_| COLLIDED_NAME.to_string())
}

/// A client over a fresh in-memory API, returning both.
pub fn memory_client() -> (Arc<InMemoryObjectApi>, ObjectStoreClient) {
    let api = Arc::new(InMemoryObjectApi::new());
    let client = ObjectStoreClient::new(api.clone());
    (api, client)
}

/// A client whose IDs all collide onto one record.
pub fn colliding_client() -> (Arc<InMemoryObjectApi>, ObjectStoreClient) {
    let api = Arc::new(InMemoryObjectApi::new());
    let client = ObjectStoreClient::new(api.clone()).with_key_fn(colliding_keys());
    (api, client)
}
