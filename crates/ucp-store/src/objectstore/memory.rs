// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory object API.
//!
//! Behaves like the real backing store (versioned records, label selectors,
//! conditional writes) without any external dependency. It also exposes
//! fault injection so tests can drive the adapter's retry paths:
//!
//! - [`InMemoryObjectApi::inject_conflicts`] simulates concurrent writers
//! - [`InMemoryObjectApi::fail_writes`] simulates a broken backend
//! - [`InMemoryObjectApi::with_latency`] makes every call slow enough to cancel

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{LabelSelector, ObjectApi, ObjectApiError, PhysicalRecord};

#[derive(Default)]
struct State {
    records: BTreeMap<String, PhysicalRecord>,
    last_version: u64,
    pending_conflicts: usize,
    fail_writes: bool,
    writes: usize,
}

impl State {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    /// Consume one injected conflict, bumping the record as a concurrent
    /// writer would have.
    fn take_conflict(&mut self, name: &str) -> bool {
        if self.pending_conflicts == 0 {
            return false;
        }
        self.pending_conflicts -= 1;
        let version = self.next_version();
        if let Some(record) = self.records.get_mut(name) {
            record.resource_version = version;
        }
        true
    }

    fn check_write(&mut self, name: &str) -> Result<(), ObjectApiError> {
        self.writes += 1;
        if self.fail_writes {
            return Err(ObjectApiError::Backend("injected write failure".to_string()));
        }
        if self.take_conflict(name) {
            return Err(ObjectApiError::Conflict);
        }
        Ok(())
    }
}

/// Object API backed by a map.
#[derive(Default)]
pub struct InMemoryObjectApi {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl InMemoryObjectApi {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `count` writes fail with a version conflict.
    pub async fn inject_conflicts(&self, count: usize) {
        self.state.lock().await.pending_conflicts = count;
    }

    /// Make every write fail with a backend error until switched off.
    pub async fn fail_writes(&self, fail: bool) {
        self.state.lock().await.fail_writes = fail;
    }

    /// Number of write attempts seen so far (including failed ones).
    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }

    /// Snapshot of every stored record, ordered by name.
    pub async fn records(&self) -> Vec<PhysicalRecord> {
        self.state.lock().await.records.values().cloned().collect()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ObjectApi for InMemoryObjectApi {
    async fn get(&self, name: &str) -> Result<PhysicalRecord, ObjectApiError> {
        self.delay().await;
        self.state
            .lock()
            .await
            .records
            .get(name)
            .cloned()
            .ok_or(ObjectApiError::NotFound)
    }

    async fn create(&self, record: &PhysicalRecord) -> Result<PhysicalRecord, ObjectApiError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.check_write(&record.name)?;
        if state.records.contains_key(&record.name) {
            return Err(ObjectApiError::AlreadyExists);
        }

        let mut created = record.clone();
        created.uid = Uuid::new_v4().to_string();
        created.resource_version = state.next_version();
        state.records.insert(created.name.clone(), created.clone());
        Ok(created)
    }

    async fn update(&self, record: &PhysicalRecord) -> Result<PhysicalRecord, ObjectApiError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.check_write(&record.name)?;

        let current = state
            .records
            .get(&record.name)
            .ok_or(ObjectApiError::NotFound)?;
        if current.resource_version != record.resource_version {
            return Err(ObjectApiError::Conflict);
        }
        let uid = current.uid.clone();

        let mut updated = record.clone();
        updated.uid = uid;
        updated.resource_version = state.next_version();
        state.records.insert(updated.name.clone(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, name: &str, resource_version: u64) -> Result<(), ObjectApiError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.check_write(name)?;

        let current = state.records.get(name).ok_or(ObjectApiError::NotFound)?;
        if current.resource_version != resource_version {
            return Err(ObjectApiError::Conflict);
        }
        state.records.remove(name);
        Ok(())
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<PhysicalRecord>, ObjectApiError> {
        self.delay().await;
        Ok(self
            .state
            .lock()
            .await
            .records
            .values()
            .filter(|record| selector.matches(&record.labels))
            .cloned()
            .collect())
    }
}
