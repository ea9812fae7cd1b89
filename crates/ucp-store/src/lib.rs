// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! UCP Store - resource identifiers and collision-tolerant storage
//!
//! This crate provides the storage core of the universal control plane: a
//! structured resource identifier, a storage client contract, and an
//! implementation of that contract on top of a foreign object API that only
//! knows about named, labelled, versioned records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              Controllers / ucp-operations (status, worker)               │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ StorageClient
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          ObjectStoreClient                              │
//! │   ID → hashed record name · entry list · labels · CAS retry loop        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ ObjectApi
//!                   ┌────────────────┴────────────────┐
//!                   ▼                                 ▼
//!         ┌───────────────────┐             ┌───────────────────┐
//!         │ InMemoryObjectApi │             │  SqliteObjectApi  │
//!         └───────────────────┘             └───────────────────┘
//! ```
//!
//! # Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `Get` | Read one object by ID; collections and the empty ID are invalid |
//! | `Save` | Create or replace, optionally guarded by an ETag precondition |
//! | `Delete` | Remove, optionally guarded by an ETag precondition |
//! | `Query` | Scope/type/routing match plus property filters |
//!
//! ## Concurrency
//!
//! No in-process locks. Each `Save`/`Delete` re-reads the physical record,
//! applies its change and writes back conditionally on the record version.
//! Losing the race triggers a retry from the read, up to a fixed budget
//! (default 10), after which the call fails with `Concurrency`. Every call
//! takes a `CancellationToken` and stops as soon as it fires.
//!
//! ## Errors
//!
//! | Error | HTTP | Meaning |
//! |-------|------|---------|
//! | `Invalid` | 400 | Malformed input |
//! | `NotFound` | 404 | No such resource |
//! | `Concurrency` | 412 | ETag mismatch or retry budget exhausted |
//! | `Internal` | 500 | Backend or serialization failure |
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `UCP_STORAGE_PROVIDER` | No | `inmemory` | `inmemory` or `sqlite` |
//! | `UCP_STORAGE_SQLITE_PATH` | For `sqlite` | - | Database file |
//! | `UCP_STORAGE_NAMESPACE` | No | `ucp-system` | Record namespace |
//! | `UCP_STORAGE_RETRY_COUNT` | No | `10` | Conditional-write retry budget |

#![deny(missing_docs)]

/// Storage client contract and per-call options.
pub mod client;

/// Storage configuration from environment variables.
pub mod config;

/// Per-resource-type storage client construction.
pub mod dataprovider;

/// Error types with HTTP status mapping.
pub mod error;

/// Content-derived ETags.
pub mod etag;

/// Embedded SQLite migrations.
pub mod migrations;

/// Stored objects and property filters.
pub mod object;

/// Collision-tolerant store over a foreign object API.
pub mod objectstore;

/// Scope and type queries.
pub mod query;

/// Resource identifier parsing and normalization.
pub mod resources;

pub use client::{DeleteOptions, GetOptions, QueryOptions, SaveOptions, StorageClient};
pub use dataprovider::StorageProvider;
pub use error::{Result, StoreError};
pub use object::{Metadata, Object, QueryFilter};
pub use query::{Query, QueryResult};
pub use resources::ResourceId;
