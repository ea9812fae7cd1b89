// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::path::PathBuf;

use crate::objectstore::DEFAULT_RETRY_COUNT;

/// Default backing-store namespace.
pub const DEFAULT_NAMESPACE: &str = "ucp-system";

/// Which object API backs the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Process-local map. Data is lost on exit.
    InMemory,
    /// SQLite database file.
    Sqlite {
        /// Path of the database file.
        path: PathBuf,
    },
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backing object API.
    pub backend: StorageBackend,
    /// Namespace all physical records live in.
    pub namespace: String,
    /// Conditional-write retry budget.
    pub retry_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: StorageBackend::InMemory,
            namespace: DEFAULT_NAMESPACE.to_string(),
            retry_count: DEFAULT_RETRY_COUNT,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `UCP_STORAGE_PROVIDER`: `inmemory` or `sqlite` (default: inmemory)
    /// - `UCP_STORAGE_SQLITE_PATH`: database file, required for `sqlite`
    /// - `UCP_STORAGE_NAMESPACE`: record namespace (default: ucp-system)
    /// - `UCP_STORAGE_RETRY_COUNT`: conditional-write retries (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider =
            std::env::var("UCP_STORAGE_PROVIDER").unwrap_or_else(|_| "inmemory".to_string());

        let backend = match provider.to_lowercase().as_str() {
            "inmemory" => StorageBackend::InMemory,
            "sqlite" => {
                let path = std::env::var("UCP_STORAGE_SQLITE_PATH")
                    .map_err(|_| ConfigError::Missing("UCP_STORAGE_SQLITE_PATH"))?;
                StorageBackend::Sqlite {
                    path: PathBuf::from(path),
                }
            }
            _ => {
                return Err(ConfigError::Invalid(
                    "UCP_STORAGE_PROVIDER",
                    "must be 'inmemory' or 'sqlite'",
                ));
            }
        };

        let namespace = std::env::var("UCP_STORAGE_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        if namespace.is_empty() {
            return Err(ConfigError::Invalid(
                "UCP_STORAGE_NAMESPACE",
                "must not be empty",
            ));
        }

        let retry_count: usize = std::env::var("UCP_STORAGE_RETRY_COUNT")
            .unwrap_or_else(|_| DEFAULT_RETRY_COUNT.to_string())
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(ConfigError::Invalid(
                "UCP_STORAGE_RETRY_COUNT",
                "must be a positive integer",
            ))?;

        Ok(Self {
            backend,
            namespace,
            retry_count,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
