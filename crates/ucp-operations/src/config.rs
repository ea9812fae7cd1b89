// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::context::DEFAULT_LOCATION;
use crate::queue::InMemoryQueue;
use crate::statusmanager::QueueOperationOptions;
use crate::worker::WorkerConfig;

/// Async operation configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Location segment of operation status IDs.
    pub location: String,
    /// Default operation timeout.
    pub operation_timeout: Duration,
    /// Default Retry-After advertised to pollers.
    pub retry_after: Duration,
    /// Lease length of a dequeued message.
    pub queue_visibility_timeout: Duration,
    /// Operations a worker runs in parallel.
    pub worker_max_concurrency: usize,
    /// Deliveries before an operation is failed.
    pub worker_max_dequeue_count: u32,
    /// Idle dequeue poll interval.
    pub worker_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let worker = WorkerConfig::default();
        let options = QueueOperationOptions::default();
        Self {
            location: DEFAULT_LOCATION.to_string(),
            operation_timeout: options.operation_timeout,
            retry_after: options.retry_after,
            queue_visibility_timeout: crate::queue::inmemory::DEFAULT_VISIBILITY_TIMEOUT,
            worker_max_concurrency: worker.max_concurrency,
            worker_max_dequeue_count: worker.max_dequeue_count,
            worker_poll_interval: worker.poll_interval,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `UCP_LOCATION`: status ID location (default: global)
    /// - `UCP_OPERATION_TIMEOUT_SECS`: operation timeout (default: 3600)
    /// - `UCP_RETRY_AFTER_SECS`: poll interval for clients (default: 60)
    /// - `UCP_QUEUE_VISIBILITY_TIMEOUT_SECS`: message lease (default: 300)
    /// - `UCP_WORKER_MAX_CONCURRENCY`: parallel operations (default: 10)
    /// - `UCP_WORKER_MAX_DEQUEUE_COUNT`: deliveries before failing (default: 5)
    /// - `UCP_WORKER_POLL_INTERVAL_MS`: idle poll interval (default: 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let location =
            std::env::var("UCP_LOCATION").unwrap_or_else(|_| defaults.location.clone());
        if location.is_empty() || location.contains('/') {
            return Err(ConfigError::Invalid(
                "UCP_LOCATION",
                "must be a non-empty name without '/'",
            ));
        }

        Ok(Self {
            location,
            operation_timeout: Duration::from_secs(positive(
                "UCP_OPERATION_TIMEOUT_SECS",
                defaults.operation_timeout.as_secs(),
            )?),
            retry_after: Duration::from_secs(positive(
                "UCP_RETRY_AFTER_SECS",
                defaults.retry_after.as_secs(),
            )?),
            queue_visibility_timeout: Duration::from_secs(positive(
                "UCP_QUEUE_VISIBILITY_TIMEOUT_SECS",
                defaults.queue_visibility_timeout.as_secs(),
            )?),
            worker_max_concurrency: positive(
                "UCP_WORKER_MAX_CONCURRENCY",
                defaults.worker_max_concurrency,
            )?,
            worker_max_dequeue_count: positive(
                "UCP_WORKER_MAX_DEQUEUE_COUNT",
                defaults.worker_max_dequeue_count,
            )?,
            worker_poll_interval: Duration::from_millis(positive(
                "UCP_WORKER_POLL_INTERVAL_MS",
                defaults.worker_poll_interval.as_millis() as u64,
            )?),
        })
    }

    /// Default options for queueing operations.
    pub fn queue_options(&self) -> QueueOperationOptions {
        QueueOperationOptions {
            operation_timeout: self.operation_timeout,
            retry_after: self.retry_after,
            target_state: None,
        }
    }

    /// An in-memory queue leasing messages for `queue_visibility_timeout`.
    pub fn in_memory_queue(&self) -> InMemoryQueue {
        InMemoryQueue::with_visibility_timeout(self.queue_visibility_timeout)
    }

    /// Worker settings.
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_concurrency: self.worker_max_concurrency,
            max_dequeue_count: self.worker_max_dequeue_count,
            poll_interval: self.worker_poll_interval,
        }
    }
}

/// Read a positive integer, falling back to `default` when unset.
fn positive<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .ok()
            .filter(|n| *n > T::default())
            .ok_or(ConfigError::Invalid(key, "must be a positive integer")),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
