//! Change propagation between resources.
//!
//! When a resource changes, the resources that declare a connection to it may
//! need to be re-provisioned. A [`NotificationFilter`] decides which ones and
//! queues an operation for each; the [`NotificationDispatcher`] fans a change
//! out to every registered filter.

pub mod connections;

pub use self::connections::ConnectionsFilter;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ucp_store::ResourceId;

use crate::error::Result;

/// Why a notification was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationReason {
    /// The resource was created.
    Created,
    /// The resource was updated.
    Updated,
    /// The resource was deleted.
    Deleted,
}

impl fmt::Display for NotificationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Deleted => "Deleted",
        };
        f.write_str(reason)
    }
}

/// A resource changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// The changed resource.
    pub id: ResourceId,
    /// What happened to it.
    pub reason: NotificationReason,
}

impl Notification {
    /// Create a notification.
    pub fn new(id: ResourceId, reason: NotificationReason) -> Self {
        Self { id, reason }
    }
}

/// Reacts to resource changes.
#[async_trait]
pub trait NotificationFilter: Send + Sync {
    /// Handle a change notification.
    async fn send(&self, cancel: &CancellationToken, notification: &Notification) -> Result<()>;
}

/// Sends notifications to every registered filter, in registration order.
#[derive(Default, Clone)]
pub struct NotificationDispatcher {
    filters: Vec<Arc<dyn NotificationFilter>>,
}

impl NotificationDispatcher {
    /// A dispatcher with no filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter.
    pub fn with_filter(mut self, filter: Arc<dyn NotificationFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether no filters are registered.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Deliver `notification` to each filter. Stops at the first error.
    pub async fn send(&self, cancel: &CancellationToken, notification: &Notification) -> Result<()> {
        debug!(
            id = %notification.id,
            reason = %notification.reason,
            filters = self.filters.len(),
            "Dispatching notification"
        );
        for filter in &self.filters {
            filter.send(cancel, notification).await?;
        }
        Ok(())
    }
}
