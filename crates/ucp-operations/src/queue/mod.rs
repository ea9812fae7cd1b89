//! Message queue contract used to hand async operations to workers.
//!
//! Delivery is at-least-once with leases: a dequeued message stays invisible
//! for the visibility timeout. If the consumer neither finishes nor extends it
//! in time, the message becomes visible again and the next delivery carries an
//! incremented `dequeue_count`.

pub mod inmemory;

pub use self::inmemory::InMemoryQueue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message ID assigned on creation.
    pub id: String,
    /// Payload.
    pub data: Value,
    /// Number of times this message has been delivered.
    pub dequeue_count: u32,
    /// When the message was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// When the current lease expires and the message becomes visible again.
    pub next_visible_at: DateTime<Utc>,
}

impl Message {
    /// A new, immediately visible message.
    pub fn new(data: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            data,
            dequeue_count: 0,
            enqueued_at: now,
            next_visible_at: now,
        }
    }
}

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The message's lease expired or it was redelivered to someone else.
    #[error("lease lost for message {id}")]
    LeaseLost {
        /// Message ID.
        id: String,
    },

    /// The queue could not be reached or refused the request.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    /// The caller's cancellation token fired.
    #[error("queue operation cancelled")]
    Cancelled,
}

/// A leased, at-least-once message queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Add a message.
    async fn enqueue(&self, cancel: &CancellationToken, message: Message)
    -> Result<(), QueueError>;

    /// Lease the next visible message, if any.
    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Message>, QueueError>;

    /// Remove a leased message for good.
    async fn finish_message(
        &self,
        cancel: &CancellationToken,
        message: &Message,
    ) -> Result<(), QueueError>;

    /// Push the lease of `message` out by another visibility timeout.
    async fn extend_message(
        &self,
        cancel: &CancellationToken,
        message: &mut Message,
    ) -> Result<(), QueueError>;
}
