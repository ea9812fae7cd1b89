// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory queue for tests and single-process deployments.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Message, QueueClient, QueueError};

/// Default lease length of a dequeued message.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Default)]
struct State {
    messages: VecDeque<Message>,
    fail_enqueue: bool,
}

/// Process-local queue with leases.
pub struct InMemoryQueue {
    state: Mutex<State>,
    visibility_timeout: TimeDelta,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    /// An empty queue with the default visibility timeout.
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    /// An empty queue whose leases last `timeout`.
    pub fn with_visibility_timeout(timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State::default()),
            visibility_timeout: TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Make every enqueue fail until switched off.
    pub async fn fail_enqueue(&self, fail: bool) {
        self.state.lock().await.fail_enqueue = fail;
    }

    /// Number of messages, leased or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    /// Whether the queue holds no messages.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of every message, in queue order.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.iter().cloned().collect()
    }

    fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.visibility_timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), QueueError> {
    if cancel.is_cancelled() {
        return Err(QueueError::Cancelled);
    }
    Ok(())
}

/// Position of `message` if the caller still holds its lease.
fn leased_position(
    messages: &VecDeque<Message>,
    message: &Message,
    now: DateTime<Utc>,
) -> Result<usize, QueueError> {
    let lost = || QueueError::LeaseLost {
        id: message.id.clone(),
    };
    let index = messages
        .iter()
        .position(|m| m.id == message.id)
        .ok_or_else(lost)?;
    let stored = &messages[index];
    if stored.next_visible_at != message.next_visible_at || stored.next_visible_at <= now {
        return Err(lost());
    }
    Ok(index)
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn enqueue(
        &self,
        cancel: &CancellationToken,
        message: Message,
    ) -> Result<(), QueueError> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        if state.fail_enqueue {
            return Err(QueueError::Unavailable("injected enqueue failure".to_string()));
        }
        debug!(message_id = %message.id, "Message enqueued");
        state.messages.push_back(message);
        Ok(())
    }

    async fn dequeue(&self, cancel: &CancellationToken) -> Result<Option<Message>, QueueError> {
        ensure_active(cancel)?;
        let now = Utc::now();
        let lease_until = self.lease_until(now);

        let mut state = self.state.lock().await;
        let Some(message) = state
            .messages
            .iter_mut()
            .find(|m| m.next_visible_at <= now)
        else {
            return Ok(None);
        };

        message.dequeue_count += 1;
        message.next_visible_at = lease_until;
        Ok(Some(message.clone()))
    }

    async fn finish_message(
        &self,
        cancel: &CancellationToken,
        message: &Message,
    ) -> Result<(), QueueError> {
        ensure_active(cancel)?;
        let mut state = self.state.lock().await;
        let index = leased_position(&state.messages, message, Utc::now())?;
        state.messages.remove(index);
        Ok(())
    }

    async fn extend_message(
        &self,
        cancel: &CancellationToken,
        message: &mut Message,
    ) -> Result<(), QueueError> {
        ensure_active(cancel)?;
        let now = Utc::now();
        let lease_until = self.lease_until(now);

        let mut state = self.state.lock().await;
        let index = leased_position(&state.messages, message, now)?;
        state.messages[index].next_visible_at = lease_until;
        message.next_visible_at = lease_until;
        Ok(())
    }
}
