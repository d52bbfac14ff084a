// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue message envelope.

use crate::job::JobId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a queue message.
    pub struct MessageId;
}

/// Envelope around a leaf job id waiting for a worker.
///
/// Inserted atomically with the leaf job record. Delivery is at-least-once:
/// a receive bumps `receive_count` and hides the message for the visibility
/// timeout; only an ack removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: MessageId,
    pub job_id: JobId,
    pub worker_type: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub receive_count: u32,
    /// Invisible to receivers while this is in the future. `None` means
    /// visible immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_after: Option<DateTime<Utc>>,
    pub max_receives: u32,
}

impl QueueMessage {
    pub fn new(
        job_id: JobId,
        worker_type: impl Into<String>,
        enqueued_at: DateTime<Utc>,
        max_receives: u32,
    ) -> Self {
        Self {
            id: MessageId::new(),
            job_id,
            worker_type: worker_type.into(),
            enqueued_at,
            receive_count: 0,
            visible_after: None,
            max_receives,
        }
    }

    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        match self.visible_after {
            Some(at) => at <= now,
            None => true,
        }
    }

    /// True when the message has used up its delivery budget and must be
    /// dead-lettered instead of delivered again.
    pub fn exhausted(&self) -> bool {
        self.receive_count >= self.max_receives
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
