// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable work queue with visibility timeout and at-least-once delivery.
//!
//! Messages live under `queue/msg/<id>` with a time-ordered index
//! `queue/visible/<ts>/<id>` that makes "earliest visible first" a prefix
//! scan. A receive bumps `receive_count` and re-indexes the message at
//! `now + visibility_timeout`; an ack deletes it. Messages whose delivery
//! budget is spent move to `queue/dead/<id>` and their job is failed.
//!
//! FIFO per worker type is best-effort only: redelivery reorders. Workers
//! must be idempotent on the job id.

use crate::jobs::{JobStore, JobStoreError};
use crate::keys;
use crate::store::{Store, StoreError};
use crate::wal::Op;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use quaero_core::{Clock, Event, EventSink, JobId, MessageId, QueueMessage};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// How often a blocked receiver re-scans for newly visible messages.
///
/// Wake-ups also happen eagerly on enqueue; this bounds the latency of
/// visibility-timeout expiry.
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Error message recorded on dead-lettered jobs.
pub const DEAD_LETTER_ERROR: &str = "exceeded max receives";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message not found: {0}")]
    NotFound(MessageId),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Jobs(#[from] JobStoreError),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Queue tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// How long a received message stays invisible.
    pub visibility_timeout: Duration,
    /// Dead-letter threshold.
    pub max_receives: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { visibility_timeout: Duration::from_secs(30), max_receives: 5 }
    }
}

/// Durable message queue over the store.
pub struct Queue {
    store: Arc<Store>,
    jobs: JobStore,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    notify: Notify,
}

impl Queue {
    pub fn new(
        store: Arc<Store>,
        jobs: JobStore,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self { store, jobs, sink, clock, config, notify: Notify::new() }
    }

    pub fn config(&self) -> QueueConfig {
        self.config
    }

    /// Build a message for a leaf job with this queue's delivery budget.
    pub fn message_for(&self, job_id: JobId, worker_type: impl Into<String>) -> QueueMessage {
        QueueMessage::new(job_id, worker_type, self.clock.now_utc(), self.config.max_receives)
    }

    /// Persist a message atomically with caller-supplied companion writes
    /// (the leaf job record and its indexes).
    pub fn enqueue(&self, msg: &QueueMessage, companions: Vec<Op>) -> Result<(), QueueError> {
        let mut ops = companions;
        ops.push(Op::set(keys::queue_msg(&msg.id), serde_json::to_vec(msg)?));
        ops.push(Op::set(keys::queue_visible(visible_at(msg), &msg.id), Vec::new()));
        self.store.apply(ops)?;
        self.notify.notify_waiters();
        Ok(())
    }

    /// Block until a visible message for one of `worker_types` exists, or
    /// `timeout` elapses. Receiving hides the message for the visibility
    /// timeout and bumps its receive count.
    pub async fn receive(
        &self,
        worker_types: &[String],
        timeout: Duration,
    ) -> Result<Option<QueueMessage>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.try_receive(worker_types)? {
                return Ok(Some(msg));
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Ok(None),
            };
            let wait = remaining.min(RECEIVE_POLL_INTERVAL);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// One non-blocking receive attempt, scanning the visibility index in
    /// time order.
    pub fn try_receive(
        &self,
        worker_types: &[String],
    ) -> Result<Option<QueueMessage>, QueueError> {
        let now = self.clock.now_utc();
        for index_key in self.store.scan_keys(keys::QUEUE_VISIBLE) {
            let id = MessageId::from_string(keys::last_segment(&index_key));
            let Some(bytes) = self.store.get(&keys::queue_msg(&id)) else {
                // Ack raced the scan; drop the stale index entry.
                self.store.delete(index_key)?;
                continue;
            };
            let mut msg: QueueMessage = serde_json::from_slice(&bytes)?;
            if !msg.is_visible(now) {
                // Index is time-ordered; everything after this is in the future.
                break;
            }
            if !worker_types.iter().any(|t| t == &msg.worker_type) {
                continue;
            }
            if msg.exhausted() {
                self.dead_letter(&msg, &index_key)?;
                continue;
            }

            msg.receive_count += 1;
            msg.visible_after = Some(now + chrono_duration(self.config.visibility_timeout));
            self.store.apply(vec![
                Op::delete(index_key),
                Op::set(keys::queue_msg(&msg.id), serde_json::to_vec(&msg)?),
                Op::set(keys::queue_visible(visible_at(&msg), &msg.id), Vec::new()),
            ])?;
            return Ok(Some(msg));
        }
        Ok(None)
    }

    /// Push a received message's visibility further into the future.
    /// Workers doing long operations call this at roughly half the
    /// visibility timeout.
    pub fn extend(&self, id: &MessageId, delta: Duration) -> Result<(), QueueError> {
        let Some(bytes) = self.store.get(&keys::queue_msg(id)) else {
            return Err(QueueError::NotFound(*id));
        };
        let mut msg: QueueMessage = serde_json::from_slice(&bytes)?;
        let old_index = keys::queue_visible(visible_at(&msg), &msg.id);
        msg.visible_after = Some(self.clock.now_utc() + chrono_duration(delta));
        self.store.apply(vec![
            Op::delete(old_index),
            Op::set(keys::queue_msg(&msg.id), serde_json::to_vec(&msg)?),
            Op::set(keys::queue_visible(visible_at(&msg), &msg.id), Vec::new()),
        ])?;
        Ok(())
    }

    /// Delete a message after successful processing. Idempotent: acking a
    /// message that is already gone is not an error.
    pub fn ack(&self, id: &MessageId) -> Result<(), QueueError> {
        let Some(bytes) = self.store.get(&keys::queue_msg(id)) else {
            return Ok(());
        };
        let msg: QueueMessage = serde_json::from_slice(&bytes)?;
        self.store.apply(vec![
            Op::delete(keys::queue_msg(id)),
            Op::delete(keys::queue_visible(visible_at(&msg), &msg.id)),
        ])?;
        Ok(())
    }

    /// Move a spent message to the dead-letter prefix and fail its job.
    fn dead_letter(&self, msg: &QueueMessage, index_key: &str) -> Result<(), QueueError> {
        self.store.apply(vec![
            Op::delete(keys::queue_msg(&msg.id)),
            Op::delete(index_key.to_string()),
            Op::set(keys::queue_dead(&msg.id), serde_json::to_vec(msg)?),
        ])?;
        warn!(msg = %msg.id, job = %msg.job_id, receives = msg.receive_count, "message dead-lettered");

        match self.jobs.force_fail(&msg.job_id, DEAD_LETTER_ERROR, self.clock.now_utc()) {
            Ok((old_status, job)) => {
                self.sink.publish(Event::JobStatusChange {
                    job_id: job.id,
                    manager_id: job.manager_id,
                    parent_id: job.parent_id,
                    kind: job.kind,
                    old_status,
                    new_status: job.status,
                    error: job.error,
                });
            }
            // Already terminal (e.g. cancelled while queued): nothing to report.
            Err(JobStoreError::Transition(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Drop not-yet-acked messages for the given jobs (cancellation).
    /// Workers already holding a delivery re-check job status instead.
    pub fn drop_for_jobs(&self, job_ids: &HashSet<JobId>) -> Result<usize, QueueError> {
        let mut dropped = 0;
        for (key, bytes) in self.store.scan(keys::QUEUE_MSG) {
            let msg: QueueMessage = serde_json::from_slice(&bytes)?;
            if !job_ids.contains(&msg.job_id) {
                continue;
            }
            self.store.apply(vec![
                Op::delete(key),
                Op::delete(keys::queue_visible(visible_at(&msg), &msg.id)),
            ])?;
            dropped += 1;
        }
        Ok(dropped)
    }

    /// Startup pass: ack messages whose job is already terminal, count the
    /// live remainder. Non-terminal leaves keep their persisted messages
    /// and become visible again within the visibility timeout.
    pub fn recover(&self) -> Result<usize, QueueError> {
        let mut live = 0;
        for (_, bytes) in self.store.scan(keys::QUEUE_MSG) {
            let msg: QueueMessage = serde_json::from_slice(&bytes)?;
            match self.jobs.get(&msg.job_id)? {
                Some(job) if job.is_terminal() => self.ack(&msg.id)?,
                Some(_) => live += 1,
                None => {
                    warn!(msg = %msg.id, job = %msg.job_id, "queue message without job record");
                    self.ack(&msg.id)?;
                }
            }
        }
        if live > 0 {
            debug!(live, "queue recovery complete");
        }
        Ok(live)
    }

    /// Messages in the dead-letter prefix.
    pub fn dead_letters(&self) -> Result<Vec<QueueMessage>, QueueError> {
        self.store
            .scan(keys::QUEUE_DEAD)
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(QueueError::from))
            .collect()
    }

    /// Number of live (not dead-lettered) messages.
    pub fn len(&self) -> usize {
        self.store.scan_keys(keys::QUEUE_MSG).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Index timestamp for a message: its visibility horizon, or its enqueue
/// time while never received.
fn visible_at(msg: &QueueMessage) -> DateTime<Utc> {
    msg.visible_after.unwrap_or(msg.enqueued_at)
}

fn chrono_duration(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
