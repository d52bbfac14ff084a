// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process pub/sub for engine events.
//!
//! `publish` never blocks the caller: the subscriber list is an immutable
//! snapshot swapped on register, filters run inline, and each matching
//! handler is invoked on a fresh task with panic recovery. Events are not
//! persisted; consumers needing history query the job store.

use parking_lot::RwLock;
use quaero_core::{Event, EventSink, Job, JobStatus};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;
type EventHandler = Arc<dyn Fn(Event) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: EventFilter,
    handler: EventHandler,
}

/// Asynchronous in-process event bus.
///
/// Must be used inside a tokio runtime: handlers run on spawned tasks.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Arc<Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. The filter runs on the publishing path; keep it
    /// cheap. Returns an id for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(
        &self,
        filter: impl Fn(&Event) -> bool + Send + Sync + 'static,
        handler: impl Fn(Event) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber =
            Subscriber { id, filter: Arc::new(filter), handler: Arc::new(handler) };

        let mut guard = self.subscribers.write();
        let mut next: Vec<Subscriber> = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().map(|s| Subscriber {
            id: s.id,
            filter: s.filter.clone(),
            handler: s.handler.clone(),
        }));
        next.push(subscriber);
        *guard = Arc::new(next);
        id
    }

    /// Subscribe through an unbounded channel, for single-consumer tasks
    /// (monitor, observer hub).
    pub fn subscribe_channel(
        &self,
        filter: impl Fn(&Event) -> bool + Send + Sync + 'static,
    ) -> (u64, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(filter, move |event| {
            let _ = tx.send(event);
        });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut guard = self.subscribers.write();
        let next: Vec<Subscriber> = guard
            .iter()
            .filter(|s| s.id != id)
            .map(|s| Subscriber { id: s.id, filter: s.filter.clone(), handler: s.handler.clone() })
            .collect();
        *guard = Arc::new(next);
    }

    /// Publish to all matching subscribers. Non-blocking; handler panics
    /// are recovered per handler.
    pub fn publish(&self, event: Event) {
        let snapshot = self.subscribers.read().clone();
        for subscriber in snapshot.iter() {
            if !(subscriber.filter)(&event) {
                continue;
            }
            let handler = subscriber.handler.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let name = event.name();
                if std::panic::catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                    error!(event = name, "event handler panicked");
                }
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: Event) {
        EventBus::publish(self, event);
    }
}

/// The status-change event for a transition that produced `job`.
pub fn status_change(old_status: JobStatus, job: &Job) -> Event {
    Event::JobStatusChange {
        job_id: job.id,
        manager_id: job.manager_id,
        parent_id: job.parent_id,
        kind: job.kind,
        old_status,
        new_status: job.status,
        error: job.error.clone(),
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
