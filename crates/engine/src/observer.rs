// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Observer hub: the external-facing event adapter.
//!
//! Forwards the curated public event set (everything except internal
//! activation signals) to registered clients as JSON values. Forwarding
//! is non-blocking with a bounded queue per client; a client that cannot
//! keep up is dropped from the set with a warning and must re-bootstrap
//! through the query API.

use crate::bus::EventBus;
use parking_lot::RwLock;
use quaero_core::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub type SubscriberId = u64;

struct Client {
    id: SubscriberId,
    tx: mpsc::Sender<serde_json::Value>,
}

pub struct ObserverHub {
    clients: RwLock<Arc<Vec<Client>>>,
    next_id: AtomicU64,
    /// Per-client queue depth before the client counts as slow.
    capacity: usize,
}

impl ObserverHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    /// Register a client; it consumes events from the returned receiver.
    pub fn attach(&self) -> (SubscriberId, mpsc::Receiver<serde_json::Value>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.clients.write();
        let mut next: Vec<Client> =
            guard.iter().map(|c| Client { id: c.id, tx: c.tx.clone() }).collect();
        next.push(Client { id, tx });
        *guard = Arc::new(next);
        (id, rx)
    }

    pub fn detach(&self, id: SubscriberId) {
        let mut guard = self.clients.write();
        let next: Vec<Client> = guard
            .iter()
            .filter(|c| c.id != id)
            .map(|c| Client { id: c.id, tx: c.tx.clone() })
            .collect();
        *guard = Arc::new(next);
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Start forwarding curated bus events until shutdown.
    pub fn start(
        self: &Arc<Self>,
        bus: &Arc<EventBus>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let (subscription, mut rx) = bus.subscribe_channel(|event| {
            !matches!(event, Event::StepActivation { .. })
        });
        let hub = self.clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Some(event) => hub.forward(&event),
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
            bus.unsubscribe(subscription);
            debug!("observer hub stopped");
        })
    }

    fn forward(&self, event: &Event) {
        let value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                error!(event = event.name(), error = %e, "failed to encode event");
                return;
            }
        };

        let snapshot = self.clients.read().clone();
        let mut slow = Vec::new();
        for client in snapshot.iter() {
            match client.tx.try_send(value.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client = client.id, "dropping slow observer");
                    slow.push(client.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => slow.push(client.id),
            }
        }
        for id in slow {
            self.detach(id);
        }
    }
}

#[cfg(test)]
#[path = "observer_tests.rs"]
mod tests;
