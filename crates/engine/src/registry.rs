// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker registry: worker-type strings to implementations.
//!
//! Leaf execution and step planning are orthogonal capabilities, so they
//! register separately; one implementation may provide both. Registration
//! happens during app initialization and swaps an immutable snapshot;
//! dispatch-path lookups only clone an `Arc`.

use crate::worker::{LeafWorker, StepManager};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
struct Snapshot {
    leaf: HashMap<String, Arc<dyn LeafWorker>>,
    step: HashMap<String, Arc<dyn StepManager>>,
}

#[derive(Default)]
pub struct WorkerRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leaf worker under its own `worker_type`.
    pub fn register_leaf(&self, worker: Arc<dyn LeafWorker>) {
        let mut guard = self.snapshot.write();
        let mut next = Snapshot {
            leaf: guard.leaf.clone(),
            step: guard.step.clone(),
        };
        next.leaf.insert(worker.worker_type().to_string(), worker);
        *guard = Arc::new(next);
    }

    /// Register a step planner for a worker type.
    pub fn register_step(&self, worker_type: impl Into<String>, planner: Arc<dyn StepManager>) {
        let mut guard = self.snapshot.write();
        let mut next = Snapshot {
            leaf: guard.leaf.clone(),
            step: guard.step.clone(),
        };
        next.step.insert(worker_type.into(), planner);
        *guard = Arc::new(next);
    }

    pub fn leaf(&self, worker_type: &str) -> Option<Arc<dyn LeafWorker>> {
        self.snapshot.read().leaf.get(worker_type).cloned()
    }

    pub fn step_manager(&self, worker_type: &str) -> Option<Arc<dyn StepManager>> {
        self.snapshot.read().step.get(worker_type).cloned()
    }

    /// Every registered leaf worker type, for the dispatcher's receive set.
    pub fn leaf_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.snapshot.read().leaf.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
