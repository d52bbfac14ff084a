// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-manager cancellation tokens.
//!
//! Every leaf execution context derives from its manager's token, so
//! cancelling a manager propagates to all of its in-flight work. The core
//! never force-terminates workers; they observe the token at their own
//! suspension points.

use parking_lot::Mutex;
use quaero_core::JobId;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CancelRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The manager's root token, created on first use. Tokens recreate on
    /// demand after a restart.
    pub fn token(&self, manager_id: &JobId) -> CancellationToken {
        self.tokens.lock().entry(*manager_id).or_default().clone()
    }

    /// Cancel everything running under a manager.
    pub fn cancel(&self, manager_id: &JobId) {
        self.token(manager_id).cancel();
    }

    /// Drop bookkeeping for a terminal manager.
    pub fn remove(&self, manager_id: &JobId) {
        self.tokens.lock().remove(manager_id);
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().is_empty()
    }
}
