// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error kinds.
//!
//! Worker-facing errors (`Worker`, `Timeout`, `Panic`, `Cancelled`) are
//! converted into job state transitions by the dispatcher and never escape
//! the receive loop. Command/query errors (`Validation`, `NotFound`,
//! `AlreadyExists`, `InvalidTransition`) surface to the API caller without
//! mutating state.

use quaero_storage::{JobStoreError, QueueError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Definition or config malformed; nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The persistence layer is unreachable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A worker returned an error; the owning leaf is failed.
    #[error("{0}")]
    Worker(String),

    /// A leaf exceeded its step's soft wall-clock timeout.
    #[error("timeout")]
    Timeout,

    /// Recovered panic in a worker or handler.
    #[error("panic: {0}")]
    Panic(String),

    /// Work was cancelled through its context.
    #[error("cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}

impl From<JobStoreError> for EngineError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(id) => EngineError::NotFound(id.to_string()),
            JobStoreError::AlreadyExists(id) => EngineError::AlreadyExists(id.to_string()),
            JobStoreError::Transition(t) => EngineError::InvalidTransition(t.to_string()),
            JobStoreError::Store(s) => s.into(),
            JobStoreError::Codec(c) => EngineError::StoreUnavailable(c.to_string()),
        }
    }
}

impl From<QueueError> for EngineError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::NotFound(id) => EngineError::NotFound(id.to_string()),
            QueueError::Store(s) => s.into(),
            QueueError::Jobs(j) => j.into(),
            QueueError::Codec(c) => EngineError::StoreUnavailable(c.to_string()),
        }
    }
}
