// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quaero-core: Data model for the Quaero job orchestration engine.
//!
//! Jobs form a strict three-level tree (manager → step → leaf). This crate
//! holds the persisted record types, the status machine, queue message and
//! log entry shapes, and the typed event vocabulary shared by the storage
//! and engine crates.

pub mod macros;

pub mod clock;
pub mod definition;
pub mod duration;
pub mod event;
pub mod id;
pub mod job;
pub mod log;
pub mod queue;
pub mod worker;

pub use clock::{Clock, FakeClock, SystemClock};
pub use definition::{ConfigMap, ErrorTolerance, JobDefinition, StepDefinition};
pub use duration::parse_duration;
pub use event::{Event, EventSink, NullSink};
pub use id::{short, DocumentId};
#[cfg(any(test, feature = "test-support"))]
pub use job::JobBuilder;
pub use job::{InvalidTransition, Job, JobId, JobKind, JobStatus, StatusCounts};
pub use log::{LogDraft, LogEntry, LogLevel};
pub use queue::{MessageId, QueueMessage};
pub use worker::WorkerId;
