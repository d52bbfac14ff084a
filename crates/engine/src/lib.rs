// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quaero-engine: Orchestration runtime for the Quaero engine.
//!
//! Wires the storage layer into a running system: a dispatcher pool pulls
//! leaf work from the durable queue into typed workers, the orchestrator
//! turns definitions into manager/step/leaf trees and walks steps in
//! order, the monitor rolls leaf status into step and manager aggregates,
//! and the log pipeline and observer hub feed external clients.

pub mod bus;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod log_pipeline;
pub mod monitor;
pub mod observer;
pub mod orchestrator;
pub mod query;
pub mod registry;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use bus::EventBus;
pub use cancel::CancelRegistry;
pub use config::EngineConfig;
pub use dispatcher::Dispatcher;
pub use engine::Engine;
pub use error::EngineError;
pub use log_pipeline::{JobLogger, LogPipeline, LogSender};
pub use monitor::Monitor;
pub use observer::{ObserverHub, SubscriberId};
pub use orchestrator::Orchestrator;
pub use query::{ManagerFilter, ManagerTree, Page, Pagination, Queries, StepSnapshot};
pub use registry::WorkerRegistry;
pub use worker::{LeafWorker, StepContext, StepManager, WorkerContext};
