// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quaero-storage: Durable persistence for the Quaero engine.
//!
//! A single-writer embedded key-value [`Store`] (write-ahead log plus
//! compressed snapshots) carries everything: typed job records and their
//! tree indexes ([`JobStore`]), the visibility-timeout work [`Queue`], and
//! per-job log streams.

pub mod jobs;
pub mod keys;
pub mod queue;
pub mod snapshot;
pub mod store;
pub mod wal;

pub use jobs::{JobStore, JobStoreError, LogsMeta};
pub use queue::{Queue, QueueConfig, QueueError};
pub use snapshot::{rotate_bak_path, Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use store::{Store, StoreError, Update};
pub use wal::{Op, Wal, WalEntry, WalError};
