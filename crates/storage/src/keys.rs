// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key layout for the embedded store.
//!
//! Every prefix ends in `/` so range scans never bleed into a sibling
//! namespace. Numeric segments are fixed-width (zero-padded) so that the
//! map's lexical order equals numeric order.

use chrono::{DateTime, Utc};
use quaero_core::{JobId, MessageId};

pub const JOBS: &str = "jobs/";
pub const JOBS_BY_PARENT: &str = "jobs_by_parent/";
pub const JOBS_BY_MANAGER: &str = "jobs_by_manager/";
pub const QUEUE_MSG: &str = "queue/msg/";
pub const QUEUE_VISIBLE: &str = "queue/visible/";
pub const QUEUE_DEAD: &str = "queue/dead/";
pub const LOGS: &str = "logs/";
pub const LOGS_META: &str = "logs_meta/";
pub const DEFS: &str = "defs/";
pub const KV: &str = "kv/";

pub fn job(id: &JobId) -> String {
    format!("{JOBS}{id}")
}

pub fn job_child(parent: &JobId, child: &JobId) -> String {
    format!("{JOBS_BY_PARENT}{parent}/{child}")
}

pub fn job_children_prefix(parent: &JobId) -> String {
    format!("{JOBS_BY_PARENT}{parent}/")
}

pub fn job_under_manager(manager: &JobId, job: &JobId) -> String {
    format!("{JOBS_BY_MANAGER}{manager}/{job}")
}

pub fn jobs_under_manager_prefix(manager: &JobId) -> String {
    format!("{JOBS_BY_MANAGER}{manager}/")
}

pub fn queue_msg(id: &MessageId) -> String {
    format!("{QUEUE_MSG}{id}")
}

/// Time-ordered visibility index entry.
pub fn queue_visible(at: DateTime<Utc>, id: &MessageId) -> String {
    format!("{QUEUE_VISIBLE}{}/{id}", encode_ts(at))
}

pub fn queue_dead(id: &MessageId) -> String {
    format!("{QUEUE_DEAD}{id}")
}

pub fn log_entry(job: &JobId, sequence: u64) -> String {
    format!("{LOGS}{job}/{}", encode_seq(sequence))
}

pub fn log_prefix(job: &JobId) -> String {
    format!("{LOGS}{job}/")
}

pub fn logs_meta(job: &JobId) -> String {
    format!("{LOGS_META}{job}")
}

pub fn definition(id: &str) -> String {
    format!("{DEFS}{id}")
}

pub fn kv(namespace: &str, key: &str) -> String {
    format!("{KV}{namespace}/{key}")
}

/// Fixed-width big-endian style sequence segment: 16 hex digits, so the
/// lexical order of keys equals the numeric order of sequences.
pub fn encode_seq(seq: u64) -> String {
    format!("{seq:016x}")
}

/// Fixed-width timestamp segment: nanoseconds since epoch, 20 decimal
/// digits. Pre-epoch times clamp to zero.
pub fn encode_ts(at: DateTime<Utc>) -> String {
    let nanos = at.timestamp_nanos_opt().unwrap_or(0).max(0) as u64;
    format!("{nanos:020}")
}

/// Final `/`-separated segment of a key (child id in index entries).
pub fn last_segment(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
