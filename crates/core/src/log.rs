// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job log entries.
//!
//! Entries are immutable once written. Sequences are assigned by the log
//! pipeline's single consumer and are gap-free per job, starting at 1.

use crate::job::JobId;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Log severity. Ordering follows declaration order, so
/// `LogLevel::Warn >= LogLevel::Info` holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Panic,
}

crate::simple_display! {
    LogLevel {
        Trace => "trace",
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
        Fatal => "fatal",
        Panic => "panic",
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            "panic" => Ok(LogLevel::Panic),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

/// A single immutable log line for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotone per-job sequence starting at 1, no gaps.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Structured key-value context.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub fields: IndexMap<String, String>,
}

/// A produced log line before the pipeline assigns its sequence.
///
/// Producers fill everything but `sequence`; the pipeline's consumer owns
/// sequence assignment so numbering stays gap-free per job.
#[derive(Debug, Clone, PartialEq)]
pub struct LogDraft {
    pub job_id: JobId,
    pub manager_id: JobId,
    /// Owning step, when the producer is a leaf. Drives refresh triggers.
    pub step_id: Option<JobId>,
    pub step_name: Option<String>,
    pub worker_id: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub fields: IndexMap<String, String>,
    pub timestamp: DateTime<Utc>,
    /// Publish a `job:log` event even below the UI level gate.
    pub force_publish: bool,
}

impl LogDraft {
    /// Materialize the persisted entry once a sequence is assigned.
    pub fn into_entry(self, sequence: u64) -> LogEntry {
        LogEntry {
            sequence,
            timestamp: self.timestamp,
            level: self.level,
            message: self.message,
            job_id: self.job_id,
            step_name: self.step_name,
            worker_id: self.worker_id,
            fields: self.fields,
        }
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
