// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types published by the engine.
//!
//! Serializes with `{"type": "domain:verb", ...fields}` format. These are
//! the public schema forwarded to observers; they are never persisted.
//! Consumers needing history query the job store directly.

use crate::id::DocumentId;
use crate::job::{JobId, JobKind, JobStatus, StatusCounts};
use crate::log::LogLevel;
use serde::{Deserialize, Serialize};

/// Events published on the in-process bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A job's status changed. Emitted on every status write.
    #[serde(rename = "job:status_change")]
    JobStatusChange {
        job_id: JobId,
        manager_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<JobId>,
        kind: JobKind,
        old_status: JobStatus,
        new_status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A step began running and its planner was invoked.
    #[serde(rename = "step:activation")]
    StepActivation {
        manager_id: JobId,
        step_id: JobId,
        step_index: usize,
    },

    /// Aggregated leaf counts for a step.
    #[serde(rename = "step:progress")]
    StepProgress {
        manager_id: JobId,
        step_id: JobId,
        step_name: String,
        step_index: usize,
        counts: StatusCounts,
        total_leaves: u64,
    },

    /// Aggregated step counts for a manager.
    #[serde(rename = "manager:progress")]
    ManagerProgress {
        manager_id: JobId,
        step_counts: StatusCounts,
        total_steps: u64,
        document_count: u64,
    },

    /// A persisted log entry surfaced to observers. Only published at
    /// `info` and above unless the producer forced publication.
    #[serde(rename = "job:log")]
    JobLog {
        job_id: JobId,
        manager_id: JobId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_name: Option<String>,
        level: LogLevel,
        message: String,
        sequence: u64,
    },

    /// Debounced trigger telling observers to re-fetch log windows for the
    /// listed steps. Carries no log content.
    #[serde(rename = "logs:refresh")]
    RefreshLogs { step_ids: Vec<JobId> },

    /// A worker persisted a document. `is_new` is false for updates to an
    /// existing document; those never change document counts.
    #[serde(rename = "document:saved")]
    DocumentSaved {
        job_id: JobId,
        manager_id: JobId,
        document_id: DocumentId,
        is_new: bool,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::JobStatusChange { .. } => "job:status_change",
            Event::StepActivation { .. } => "step:activation",
            Event::StepProgress { .. } => "step:progress",
            Event::ManagerProgress { .. } => "manager:progress",
            Event::JobLog { .. } => "job:log",
            Event::RefreshLogs { .. } => "logs:refresh",
            Event::DocumentSaved { .. } => "document:saved",
        }
    }

    /// The manager this event belongs to, when it has one.
    pub fn manager_id(&self) -> Option<&JobId> {
        match self {
            Event::JobStatusChange { manager_id, .. }
            | Event::StepActivation { manager_id, .. }
            | Event::StepProgress { manager_id, .. }
            | Event::ManagerProgress { manager_id, .. }
            | Event::JobLog { manager_id, .. }
            | Event::DocumentSaved { manager_id, .. } => Some(manager_id),
            Event::RefreshLogs { .. } => None,
        }
    }

    /// One-line summary for diagnostic logs.
    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::JobStatusChange { job_id, kind, old_status, new_status, .. } => {
                format!("{t} job={job_id} kind={kind} {old_status}->{new_status}")
            }
            Event::StepActivation { step_id, step_index, .. } => {
                format!("{t} step={step_id} index={step_index}")
            }
            Event::StepProgress { step_id, counts, total_leaves, .. } => {
                format!(
                    "{t} step={step_id} terminal={}/{} total={total_leaves}",
                    counts.terminal(),
                    counts.total(),
                )
            }
            Event::ManagerProgress { manager_id, total_steps, document_count, .. } => {
                format!("{t} manager={manager_id} steps={total_steps} docs={document_count}")
            }
            Event::JobLog { job_id, level, sequence, .. } => {
                format!("{t} job={job_id} level={level} seq={sequence}")
            }
            Event::RefreshLogs { step_ids } => format!("{t} steps={}", step_ids.len()),
            Event::DocumentSaved { job_id, document_id, is_new, .. } => {
                format!("{t} job={job_id} doc={document_id} new={is_new}")
            }
        }
    }
}

/// Sink for publishing events without depending on a concrete bus.
///
/// The storage layer uses this seam to report dead-letter transitions; the
/// engine's event bus is the production implementation.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

/// Sink that discards everything. Placeholder for wiring and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: Event) {}
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
