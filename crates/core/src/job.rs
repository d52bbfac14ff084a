// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job records and the status state machine.
//!
//! Jobs form a strict tree: one `manager` per executed definition, one
//! `step` per definition step, and `leaf` jobs for the actual work. Leaves
//! are always direct children of a step ("flat-under-step"); workers that
//! spawn more work enqueue siblings, never grandchildren.

use crate::clock::Clock;
use crate::definition::{ConfigMap, ErrorTolerance, JobDefinition, StepDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

crate::define_id! {
    /// Unique identifier for a job record (manager, step, or leaf).
    pub struct JobId;
}

/// Metadata key: integer index of a step within its manager.
pub const META_STEP_INDEX: &str = "step_index";
/// Metadata key: definition step name, carried on step jobs and their leaves.
pub const META_STEP_NAME: &str = "step_name";
/// Metadata key: number of steps, carried on manager jobs.
pub const META_STEP_COUNT: &str = "step_count";
/// Metadata key: serialized [`ErrorTolerance`] policy on step jobs.
pub const META_TOLERANCE: &str = "tolerance";
/// Metadata key: soft wall-clock timeout in milliseconds for leaves.
pub const META_TIMEOUT_MS: &str = "timeout_ms";
/// Metadata key: set on a step once its planner has finished creating
/// leaves. Aggregation must not close a step before this is present.
pub const META_LEAVES_PLANNED: &str = "leaves_planned";
/// Metadata key: set on a manager that continued past a failed step.
pub const META_DEGRADED: &str = "degraded";

/// Position of a job in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Root of an executed definition; owns steps.
    Manager,
    /// One ordered stage; owns leaves.
    Step,
    /// The unit of dispatched work.
    Leaf,
}

crate::simple_display! {
    JobKind {
        Manager => "manager",
        Step => "step",
        Leaf => "leaf",
    }
}

/// Job status. Transitions form a DAG:
/// `pending → running → (completed | failed | cancelled)`, plus
/// `pending → cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Whether `self → to` is a legal edge of the status DAG.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running) | (Pending, Cancelled) | (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }
}

/// Attempted illegal status transition. The record is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition {from} -> {to} for job {job_id}")]
pub struct InvalidTransition {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Counts of jobs by status, used for step and manager aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn terminal(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// True when every counted job is terminal (and there is at least one).
    pub fn all_terminal(&self) -> bool {
        self.total() > 0 && self.terminal() == self.total()
    }
}

/// A job record in the persistent tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    /// Worker type key; required for steps and leaves, empty for managers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub worker_type: String,
    /// None iff this is a manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JobId>,
    /// Root manager id; equals `id` for the manager itself.
    pub manager_id: JobId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub definition_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Opaque, already-validated worker configuration.
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub config: ConfigMap,
    pub status: JobStatus,
    /// Non-empty iff `status == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Unique documents produced under this job. Updates to existing
    /// documents never increment this.
    #[serde(default)]
    pub document_count: u64,
    /// Generic result counter for workers without document semantics.
    #[serde(default)]
    pub result_count: u64,
    /// Opaque side-annotations (step index, auth id, degradation marks).
    #[serde(default, skip_serializing_if = "ConfigMap::is_empty")]
    pub metadata: ConfigMap,
    /// Derived aggregate over children; maintained for steps and managers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<StatusCounts>,
}

impl Job {
    /// Create the root manager job for a definition.
    pub fn manager(definition: &JobDefinition, clock: &dyn Clock) -> Self {
        let id = JobId::new();
        let mut metadata = ConfigMap::new();
        metadata.insert(META_STEP_COUNT.to_string(), definition.steps.len().into());
        Self {
            id,
            kind: JobKind::Manager,
            worker_type: String::new(),
            parent_id: None,
            manager_id: id,
            definition_id: definition.id.clone(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            config: ConfigMap::new(),
            status: JobStatus::Pending,
            error: None,
            created_at: clock.now_utc(),
            started_at: None,
            finished_at: None,
            document_count: 0,
            result_count: 0,
            metadata,
            progress: None,
        }
    }

    /// Create a step job under a manager.
    pub fn step(manager: &Job, index: usize, def: &StepDefinition, clock: &dyn Clock) -> Self {
        let mut metadata = ConfigMap::new();
        metadata.insert(META_STEP_INDEX.to_string(), index.into());
        metadata.insert(META_STEP_NAME.to_string(), def.name.clone().into());
        if let Ok(tolerance) = serde_json::to_value(def.tolerance) {
            metadata.insert(META_TOLERANCE.to_string(), tolerance);
        }
        if let Some(timeout) = def.timeout {
            metadata.insert(META_TIMEOUT_MS.to_string(), (timeout.as_millis() as u64).into());
        }
        Self {
            id: JobId::new(),
            kind: JobKind::Step,
            worker_type: def.worker_type.clone(),
            parent_id: Some(manager.id),
            manager_id: manager.id,
            definition_id: manager.definition_id.clone(),
            name: def.name.clone(),
            description: String::new(),
            config: def.config.clone(),
            status: JobStatus::Pending,
            error: None,
            created_at: clock.now_utc(),
            started_at: None,
            finished_at: None,
            document_count: 0,
            result_count: 0,
            metadata,
            progress: None,
        }
    }

    /// Create a leaf job under a step. The leaf inherits the step's name,
    /// index, and soft timeout annotations.
    pub fn leaf(
        step: &Job,
        name: impl Into<String>,
        worker_type: impl Into<String>,
        config: ConfigMap,
        clock: &dyn Clock,
    ) -> Self {
        let mut metadata = ConfigMap::new();
        for key in [META_STEP_INDEX, META_STEP_NAME, META_TIMEOUT_MS] {
            if let Some(v) = step.metadata.get(key) {
                metadata.insert(key.to_string(), v.clone());
            }
        }
        Self {
            id: JobId::new(),
            kind: JobKind::Leaf,
            worker_type: worker_type.into(),
            parent_id: Some(step.id),
            manager_id: step.manager_id,
            definition_id: step.definition_id.clone(),
            name: name.into(),
            description: String::new(),
            config,
            status: JobStatus::Pending,
            error: None,
            created_at: clock.now_utc(),
            started_at: None,
            finished_at: None,
            document_count: 0,
            result_count: 0,
            metadata,
            progress: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status transition, stamping `started_at` / `finished_at`.
    ///
    /// Returns the previous status. The record is unchanged on error.
    pub fn transition(
        &mut self,
        to: JobStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, InvalidTransition> {
        if !self.status.can_transition(to) {
            return Err(InvalidTransition { job_id: self.id, from: self.status, to });
        }
        let old = self.status;
        self.status = to;
        match to {
            JobStatus::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {
                self.finished_at = Some(now);
            }
            JobStatus::Pending => {}
        }
        self.error = match to {
            JobStatus::Failed => error,
            _ => None,
        };
        Ok(old)
    }

    pub fn step_index(&self) -> Option<usize> {
        self.metadata.get(META_STEP_INDEX)?.as_u64().map(|i| i as usize)
    }

    pub fn step_name(&self) -> Option<&str> {
        self.metadata.get(META_STEP_NAME)?.as_str()
    }

    pub fn step_count(&self) -> u64 {
        self.metadata.get(META_STEP_COUNT).and_then(|v| v.as_u64()).unwrap_or(0)
    }

    /// Failure tolerance policy for a step job. Defaults to fail-fast.
    pub fn tolerance(&self) -> ErrorTolerance {
        self.metadata
            .get(META_TOLERANCE)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Soft wall-clock timeout for a leaf, from its step's definition.
    pub fn leaf_timeout(&self) -> Option<Duration> {
        let ms = self.metadata.get(META_TIMEOUT_MS)?.as_u64()?;
        Some(Duration::from_millis(ms))
    }

    /// True once the step's planner has finished creating leaves.
    pub fn leaves_planned(&self) -> bool {
        self.metadata
            .get(META_LEAVES_PLANNED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            id: JobId = "leaf-test-1",
            worker_type: String = "fetch",
            manager_id: JobId = "mgr-test-1",
            definition_id: String = "def-test",
            name: String = "test-leaf",
            description: String = "",
        }
        set {
            kind: JobKind = JobKind::Leaf,
            config: ConfigMap = ConfigMap::new(),
            status: JobStatus = JobStatus::Pending,
            document_count: u64 = 0,
            result_count: u64 = 0,
            metadata: ConfigMap = ConfigMap::new(),
        }
        option {
            parent_id: JobId = Some(JobId::from_string("step-test-1")),
            error: String = None,
            started_at: chrono::DateTime<chrono::Utc> = None,
            finished_at: chrono::DateTime<chrono::Utc> = None,
            progress: StatusCounts = None,
        }
        computed {
            created_at: chrono::DateTime<chrono::Utc> = chrono::DateTime::UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
