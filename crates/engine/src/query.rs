// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only query surface for observers to bootstrap state.
//!
//! Nothing here mutates the core; clients pull a snapshot, then consume
//! incremental events from the observer hub.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use quaero_core::{Job, JobId, JobKind, JobStatus, LogEntry, LogLevel, StatusCounts};
use quaero_storage::{keys, JobStore};
use serde::{Deserialize, Serialize};

/// Offset/limit pagination window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}

/// One page of results with the total matching count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub offset: usize,
}

/// Filter for manager listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerFilter {
    pub status: Option<JobStatus>,
    pub definition_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
}

/// A step with its live aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub job: Job,
    pub counts: StatusCounts,
    pub total_leaves: u64,
}

/// A manager plus its steps and per-step counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerTree {
    pub manager: Job,
    pub steps: Vec<StepSnapshot>,
}

#[derive(Clone)]
pub struct Queries {
    jobs: JobStore,
}

impl Queries {
    pub fn new(jobs: JobStore) -> Self {
        Self { jobs }
    }

    /// Snapshot of a manager with its steps, ordered by step index, each
    /// carrying freshly computed leaf counts.
    pub fn manager_tree(&self, id: &JobId) -> Result<ManagerTree, EngineError> {
        let manager = self.jobs.must_get(id)?;
        if manager.kind != JobKind::Manager {
            return Err(EngineError::NotFound(format!("{id} is not a manager job")));
        }

        let mut steps: Vec<Job> = self
            .jobs
            .children(id)?
            .into_iter()
            .filter(|job| job.kind == JobKind::Step)
            .collect();
        steps.sort_by_key(|job| job.step_index().unwrap_or(usize::MAX));

        let mut snapshots = Vec::with_capacity(steps.len());
        for step in steps {
            let mut counts = StatusCounts::default();
            for leaf in self.jobs.children(&step.id)? {
                counts.record(leaf.status);
            }
            let total_leaves = counts.total();
            snapshots.push(StepSnapshot { job: step, counts, total_leaves });
        }
        Ok(ManagerTree { manager, steps: snapshots })
    }

    /// Page through a step's leaves in index order.
    pub fn list_leaves_by_step(
        &self,
        step_id: &JobId,
        page: Pagination,
    ) -> Result<Page<Job>, EngineError> {
        let leaves = self.jobs.children(step_id)?;
        let total = leaves.len();
        let items = leaves.into_iter().skip(page.offset).take(page.limit).collect();
        Ok(Page { items, total, offset: page.offset })
    }

    /// Ordered log window; callers advance `from_sequence` to tail.
    pub fn logs(
        &self,
        job_id: &JobId,
        from_sequence: u64,
        limit: usize,
        min_level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>, EngineError> {
        Ok(self.jobs.read_logs(job_id, from_sequence, limit, min_level)?)
    }

    /// Page through managers matching the filter, in id order.
    ///
    /// Managers have no dedicated index; this scans the job prefix, which
    /// is fine at embedded scale.
    pub fn list_managers(
        &self,
        filter: &ManagerFilter,
        page: Pagination,
    ) -> Result<Page<Job>, EngineError> {
        let mut managers = Vec::new();
        for (_, bytes) in self.jobs.store().scan(keys::JOBS) {
            let job: Job = serde_json::from_slice(&bytes)
                .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
            if job.kind != JobKind::Manager {
                continue;
            }
            if let Some(status) = filter.status {
                if job.status != status {
                    continue;
                }
            }
            if let Some(def) = &filter.definition_id {
                if &job.definition_id != def {
                    continue;
                }
            }
            if let Some(after) = filter.created_after {
                if job.created_at < after {
                    continue;
                }
            }
            managers.push(job);
        }
        let total = managers.len();
        let items = managers.into_iter().skip(page.offset).take(page.limit).collect();
        Ok(Page { items, total, offset: page.offset })
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
