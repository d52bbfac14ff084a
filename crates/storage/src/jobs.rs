// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed persistence of job records, definitions, and per-job logs.
//!
//! Jobs live under `jobs/<id>` with two empty-value indexes for range
//! scans: `jobs_by_parent/<parent>/<child>` and
//! `jobs_by_manager/<manager>/<job>`. Status writes go through
//! [`Store::update`], so concurrent transition attempts serialize on the
//! job's key and the losing writer observes the winner's state.

use crate::keys;
use crate::store::{Store, StoreError, Update};
use crate::wal::Op;
use chrono::{DateTime, Utc};
use quaero_core::job::InvalidTransition;
use quaero_core::{Job, JobDefinition, JobId, JobStatus, LogDraft, LogEntry, LogLevel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Errors from the typed job store.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl PartialEq for JobStoreError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JobStoreError::NotFound(a), JobStoreError::NotFound(b)) => a == b,
            (JobStoreError::AlreadyExists(a), JobStoreError::AlreadyExists(b)) => a == b,
            (JobStoreError::Transition(a), JobStoreError::Transition(b)) => a == b,
            _ => false,
        }
    }
}

/// Log bookkeeping per job: the consumer-owned sequence counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogsMeta {
    /// Sequence the next appended entry receives (starts at 1).
    pub next_sequence: u64,
    pub total_count: u64,
}

impl LogsMeta {
    fn next(&self) -> u64 {
        self.next_sequence.max(1)
    }
}

/// Typed view over the store for job records. Cheap to clone.
#[derive(Clone)]
pub struct JobStore {
    store: Arc<Store>,
}

impl JobStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// The underlying key-value store (for namespaced worker kv access).
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Ops that persist a job and its tree indexes, for batching with a
    /// queue message.
    pub fn insert_ops(&self, job: &Job) -> Result<Vec<Op>, JobStoreError> {
        let mut ops = vec![Op::set(keys::job(&job.id), serde_json::to_vec(job)?)];
        if let Some(parent) = &job.parent_id {
            ops.push(Op::set(keys::job_child(parent, &job.id), Vec::new()));
        }
        ops.push(Op::set(keys::job_under_manager(&job.manager_id, &job.id), Vec::new()));
        Ok(ops)
    }

    /// Persist a new job record with its indexes.
    pub fn insert(&self, job: &Job) -> Result<(), JobStoreError> {
        if self.store.get(&keys::job(&job.id)).is_some() {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        self.store.apply(self.insert_ops(job)?)?;
        Ok(())
    }

    pub fn get(&self, id: &JobId) -> Result<Option<Job>, JobStoreError> {
        match self.store.get(&keys::job(id)) {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn must_get(&self, id: &JobId) -> Result<Job, JobStoreError> {
        self.get(id)?.ok_or(JobStoreError::NotFound(*id))
    }

    /// Atomic read-modify-write of one job record.
    fn update_job(
        &self,
        id: &JobId,
        f: impl FnOnce(&mut Job) -> Result<(), JobStoreError>,
    ) -> Result<Job, JobStoreError> {
        let mut out: Result<Job, JobStoreError> = Err(JobStoreError::NotFound(*id));
        self.store.update(&keys::job(id), |current| {
            let Some(bytes) = current else {
                return Update::Keep;
            };
            let mut job: Job = match serde_json::from_slice(bytes) {
                Ok(job) => job,
                Err(e) => {
                    out = Err(e.into());
                    return Update::Keep;
                }
            };
            if let Err(e) = f(&mut job) {
                out = Err(e);
                return Update::Keep;
            }
            match serde_json::to_vec(&job) {
                Ok(bytes) => {
                    out = Ok(job);
                    Update::Set(bytes)
                }
                Err(e) => {
                    out = Err(e.into());
                    Update::Keep
                }
            }
        })?;
        out
    }

    /// Apply a status transition. Returns the previous status and the
    /// updated record.
    pub fn transition(
        &self,
        id: &JobId,
        to: JobStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(JobStatus, Job), JobStoreError> {
        let mut old = None;
        let job = self.update_job(id, |job| {
            old = Some(job.transition(to, error.clone(), now)?);
            Ok(())
        })?;
        match old {
            Some(old) => Ok((old, job)),
            None => Err(JobStoreError::NotFound(*id)),
        }
    }

    /// Force a job to `failed` from any non-terminal status.
    ///
    /// Dead-lettering and leaf timeouts can hit a job that never reached
    /// `running` (crash before the dispatcher's first write); this walks
    /// the legal edge through `running` so the DAG stays intact. Returns
    /// the original status.
    pub fn force_fail(
        &self,
        id: &JobId,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(JobStatus, Job), JobStoreError> {
        let error = error.into();
        let mut old = None;
        let job = self.update_job(id, |job| {
            old = Some(job.status);
            if job.status == JobStatus::Pending {
                job.transition(JobStatus::Running, None, now)?;
            }
            job.transition(JobStatus::Failed, Some(error.clone()), now)?;
            Ok(())
        })?;
        match old {
            Some(old) => Ok((old, job)),
            None => Err(JobStoreError::NotFound(*id)),
        }
    }

    /// Write the derived aggregate. Allowed on terminal records; progress
    /// is a side-annotation, not part of the immutable outcome.
    pub fn set_progress(
        &self,
        id: &JobId,
        counts: quaero_core::StatusCounts,
    ) -> Result<Job, JobStoreError> {
        self.update_job(id, |job| {
            job.progress = Some(counts);
            Ok(())
        })
    }

    /// Increment the unique-document counter (side-annotation).
    pub fn add_document_count(&self, id: &JobId, delta: u64) -> Result<Job, JobStoreError> {
        self.update_job(id, |job| {
            job.document_count += delta;
            Ok(())
        })
    }

    /// Increment the generic result counter (side-annotation).
    pub fn add_result_count(&self, id: &JobId, delta: u64) -> Result<Job, JobStoreError> {
        self.update_job(id, |job| {
            job.result_count += delta;
            Ok(())
        })
    }

    /// Set one metadata key (side-annotation).
    pub fn set_metadata(
        &self,
        id: &JobId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<Job, JobStoreError> {
        self.update_job(id, |job| {
            job.metadata.insert(key.to_string(), value.clone());
            Ok(())
        })
    }

    /// Ids of a job's direct children, in index order.
    pub fn child_ids(&self, parent: &JobId) -> Vec<JobId> {
        self.store
            .scan_keys(&keys::job_children_prefix(parent))
            .iter()
            .map(|k| JobId::from_string(keys::last_segment(k)))
            .collect()
    }

    /// A job's direct children. Index entries without a record are skipped
    /// with a warning.
    pub fn children(&self, parent: &JobId) -> Result<Vec<Job>, JobStoreError> {
        let mut jobs = Vec::new();
        for id in self.child_ids(parent) {
            match self.get(&id)? {
                Some(job) => jobs.push(job),
                None => warn!(parent = %parent, child = %id, "dangling child index entry"),
            }
        }
        Ok(jobs)
    }

    /// Every job under a manager (steps and leaves), in index order.
    pub fn jobs_under_manager(&self, manager: &JobId) -> Result<Vec<Job>, JobStoreError> {
        let mut jobs = Vec::new();
        for key in self.store.scan_keys(&keys::jobs_under_manager_prefix(manager)) {
            let id = JobId::from_string(keys::last_segment(&key));
            match self.get(&id)? {
                Some(job) => jobs.push(job),
                None => warn!(manager = %manager, job = %id, "dangling manager index entry"),
            }
        }
        Ok(jobs)
    }

    // ── Definitions ──────────────────────────────────────────────────────

    pub fn put_definition(&self, definition: &JobDefinition) -> Result<(), JobStoreError> {
        self.store
            .set(keys::definition(&definition.id), serde_json::to_vec(definition)?)?;
        Ok(())
    }

    pub fn get_definition(&self, id: &str) -> Result<Option<JobDefinition>, JobStoreError> {
        match self.store.get(&keys::definition(id)) {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // ── Logs ─────────────────────────────────────────────────────────────

    /// Append drafted entries for one job, assigning gap-free sequences.
    ///
    /// Single-writer: only the log pipeline's consumer may call this, which
    /// is what makes the read-assign-write of the counter safe.
    pub fn append_logs(
        &self,
        job_id: &JobId,
        drafts: Vec<LogDraft>,
    ) -> Result<u64, JobStoreError> {
        let mut meta = self.logs_meta(job_id)?;
        let first = meta.next();
        let mut seq = first;

        let mut ops = Vec::with_capacity(drafts.len() + 1);
        for draft in drafts {
            let entry = draft.into_entry(seq);
            ops.push(Op::set(keys::log_entry(job_id, seq), serde_json::to_vec(&entry)?));
            seq += 1;
        }
        meta.next_sequence = seq;
        meta.total_count = seq - 1;
        ops.push(Op::set(keys::logs_meta(job_id), serde_json::to_vec(&meta)?));
        self.store.apply(ops)?;
        Ok(first)
    }

    pub fn logs_meta(&self, job_id: &JobId) -> Result<LogsMeta, JobStoreError> {
        match self.store.get(&keys::logs_meta(job_id)) {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(LogsMeta::default()),
        }
    }

    /// Ordered log window for a job, for tailing by sequence.
    ///
    /// Returns up to `limit` entries with `sequence >= from_sequence`,
    /// filtered to `min_level` when given. Callers advance `from_sequence`
    /// past the last entry they saw.
    pub fn read_logs(
        &self,
        job_id: &JobId,
        from_sequence: u64,
        limit: usize,
        min_level: Option<LogLevel>,
    ) -> Result<Vec<LogEntry>, JobStoreError> {
        let mut entries = Vec::new();
        for (_, bytes) in self.store.scan(&keys::log_prefix(job_id)) {
            if entries.len() >= limit {
                break;
            }
            let entry: LogEntry = serde_json::from_slice(&bytes)?;
            if entry.sequence < from_sequence {
                continue;
            }
            if let Some(min) = min_level {
                if entry.level < min {
                    continue;
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
