// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker contract: typed work behind the generic orchestration.
//!
//! Two orthogonal capabilities hang off a worker-type string:
//! [`LeafWorker`] executes queued leaves, [`StepManager`] plans a step by
//! creating its leaves. An implementation may provide either or both.
//!
//! Delivery is at-least-once. A worker that finished its effects but
//! crashed before the ack sees its job again, so `execute` must be
//! idempotent on the job id. The engine's first-line guard is skipping
//! jobs that are already terminal; anything finer is the worker's own
//! dedup (the namespaced kv surface is there for exactly that).

use crate::bus::EventBus;
use crate::error::EngineError;
use crate::log_pipeline::JobLogger;
use async_trait::async_trait;
use quaero_core::{Clock, ConfigMap, DocumentId, Event, Job, JobId, JobStatus, MessageId, QueueMessage};
use quaero_storage::{keys, JobStore, Queue};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Executes leaf jobs of one worker type.
#[async_trait]
pub trait LeafWorker: Send + Sync {
    /// Stable identifier this worker registers under.
    fn worker_type(&self) -> &str;

    /// Pure config check, run once when a definition is loaded.
    fn validate(&self, config: &ConfigMap) -> Result<(), EngineError> {
        let _ = config;
        Ok(())
    }

    /// Perform the work. Must honor `ctx` cancellation at every I/O point
    /// and stream progress through `ctx.logger()`.
    async fn execute(&self, ctx: &WorkerContext) -> Result<(), EngineError>;
}

/// Plans a step by creating zero or more leaf jobs under it.
#[async_trait]
pub trait StepManager: Send + Sync {
    /// Create the step's leaves, returning how many were enqueued.
    /// Invoked exactly once per step activation. Returning zero completes
    /// the step immediately.
    async fn create_leaves(&self, ctx: &StepContext) -> Result<usize, EngineError>;
}

/// Execution context handed to [`LeafWorker::execute`].
pub struct WorkerContext {
    job: Job,
    message_id: MessageId,
    logger: JobLogger,
    cancel: CancellationToken,
    queue: Arc<Queue>,
    jobs: JobStore,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl WorkerContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        job: Job,
        message_id: MessageId,
        logger: JobLogger,
        cancel: CancellationToken,
        queue: Arc<Queue>,
        jobs: JobStore,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { job, message_id, logger, cancel, queue, jobs, bus, clock }
    }

    /// The leaf job as it was when dispatched.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn config(&self) -> &ConfigMap {
        &self.job.config
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    /// Cooperative cancellation flag. Long operations poll this.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the job is cancelled, for `select!`-style I/O.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Re-read the job's current status (redelivery guard for workers
    /// with non-idempotent side effects).
    pub fn job_status(&self) -> Result<JobStatus, EngineError> {
        Ok(self.jobs.must_get(&self.job.id)?.status)
    }

    /// Push this delivery's visibility further out. Long-running workers
    /// call this at about half the visibility timeout.
    pub fn extend_visibility(&self, delta: Duration) -> Result<(), EngineError> {
        self.queue.extend(&self.message_id, delta)?;
        Ok(())
    }

    /// Enqueue another leaf under the same step ("sibling spawning").
    ///
    /// The new leaf's parent is the step, never this leaf; the tree stays
    /// flat and the step cannot terminate until the sibling does.
    pub fn enqueue_sibling(
        &self,
        name: impl Into<String>,
        config: ConfigMap,
    ) -> Result<JobId, EngineError> {
        let step_id = self
            .job
            .parent_id
            .ok_or_else(|| EngineError::Validation("leaf has no parent step".to_string()))?;
        let step = self.jobs.must_get(&step_id)?;
        let leaf = Job::leaf(&step, name, self.job.worker_type.clone(), config, self.clock.as_ref());
        let msg = self.queue.message_for(leaf.id, leaf.worker_type.clone());
        self.queue.enqueue(&msg, self.jobs.insert_ops(&leaf)?)?;
        Ok(leaf.id)
    }

    /// Persist a document payload under the document kv namespace and
    /// publish `document:saved`. Returns whether the document was new;
    /// re-saving an existing id is an update and never inflates counts.
    pub fn save_document(
        &self,
        document_id: &DocumentId,
        payload: Vec<u8>,
    ) -> Result<bool, EngineError> {
        let key = keys::kv("documents", document_id.as_str());
        let store = self.jobs.store();
        let is_new = store.compare_and_set(&key, None, Some(payload.clone()))?;
        if !is_new {
            store.set(key, payload)?;
        }
        self.bus.publish(Event::DocumentSaved {
            job_id: self.job.id,
            manager_id: self.job.manager_id,
            document_id: *document_id,
            is_new,
        });
        Ok(is_new)
    }

    /// Bump the generic result counter on this leaf.
    pub fn record_result(&self, delta: u64) -> Result<(), EngineError> {
        self.jobs.add_result_count(&self.job.id, delta)?;
        Ok(())
    }

    /// Worker-owned key-value state (auth tokens, dedup marks), namespaced
    /// per worker type.
    pub fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.jobs.store().get(&keys::kv(&self.job.worker_type, key)))
    }

    pub fn kv_set(&self, key: &str, value: Vec<u8>) -> Result<(), EngineError> {
        self.jobs.store().set(keys::kv(&self.job.worker_type, key), value)?;
        Ok(())
    }
}

/// Planning context handed to [`StepManager::create_leaves`].
pub struct StepContext {
    step: Job,
    logger: JobLogger,
    cancel: CancellationToken,
    queue: Arc<Queue>,
    jobs: JobStore,
    clock: Arc<dyn Clock>,
}

impl StepContext {
    pub(crate) fn new(
        step: Job,
        logger: JobLogger,
        cancel: CancellationToken,
        queue: Arc<Queue>,
        jobs: JobStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { step, logger, cancel, queue, jobs, clock }
    }

    pub fn step(&self) -> &Job {
        &self.step
    }

    /// The step's config from the definition.
    pub fn config(&self) -> &ConfigMap {
        &self.step.config
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Create one leaf under this step, persisted atomically with its
    /// queue message.
    pub fn enqueue_leaf(
        &self,
        name: impl Into<String>,
        worker_type: impl Into<String>,
        config: ConfigMap,
    ) -> Result<JobId, EngineError> {
        let worker_type = worker_type.into();
        let leaf = Job::leaf(&self.step, name, worker_type.clone(), config, self.clock.as_ref());
        let msg: QueueMessage = self.queue.message_for(leaf.id, worker_type);
        self.queue.enqueue(&msg, self.jobs.insert_ops(&leaf)?)?;
        Ok(leaf.id)
    }
}
