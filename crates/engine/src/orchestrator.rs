// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator: definitions in, job trees out.
//!
//! `execute_definition` materializes the manager and its steps, then walks
//! steps strictly by index. Activating a step invokes its planner exactly
//! once; a step that plans zero leaves completes on the spot and the walk
//! continues. Once leaves exist the monitor owns progress, calling back
//! into [`advance_after`](Orchestrator::advance_after) when a step
//! terminates.

use crate::bus::{status_change, EventBus};
use crate::cancel::CancelRegistry;
use crate::dispatcher::panic_message;
use crate::error::EngineError;
use crate::log_pipeline::LogSender;
use crate::registry::WorkerRegistry;
use crate::worker::StepContext;
use quaero_core::job::{META_DEGRADED, META_LEAVES_PLANNED};
use quaero_core::{Clock, ErrorTolerance, Event, Job, JobDefinition, JobId, JobKind, JobStatus};
use quaero_storage::{JobStore, JobStoreError, Queue};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// What activating a step produced.
enum Activation {
    /// Leaves enqueued; the monitor drives from here.
    Planned,
    /// Planner created nothing; the step completed immediately.
    Empty,
    /// Planner failed; carries the manager-facing error.
    Failed(String),
}

pub struct Orchestrator {
    jobs: JobStore,
    queue: Arc<Queue>,
    registry: Arc<WorkerRegistry>,
    bus: Arc<EventBus>,
    logs: LogSender,
    clock: Arc<dyn Clock>,
    cancels: Arc<CancelRegistry>,
}

impl Orchestrator {
    pub fn new(
        jobs: JobStore,
        queue: Arc<Queue>,
        registry: Arc<WorkerRegistry>,
        bus: Arc<EventBus>,
        logs: LogSender,
        clock: Arc<dyn Clock>,
        cancels: Arc<CancelRegistry>,
    ) -> Self {
        Self { jobs, queue, registry, bus, logs, clock, cancels }
    }

    /// Instantiate and start a definition. Returns the manager id.
    ///
    /// Validation runs before anything is written: a malformed definition
    /// or unregistered worker type leaves no state behind.
    pub async fn execute_definition(
        &self,
        definition: &JobDefinition,
    ) -> Result<JobId, EngineError> {
        definition.validate().map_err(EngineError::Validation)?;
        for step in &definition.steps {
            if self.registry.step_manager(&step.worker_type).is_none() {
                return Err(EngineError::Validation(format!(
                    "no step planner registered for worker type '{}'",
                    step.worker_type
                )));
            }
            if let Some(worker) = self.registry.leaf(&step.worker_type) {
                worker.validate(&step.config)?;
            }
        }

        self.jobs.put_definition(definition)?;
        let manager = Job::manager(definition, self.clock.as_ref());
        let steps: Vec<Job> = definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| Job::step(&manager, index, step, self.clock.as_ref()))
            .collect();

        let mut ops = self.jobs.insert_ops(&manager)?;
        for step in &steps {
            ops.extend(self.jobs.insert_ops(step)?);
        }
        self.jobs.store().apply(ops)?;

        // Root token exists before any worker can look for it
        let _ = self.cancels.token(&manager.id);

        self.logs
            .logger_for(&manager, None)
            .info(format!("manager started with {} steps", steps.len()));
        self.transition(&manager.id, JobStatus::Running, None)?;
        self.advance_from(&manager.id, 0).await?;
        Ok(manager.id)
    }

    /// Activate steps starting at `index` until one plans leaves, a
    /// planner fails, or the steps run out (manager completed).
    pub async fn advance_from(
        &self,
        manager_id: &JobId,
        index: usize,
    ) -> Result<(), EngineError> {
        let mut index = index;
        loop {
            let manager = self.jobs.must_get(manager_id)?;
            if manager.is_terminal() {
                return Ok(());
            }
            let Some(step) = self.step_at(manager_id, index)? else {
                self.transition(manager_id, JobStatus::Completed, None)?;
                return Ok(());
            };
            match self.activate(&step).await? {
                Activation::Planned => return Ok(()),
                Activation::Empty => index += 1,
                Activation::Failed(error) => {
                    self.transition(manager_id, JobStatus::Failed, Some(error))?;
                    return Ok(());
                }
            }
        }
    }

    /// Monitor callback once a step is terminal: continue, fail the
    /// manager, or leave a cancelled tree alone, per tolerance policy.
    pub async fn advance_after(&self, step: &Job) -> Result<(), EngineError> {
        let manager = self.jobs.must_get(&step.manager_id)?;
        if manager.is_terminal() {
            return Ok(());
        }
        let Some(index) = step.step_index() else {
            warn!(step = %step.id, "terminal step without index");
            return Ok(());
        };
        match step.status {
            JobStatus::Completed => self.advance_from(&manager.id, index + 1).await,
            JobStatus::Failed => match step.tolerance() {
                ErrorTolerance::FailFast => {
                    self.transition(
                        &manager.id,
                        JobStatus::Failed,
                        Some(format!("step '{}' failed", step.name)),
                    )?;
                    Ok(())
                }
                ErrorTolerance::Tolerate { .. } => {
                    // Degraded-but-running: record it and keep walking
                    self.jobs.set_metadata(&manager.id, META_DEGRADED, true.into())?;
                    self.advance_from(&manager.id, index + 1).await
                }
            },
            // Cancelled steps belong to cancel_manager's sweep
            _ => Ok(()),
        }
    }

    /// Cancel a manager and everything under it.
    ///
    /// In-flight deliveries still reach workers; they observe the token or
    /// the terminal status and return without effects.
    pub async fn cancel_manager(&self, manager_id: &JobId) -> Result<(), EngineError> {
        let manager = self.jobs.must_get(manager_id)?;
        if manager.kind != JobKind::Manager {
            return Err(EngineError::Validation(format!("{manager_id} is not a manager job")));
        }
        if manager.is_terminal() {
            return Ok(());
        }

        // Signal workers first so polling leaves wind down promptly
        self.cancels.cancel(manager_id);
        self.transition(manager_id, JobStatus::Cancelled, None)?;

        let mut leaf_ids = HashSet::new();
        for job in self.jobs.jobs_under_manager(manager_id)? {
            if job.kind == JobKind::Leaf {
                leaf_ids.insert(job.id);
            }
            if !job.is_terminal() {
                self.transition(&job.id, JobStatus::Cancelled, None)?;
            }
        }
        let dropped = self.queue.drop_for_jobs(&leaf_ids)?;
        debug!(manager = %manager_id, dropped, "manager cancelled");
        Ok(())
    }

    async fn activate(&self, step: &Job) -> Result<Activation, EngineError> {
        let step = match self.jobs.transition(
            &step.id,
            JobStatus::Running,
            None,
            self.clock.now_utc(),
        ) {
            Ok((old, job)) => {
                self.bus.publish(status_change(old, &job));
                job
            }
            // Already running or terminal (restart re-activation): the
            // monitor drives it from here.
            Err(JobStoreError::Transition(_)) => return Ok(Activation::Planned),
            Err(e) => return Err(e.into()),
        };

        self.bus.publish(Event::StepActivation {
            manager_id: step.manager_id,
            step_id: step.id,
            step_index: step.step_index().unwrap_or(0),
        });

        let Some(planner) = self.registry.step_manager(&step.worker_type) else {
            let error =
                format!("no step planner registered for worker type '{}'", step.worker_type);
            self.transition(&step.id, JobStatus::Failed, Some(error.clone()))?;
            return Ok(Activation::Failed(error));
        };

        let logger = self.logs.logger_for(&step, None);
        let token = self.cancels.token(&step.manager_id).child_token();
        let sctx = Arc::new(StepContext::new(
            step.clone(),
            logger,
            token,
            self.queue.clone(),
            self.jobs.clone(),
            self.clock.clone(),
        ));
        // Planner runs on its own task so a panic is an error, not a crash
        let joined = tokio::spawn({
            let sctx = sctx.clone();
            let planner = planner.clone();
            async move { planner.create_leaves(&sctx).await }
        })
        .await;
        let planned = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(EngineError::Panic(panic_message(e))),
            Err(_) => Err(EngineError::Worker("planner task aborted".to_string())),
        };

        match planned {
            Ok(0) => {
                self.jobs.set_metadata(&step.id, META_LEAVES_PLANNED, true.into())?;
                self.transition(&step.id, JobStatus::Completed, None)?;
                Ok(Activation::Empty)
            }
            Ok(leaves) => {
                self.jobs.set_metadata(&step.id, META_LEAVES_PLANNED, true.into())?;
                debug!(step = %step.id, leaves, "step planned");
                Ok(Activation::Planned)
            }
            Err(e) => {
                let error = e.to_string();
                self.transition(&step.id, JobStatus::Failed, Some(error.clone()))?;
                Ok(Activation::Failed(format!("step '{}' failed: {error}", step.name)))
            }
        }
    }

    fn step_at(&self, manager_id: &JobId, index: usize) -> Result<Option<Job>, EngineError> {
        Ok(self
            .jobs
            .children(manager_id)?
            .into_iter()
            .filter(|job| job.kind == JobKind::Step)
            .find(|job| job.step_index() == Some(index)))
    }

    /// Transition and publish, tolerating a lost race against another
    /// writer (cancellation, monitor close).
    fn transition(
        &self,
        id: &JobId,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<Option<Job>, EngineError> {
        match self.jobs.transition(id, to, error, self.clock.now_utc()) {
            Ok((old, job)) => {
                self.bus.publish(status_change(old, &job));
                Ok(Some(job))
            }
            Err(JobStoreError::Transition(t)) => {
                debug!(job = %id, "transition skipped: {t}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
